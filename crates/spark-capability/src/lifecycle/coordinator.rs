//! # AvailabilityCoordinator：依赖可用性驱动的启停状态机
//!
//! ## 核心意图（Why）
//! - 组件声明一组必需契约，只应在它们同时存在时运行；提供者的增删来自任意线程，且可能在组件的
//!   `start` 钩子执行期间重入发生；
//! - 状态机必须保证：每条“全部满足”的上升沿恰好一次 `start`，每次成功启动恰好配对一次 `stop`，
//!   失败的启动不会被重复尝试。
//!
//! ## 逻辑解析（How）
//! - 每个必需契约维护一个 [`CapabilitySet`]，满足位由提供者数量 0→1 / 1→0 的边沿推导；
//! - 所有状态修改都在协调器互斥锁内完成，钩子永远在锁外执行；
//! - 同一时刻只有一个“驱动者”线程执行迁移：其他线程更新位图后若发现已有驱动者便直接返回，
//!   驱动者在每次钩子返回后重新评估状态，因此重入或并发到达的边沿都不会丢失；
//! - `stop` 由 [`StartedLatch`] 守护，只有取到闩锁的一方执行。
//!
//! ## 契约说明（What）
//! - 挂载时先订阅运行时事件，再重放注册表中已有的提供者；实时事件与重放都以注册表当前内容为准，
//!   已撤回的提供者不会被重新计入；
//! - 启动失败：`Starting → StoppingOnError → Failed`，回滚执行一次 `stop`，随后请求强制关闭；
//! - 钩子中的 panic 被捕获，协调器同样进入 `Failed`（或在 `stop` 中 panic 时进入 `Stopped`），随后
//!   panic 被原样恢复并传播给触发迁移的调用方。
//!
//! ## 风险提示（Trade-offs）
//! - 钩子在触发边沿的线程上同步执行；耗时的 `start` 会延迟该线程上的宿主通知；
//! - `close` 若与正在执行的迁移并发，会把停止工作留给当前驱动者，返回时 `stop` 可能尚未完成。

use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::component::{Component, ForcedShutdown, ShutdownHook, StartContext};
use super::latch::StartedLatch;
use super::mask::SatisfactionMask;
use super::{BindingMode, LifecycleState};
use crate::capability_set::CapabilitySet;
use crate::contract::ContractKey;
use crate::error::{CapabilityError, ConfigurationError, cause_chain};
use crate::observability::TARGET_LIFECYCLE;
use crate::provider::{ProviderEntry, ProviderId};
use crate::runtime::{CapabilityListener, CapabilityRuntime, ListenerId};

/// 协调器的诊断快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub name: String,
    pub state: LifecycleState,
    pub ready: bool,
    pub missing: Vec<ContractKey>,
}

/// [`AvailabilityCoordinator`] 的构建器。
pub struct CoordinatorBuilder {
    name: String,
    required: Vec<ContractKey>,
    mode: BindingMode,
    shutdown_hook: Option<Arc<dyn ShutdownHook>>,
}

impl CoordinatorBuilder {
    /// 追加必需契约 `T`。
    pub fn require<T: ?Sized + 'static>(self) -> Self {
        self.require_key(ContractKey::of::<T>())
    }

    /// 以契约键追加必需契约。
    pub fn require_key(mut self, contract: ContractKey) -> Self {
        self.required.push(contract);
        self
    }

    pub fn binding(mut self, mode: BindingMode) -> Self {
        self.mode = mode;
        self
    }

    /// 启动失败时请求宿主关闭的回调。
    pub fn shutdown_hook(mut self, hook: impl ShutdownHook) -> Self {
        self.shutdown_hook = Some(Arc::new(hook));
        self
    }

    pub(crate) fn shared_shutdown_hook(mut self, hook: Option<Arc<dyn ShutdownHook>>) -> Self {
        self.shutdown_hook = hook;
        self
    }

    /// 挂载到运行时并立即评估一次状态。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：
    ///   1. 校验必需列表无重复，构造空集合与全零位图；
    ///   2. 订阅运行时事件（监听者只持有弱引用，协调器析构后自动失效）；
    ///   3. 重放注册表中已有的提供者；
    ///   4. 驱动状态机：必需列表为空或依赖已全部存在时，`start` 在本调用内执行。
    /// - **契约 (What)**：重复契约返回 [`ConfigurationError::DuplicateContract`]，此时不会订阅任何事件。
    pub fn attach(
        self,
        runtime: &CapabilityRuntime,
        component: impl Component,
    ) -> Result<AvailabilityCoordinator, CapabilityError> {
        self.attach_shared(runtime, Arc::new(component))
    }

    /// 以共享组件挂载。
    pub fn attach_shared(
        self,
        runtime: &CapabilityRuntime,
        component: Arc<dyn Component>,
    ) -> Result<AvailabilityCoordinator, CapabilityError> {
        let mut index = HashMap::with_capacity(self.required.len());
        for (position, contract) in self.required.iter().enumerate() {
            if index.insert(*contract, position).is_some() {
                return Err(ConfigurationError::DuplicateContract {
                    component: self.name,
                    contract: contract.name(),
                }
                .into());
            }
        }

        let width = self.required.len();
        let inner = Arc::new(CoordinatorInner {
            name: self.name,
            required: self.required,
            index,
            mode: self.mode,
            component,
            runtime: runtime.clone(),
            shutdown_hook: self.shutdown_hook,
            latch: StartedLatch::new(),
            state: Mutex::new(CoordinatorState {
                phase: LifecycleState::Stopped,
                mask: SatisfactionMask::new(width),
                sets: (0..width).map(|_| CapabilitySet::new()).collect(),
                captured: Vec::new(),
                driving: false,
                restart_pending: false,
                closed: false,
                released: false,
            }),
            subscription: Mutex::new(None),
        });

        let listener = Arc::new(CoordinatorListener {
            inner: Arc::downgrade(&inner),
        });
        let subscription = runtime.subscribe(listener);
        *inner.subscription.lock() = Some(subscription);
        let coordinator = AvailabilityCoordinator { inner };

        let missing = coordinator.inner.replay();
        info!(
            target: TARGET_LIFECYCLE,
            component = %coordinator.inner.name,
            required = coordinator.inner.required.len(),
            missing = ?missing,
            "availability coordinator attached"
        );
        coordinator.inner.drive();
        Ok(coordinator)
    }
}

/// 依赖可用性协调器。析构时等价于调用 [`AvailabilityCoordinator::close`]。
pub struct AvailabilityCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl AvailabilityCoordinator {
    /// 创建构建器，`name` 用于日志与强制关闭通知。
    pub fn builder(name: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            name: name.into(),
            required: Vec::new(),
            mode: BindingMode::default(),
            shutdown_hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// 必需契约列表，顺序即位图下标。
    pub fn required(&self) -> &[ContractKey] {
        &self.inner.required
    }

    pub fn binding_mode(&self) -> BindingMode {
        self.inner.mode
    }

    /// 当前生命周期状态。
    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().phase
    }

    /// 位图是否全部置位（只读检查，不触发迁移）。
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().mask.is_full()
    }

    pub fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    /// 尚未满足的必需契约。
    pub fn missing(&self) -> Vec<ContractKey> {
        let state = self.inner.state.lock();
        self.inner.missing_locked(&state)
    }

    /// 诊断快照。
    pub fn snapshot(&self) -> CoordinatorSnapshot {
        let state = self.inner.state.lock();
        CoordinatorSnapshot {
            name: self.inner.name.clone(),
            state: state.phase,
            ready: state.mask.is_full(),
            missing: self.inner.missing_locked(&state),
        }
    }

    /// 必需契约 `T` 当前被跟踪的最佳实例；`T` 不在必需列表中时返回 `None`。
    pub fn get_best<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let index = *self.inner.index.get(&ContractKey::of::<T>())?;
        let state = self.inner.state.lock();
        state.sets[index].best()?.downcast::<T>()
    }

    /// 可选依赖视图：必需契约同 [`AvailabilityCoordinator::get_best`]，其余契约读取注册表当前最佳实例。
    pub fn get_optional<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.inner.index.contains_key(&ContractKey::of::<T>()) {
            self.get_best::<T>()
        } else {
            self.inner.runtime.best::<T>()
        }
    }

    /// 显式关闭：取消订阅，已启动则停止一次，并释放全部提供者引用。重复调用为空操作。
    pub fn close(&self) {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            self.inner.runtime.unsubscribe(subscription);
        }
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        debug!(
            target: TARGET_LIFECYCLE,
            component = %self.inner.name,
            "availability coordinator closing"
        );
        self.inner.drive();
    }
}

impl Drop for AvailabilityCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for AvailabilityCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("AvailabilityCoordinator")
            .field("name", &snapshot.name)
            .field("state", &snapshot.state)
            .field("missing", &snapshot.missing)
            .finish()
    }
}

struct CoordinatorState {
    phase: LifecycleState,
    mask: SatisfactionMask,
    sets: Vec<CapabilitySet>,
    captured: Vec<ProviderId>,
    driving: bool,
    restart_pending: bool,
    closed: bool,
    released: bool,
}

enum Step {
    Start(Vec<(ContractKey, ProviderEntry)>),
    Stop,
}

struct CoordinatorInner {
    name: String,
    required: Vec<ContractKey>,
    index: HashMap<ContractKey, usize>,
    mode: BindingMode,
    component: Arc<dyn Component>,
    runtime: CapabilityRuntime,
    shutdown_hook: Option<Arc<dyn ShutdownHook>>,
    latch: StartedLatch,
    state: Mutex<CoordinatorState>,
    subscription: Mutex<Option<ListenerId>>,
}

impl CoordinatorInner {
    fn replay(&self) -> Vec<&'static str> {
        let mut state = self.state.lock();
        for (index, contract) in self.required.iter().enumerate() {
            for entry in self.runtime.registry().entries(*contract) {
                state.sets[index].insert(entry);
            }
            if !state.sets[index].is_empty() {
                state.mask.set(index);
            }
        }
        self.missing_names(&state)
    }

    fn provider_added(&self, entry: &ProviderEntry) {
        let Some(&index) = self.index.get(&entry.contract()) else {
            return;
        };
        {
            let mut state = self.state.lock();
            if state.closed || !self.still_registered(entry) {
                return;
            }
            state.sets[index].insert(entry.clone());
            if !state.mask.set(index) {
                return;
            }
            self.on_contract_satisfied(&state, index);
        }
        self.drive();
    }

    fn provider_removed(&self, entry: &ProviderEntry) {
        let Some(&index) = self.index.get(&entry.contract()) else {
            return;
        };
        {
            let mut state = self.state.lock();
            if state.closed || state.sets[index].remove(entry.id()).is_none() {
                return;
            }
            let lost_capture = self.mode == BindingMode::Captured
                && matches!(
                    state.phase,
                    LifecycleState::Starting | LifecycleState::Started
                )
                && state.captured.contains(&entry.id());
            if lost_capture {
                state.restart_pending = true;
            }
            let edge = state.sets[index].is_empty() && state.mask.clear(index);
            if edge {
                self.on_contract_unsatisfied(&state, index);
            }
            if !edge && !lost_capture {
                return;
            }
        }
        self.drive();
    }

    fn on_contract_satisfied(&self, state: &CoordinatorState, index: usize) {
        debug!(
            target: TARGET_LIFECYCLE,
            component = %self.name,
            contract = %self.required[index],
            state = state.phase.as_str(),
            missing = ?self.missing_names(state),
            "required contract satisfied"
        );
    }

    fn on_contract_unsatisfied(&self, state: &CoordinatorState, index: usize) {
        debug!(
            target: TARGET_LIFECYCLE,
            component = %self.name,
            contract = %self.required[index],
            state = state.phase.as_str(),
            missing = ?self.missing_names(state),
            "required contract lost"
        );
    }

    fn still_registered(&self, entry: &ProviderEntry) -> bool {
        self.runtime
            .registry()
            .snapshot(entry.contract())
            .is_some_and(|snapshot| snapshot.contains(entry.id()))
    }

    /// 驱动循环：在锁内决定下一步，在锁外执行钩子，直到无事可做或已有其他驱动者。
    fn drive(&self) {
        loop {
            let step = {
                let mut state = self.state.lock();
                if state.driving {
                    return;
                }
                match self.next_step(&mut state) {
                    Some(step) => {
                        state.driving = true;
                        step
                    }
                    None => return,
                }
            };
            let _driving = DrivingGuard { state: &self.state };
            match step {
                Step::Start(bindings) => self.run_start(bindings),
                Step::Stop => self.run_stop(),
            }
        }
    }

    fn next_step(&self, state: &mut CoordinatorState) -> Option<Step> {
        if state.closed {
            if state.phase == LifecycleState::Started {
                state.phase = LifecycleState::Stopping;
                return Some(Step::Stop);
            }
            if !state.released {
                state.sets.iter_mut().for_each(CapabilitySet::clear);
                state.mask.reset();
                state.captured.clear();
                state.restart_pending = false;
                state.released = true;
            }
            return None;
        }

        match state.phase {
            LifecycleState::Stopped if state.mask.is_full() => {
                let bindings: Vec<(ContractKey, ProviderEntry)> = self
                    .required
                    .iter()
                    .zip(&state.sets)
                    .filter_map(|(contract, set)| set.best().map(|entry| (*contract, entry.clone())))
                    .collect();
                state.captured = bindings.iter().map(|(_, entry)| entry.id()).collect();
                state.restart_pending = false;
                state.phase = LifecycleState::Starting;
                Some(Step::Start(bindings))
            }
            LifecycleState::Started if !state.mask.is_full() || state.restart_pending => {
                state.restart_pending = false;
                state.phase = LifecycleState::Stopping;
                Some(Step::Stop)
            }
            _ => None,
        }
    }

    fn run_start(&self, bindings: Vec<(ContractKey, ProviderEntry)>) {
        debug!(
            target: TARGET_LIFECYCLE,
            component = %self.name,
            state = LifecycleState::Starting.as_str(),
            "starting component"
        );
        let context = StartContext::new(&self.name, &bindings, &self.runtime);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.component.start(&context)));
        match outcome {
            Ok(Ok(())) => {
                self.latch.arm();
                self.set_phase(LifecycleState::Started);
                info!(
                    target: TARGET_LIFECYCLE,
                    component = %self.name,
                    state = LifecycleState::Started.as_str(),
                    "component started"
                );
            }
            Ok(Err(err)) => self.fail_start(cause_chain(&err)),
            Err(payload) => {
                self.fail_start(panic_message(payload.as_ref()));
                panic::resume_unwind(payload);
            }
        }
    }

    /// 启动失败：回滚一次 `stop`，进入终态并请求强制关闭。
    fn fail_start(&self, cause: String) {
        self.set_phase(LifecycleState::StoppingOnError);
        error!(
            target: TARGET_LIFECYCLE,
            component = %self.name,
            state = LifecycleState::StoppingOnError.as_str(),
            error = %cause,
            "component start failed; rolling back"
        );

        match panic::catch_unwind(AssertUnwindSafe(|| self.component.stop())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                target: TARGET_LIFECYCLE,
                component = %self.name,
                error = %cause_chain(&err),
                "rollback stop after failed start reported an error"
            ),
            Err(payload) => warn!(
                target: TARGET_LIFECYCLE,
                component = %self.name,
                error = %panic_message(payload.as_ref()),
                "rollback stop after failed start panicked"
            ),
        }

        self.set_phase(LifecycleState::Failed);
        self.request_forced_shutdown(cause);
    }

    fn run_stop(&self) {
        if self.latch.take() {
            match panic::catch_unwind(AssertUnwindSafe(|| self.component.stop())) {
                Ok(Ok(())) => info!(
                    target: TARGET_LIFECYCLE,
                    component = %self.name,
                    state = LifecycleState::Stopped.as_str(),
                    "component stopped"
                ),
                Ok(Err(err)) => warn!(
                    target: TARGET_LIFECYCLE,
                    component = %self.name,
                    error = %cause_chain(&err),
                    "component stop reported an error"
                ),
                Err(payload) => {
                    self.set_phase(LifecycleState::Stopped);
                    panic::resume_unwind(payload);
                }
            }
        }
        self.set_phase(LifecycleState::Stopped);
    }

    /// 请求宿主关闭承载失败组件的模块。
    ///
    /// 失败总是发生在事件分发或挂载调用栈上，回调一律转交以配置命名的独立线程执行；
    /// 仅当线程创建失败时才退回当前线程同步执行。
    fn request_forced_shutdown(&self, cause: String) {
        let Some(hook) = self.shutdown_hook.clone() else {
            warn!(
                target: TARGET_LIFECYCLE,
                component = %self.name,
                "start failed and no shutdown hook is installed; component stays failed"
            );
            return;
        };
        let notice = ForcedShutdown {
            component: self.name.clone(),
            cause,
        };

        let detached_hook = Arc::clone(&hook);
        let detached_notice = notice.clone();
        let spawned = thread::Builder::new()
            .name(self.runtime.config().forced_shutdown_thread.clone())
            .spawn(move || detached_hook.force_shutdown(&detached_notice));
        if let Err(err) = spawned {
            warn!(
                target: TARGET_LIFECYCLE,
                component = %self.name,
                error = %err,
                "failed to spawn forced shutdown thread; running inline"
            );
            hook.force_shutdown(&notice);
        }
    }

    fn set_phase(&self, phase: LifecycleState) {
        self.state.lock().phase = phase;
    }

    fn missing_locked(&self, state: &CoordinatorState) -> Vec<ContractKey> {
        state
            .mask
            .missing_indices()
            .into_iter()
            .map(|index| self.required[index])
            .collect()
    }

    fn missing_names(&self, state: &CoordinatorState) -> Vec<&'static str> {
        self.missing_locked(state)
            .into_iter()
            .map(|contract| contract.name())
            .collect()
    }
}

struct DrivingGuard<'a> {
    state: &'a Mutex<CoordinatorState>,
}

impl Drop for DrivingGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().driving = false;
    }
}

struct CoordinatorListener {
    inner: Weak<CoordinatorInner>,
}

impl CapabilityListener for CoordinatorListener {
    fn capability_added(&self, entry: &ProviderEntry) {
        if let Some(inner) = self.inner.upgrade() {
            inner.provider_added(entry);
        }
    }

    fn capability_removed(&self, entry: &ProviderEntry) {
        if let Some(inner) = self.inner.upgrade() {
            inner.provider_removed(entry);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "hook panicked with a non-string payload".to_string()
    }
}
