//! # CapabilityRuntime：宿主边界与事件扇出
//!
//! ## 核心意图（Why）
//! - 宿主（模块加载器）只需要告诉我们“某能力出现了”“某能力消失了”；运行时把这两类通知
//!   同时送进注册表（更新最佳选择）与全部监听者（协调器据此更新位图并驱动启停）；
//! - 取代进程级全局注册表：运行时由调用方显式构造并按引用传递，测试中可以并存多个互不干扰的实例。
//!
//! ## 行为契约（What）
//! - `publish` 先更新注册表，再向订阅快照中的监听者广播；`withdraw` 同理。因此订阅之后再读取注册表
//!   的监听者不会漏掉任何提供者（见协调器的重放逻辑）；
//! - 监听者列表使用写时复制快照，广播期间不持有任何锁，监听者可以在回调中重入地发布或撤回能力；
//! - 关闭标记一经置位不可撤销，等待层随即失效；发布与撤回在关闭期间仍然可用，便于各模块有序退场。
//!
//! ## 风险提示（Trade-offs）
//! - 回调在通知线程上同步执行，耗时回调会拖慢宿主的通知线程；
//! - 监听者回调中的 panic 会中断本次广播并向宿主传播。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::contract::ContractKey;
use crate::error::{CapabilityError, ConfigurationError};
use crate::observability::TARGET_RUNTIME;
use crate::provider::{ProviderEntry, ProviderHandle};
use crate::registry::CapabilityRegistry;
use crate::snapshot::SnapshotCell;
use crate::waiting::CapabilityProxy;

/// 提供者增删事件的订阅者。
///
/// - **契约 (What)**：同一提供者的 `added` 一定先于其 `removed` 送达；回调可能在任意线程并发执行，
///   实现者需自行保证内部同步。
pub trait CapabilityListener: Send + Sync {
    /// 新提供者已进入注册表。
    fn capability_added(&self, entry: &ProviderEntry);

    /// 提供者已离开注册表。
    fn capability_removed(&self, entry: &ProviderEntry);
}

/// 订阅标识，用于取消订阅。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct ListenerSlot {
    id: ListenerId,
    listener: Arc<dyn CapabilityListener>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    registry: CapabilityRegistry,
    listeners: SnapshotCell<Vec<ListenerSlot>>,
    listeners_write: Mutex<()>,
    next_listener: AtomicU64,
    shutdown: AtomicBool,
}

/// 能力运行时。克隆得到的是同一实例的新引用。
///
/// # 教案式注释
/// - **意图 (Why)**：集中持有注册表、订阅者与关闭标记，作为宿主与消费方之间唯一的协作点；
/// - **契约 (What)**：
///   - [`CapabilityRuntime::publish`]/[`CapabilityRuntime::withdraw`] 对应宿主的“能力出现/消失”通知；
///   - [`CapabilityRuntime::resolve`] 构造等待层句柄；
///   - [`CapabilityRuntime::begin_shutdown`] 置位关闭标记并唤醒所有等待者。
#[derive(Clone)]
pub struct CapabilityRuntime {
    inner: Arc<RuntimeInner>,
}

impl Default for CapabilityRuntime {
    fn default() -> Self {
        Self::build(RuntimeConfig::default())
    }
}

impl CapabilityRuntime {
    /// 以校验过的配置构造运行时。
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                registry: CapabilityRegistry::new(),
                listeners: SnapshotCell::new(Vec::new()),
                listeners_write: Mutex::new(()),
                next_listener: AtomicU64::new(1),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// 运行时配置。
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// 底层注册表（只读查询）。
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.inner.registry
    }

    /// 宿主通知：契约 `T` 的新实例出现。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：注册进注册表后，依次通知当前订阅快照中的监听者。
    /// - **契约 (What)**：返回的句柄用于之后的 [`CapabilityRuntime::withdraw`]；实例所有权仍归发布方。
    pub fn publish<T>(&self, instance: Arc<T>, priority: i32) -> ProviderHandle
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (entry, _) = self.inner.registry.register_entry(instance, priority);
        self.dispatch(|listener| listener.capability_added(&entry));
        entry.handle()
    }

    /// 以配置中的默认优先级发布。
    pub fn publish_default<T>(&self, instance: Arc<T>) -> ProviderHandle
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.publish(instance, self.inner.config.default_priority)
    }

    /// 宿主通知：句柄对应的实例消失。返回是否确实撤回了某个提供者。
    pub fn withdraw(&self, handle: ProviderHandle) -> bool {
        match self.inner.registry.unregister_entry(handle) {
            Some((entry, _)) => {
                self.dispatch(|listener| listener.capability_removed(&entry));
                true
            }
            None => false,
        }
    }

    /// 宿主通知的实例形式：按实例身份撤回。
    pub fn withdraw_instance<T>(&self, instance: &Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        match self.inner.registry.find(instance) {
            Some(handle) => self.withdraw(handle),
            None => false,
        }
    }

    /// 订阅提供者增删事件。
    pub fn subscribe(&self, listener: Arc<dyn CapabilityListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let _write = self.inner.listeners_write.lock();
        let mut next = (*self.inner.listeners.load()).clone();
        next.push(ListenerSlot { id, listener });
        self.inner.listeners.publish(next);
        id
    }

    /// 取消订阅；返回是否存在该订阅。
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let _write = self.inner.listeners_write.lock();
        let current = self.inner.listeners.load();
        if !current.iter().any(|slot| slot.id == id) {
            return false;
        }
        let next = current
            .iter()
            .filter(|slot| slot.id != id)
            .cloned()
            .collect();
        self.inner.listeners.publish(next);
        true
    }

    /// 当前订阅者数量。
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.load().len()
    }

    /// 契约 `T` 的当前最佳实例（不阻塞）。
    pub fn best<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.registry.best::<T>()
    }

    /// 契约 `T` 的全部实例。
    pub fn all<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.registry.all::<T>()
    }

    /// 契约当前是否存在提供者。
    pub fn is_active(&self, contract: ContractKey) -> bool {
        self.inner.registry.has_provider(contract)
    }

    /// 为契约 `T` 构造等待层句柄，宽限期取自配置。
    ///
    /// - **契约 (What)**：运行时已进入关闭时立即返回 [`CapabilityError::ShuttingDown`]。
    pub fn resolve<T>(&self) -> Result<CapabilityProxy<T>, CapabilityError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve_with_grace(self.inner.config.grace_period())
    }

    /// 以指定宽限期构造等待层句柄。
    pub fn resolve_with_grace<T>(&self, grace: Duration) -> Result<CapabilityProxy<T>, CapabilityError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.is_shutting_down() {
            return Err(CapabilityError::ShuttingDown {
                contract: ContractKey::of::<T>().name(),
            });
        }
        Ok(CapabilityProxy::new(self.clone(), grace))
    }

    /// 进入关闭：置位关闭标记并唤醒全部等待者。仅首次调用返回 `true`。
    pub fn begin_shutdown(&self) -> bool {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!(target: TARGET_RUNTIME, "capability runtime shutting down; resolutions now fail fast");
        self.inner.registry.signal_arrival();
        true
    }

    /// 关闭标记是否已置位。
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_flag(&self) -> &AtomicBool {
        &self.inner.shutdown
    }

    fn dispatch(&self, deliver: impl Fn(&dyn CapabilityListener)) {
        let listeners = self.inner.listeners.load();
        debug!(
            target: TARGET_RUNTIME,
            listeners = listeners.len(),
            "dispatching capability event"
        );
        for slot in listeners.iter() {
            deliver(slot.listener.as_ref());
        }
    }
}

impl core::fmt::Debug for CapabilityRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CapabilityRuntime")
            .field("registry", &self.inner.registry)
            .field("listeners", &self.listener_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
