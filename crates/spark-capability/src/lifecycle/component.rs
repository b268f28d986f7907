//! 组件钩子与启动上下文。
//!
//! # 设计背景（Why）
//! - 协调器只关心“何时调用 `start`/`stop`”，组件则只关心“启动时能拿到哪些依赖”；
//! - [`StartContext`] 把二者衔接起来：`start` 通过它取用本次启动绑定的提供者，而不必回头查询全局状态。
//!
//! # 契约说明（What）
//! - `start` 返回 `Err` 时协调器进入 `Failed`，回滚调用一次 `stop` 后请求强制关闭；
//! - `start`/`stop` 可能在任意发布/撤回能力的线程上执行，但同一协调器的钩子永不并发。

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use crate::contract::ContractKey;
use crate::error::ComponentError;
use crate::provider::ProviderEntry;
use crate::runtime::CapabilityRuntime;

/// 被协调器托管的组件。
pub trait Component: Send + Sync + 'static {
    /// 全部必需契约满足后调用。
    fn start(&self, context: &StartContext<'_>) -> Result<(), ComponentError>;

    /// 必需契约不再全部满足、协调器关闭或启动回滚时调用。
    fn stop(&self) -> Result<(), ComponentError>;
}

/// `start` 期间可见的绑定信息。
pub struct StartContext<'a> {
    component: &'a str,
    bindings: &'a [(ContractKey, ProviderEntry)],
    runtime: &'a CapabilityRuntime,
}

impl<'a> StartContext<'a> {
    pub(crate) fn new(
        component: &'a str,
        bindings: &'a [(ContractKey, ProviderEntry)],
        runtime: &'a CapabilityRuntime,
    ) -> Self {
        Self {
            component,
            bindings,
            runtime,
        }
    }

    /// 协调器名称。
    pub fn component_name(&self) -> &str {
        self.component
    }

    /// 本次启动绑定的必需契约 `T` 的提供者。
    ///
    /// - **契约 (What)**：`T` 不在必需列表中时返回 [`ComponentError::Unbound`]。
    pub fn required<T>(&self) -> Result<Arc<T>, ComponentError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let contract = ContractKey::of::<T>();
        self.bindings
            .iter()
            .find(|(key, _)| *key == contract)
            .and_then(|(_, entry)| entry.downcast::<T>())
            .ok_or(ComponentError::Unbound {
                contract: contract.name(),
            })
    }

    /// 可选依赖：必需契约返回绑定实例，其余契约返回注册表当前最佳实例（不阻塞）。
    pub fn optional<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.required::<T>()
            .ok()
            .or_else(|| self.runtime.best::<T>())
    }

    /// 所属运行时，供组件在启动时订阅或发布其他能力。
    pub fn runtime(&self) -> &CapabilityRuntime {
        self.runtime
    }
}

impl fmt::Debug for StartContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartContext")
            .field("component", &self.component)
            .field(
                "bindings",
                &self
                    .bindings
                    .iter()
                    .map(|(_, entry)| entry)
                    .collect::<alloc::vec::Vec<_>>(),
            )
            .finish()
    }
}

/// 以闭包实现的组件。
pub struct FnComponent<S, P> {
    start: S,
    stop: P,
}

/// 由 `start`/`stop` 闭包构造组件。
pub fn component_fn<S, P>(start: S, stop: P) -> FnComponent<S, P>
where
    S: Fn(&StartContext<'_>) -> Result<(), ComponentError> + Send + Sync + 'static,
    P: Fn() -> Result<(), ComponentError> + Send + Sync + 'static,
{
    FnComponent { start, stop }
}

impl<S, P> Component for FnComponent<S, P>
where
    S: Fn(&StartContext<'_>) -> Result<(), ComponentError> + Send + Sync + 'static,
    P: Fn() -> Result<(), ComponentError> + Send + Sync + 'static,
{
    fn start(&self, context: &StartContext<'_>) -> Result<(), ComponentError> {
        (self.start)(context)
    }

    fn stop(&self) -> Result<(), ComponentError> {
        (self.stop)()
    }
}

/// 启动失败后的强制关闭通知。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForcedShutdown {
    /// 失败的协调器名称。
    pub component: String,
    /// 失败原因（完整因果链）。
    pub cause: String,
}

/// 宿主提供的强制关闭回调，通常用于卸载承载失败组件的模块。
///
/// # 教案式说明
/// - **意图 (Why)**：启动失败意味着组件处于不可恢复状态，需要宿主介入；
/// - **契约 (What)**：回调总在以 `RuntimeConfig::forced_shutdown_thread` 命名的独立线程上执行，
///   宿主可以在回调中重入运行时（撤回能力、卸载模块）而不会与通知线程互相等待；
/// - **风险 (Trade-offs)**：回调执行时机与触发点解耦，调用方不能假设回调已同步完成。
pub trait ShutdownHook: Send + Sync + 'static {
    fn force_shutdown(&self, notice: &ForcedShutdown);
}

impl<F> ShutdownHook for F
where
    F: Fn(&ForcedShutdown) + Send + Sync + 'static,
{
    fn force_shutdown(&self, notice: &ForcedShutdown) {
        self(notice)
    }
}
