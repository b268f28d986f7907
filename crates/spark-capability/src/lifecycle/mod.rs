//! # 生命周期协调
//!
//! ## 模块角色（Why）
//! - 组件往往声明“我需要 A、B、C 三种能力”，并且只应在三者同时存在时运行；
//! - [`AvailabilityCoordinator`] 跟踪每个必需契约的满足情况，在“全部满足”的边沿调用一次 `start`，
//!   在“不再全部满足”的边沿调用一次 `stop`；
//! - [`DependentPublisher`](crate::publisher::DependentPublisher) 在此之上把“依赖就绪才发布新能力”
//!   固化为模式。
//!
//! ## 子模块
//! - `mask`：满足位图；
//! - `latch`：保证 `stop` 只对成功的 `start` 执行一次的闩锁；
//! - `component`：组件钩子、启动上下文与强制关闭回调；
//! - `coordinator`：状态机本体。

mod component;
mod coordinator;
mod latch;
mod mask;

pub use component::{
    Component, FnComponent, ForcedShutdown, ShutdownHook, StartContext, component_fn,
};
pub use coordinator::{AvailabilityCoordinator, CoordinatorBuilder, CoordinatorSnapshot};
pub use latch::StartedLatch;
pub use mask::SatisfactionMask;

use core::fmt;

/// 协调器生命周期状态。
///
/// 状态迁移：`Stopped → Starting → Started → Stopping → Stopped`；启动失败时
/// `Starting → StoppingOnError → Failed`，`Failed` 为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// 未运行（初始状态，或依赖缺失后已停止）。
    Stopped,
    /// 正在执行 `start` 钩子。
    Starting,
    /// `start` 成功返回。
    Started,
    /// 正在执行 `stop` 钩子。
    Stopping,
    /// `start` 失败后正在回滚。
    StoppingOnError,
    /// 启动失败，协调器不再响应依赖变化。
    Failed,
}

impl LifecycleState {
    /// 稳定的小写名称，用于日志字段。
    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::StoppingOnError => "stopping_on_error",
            LifecycleState::Failed => "failed",
        }
    }

    /// 是否处于终态。
    pub const fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 组件与提供者的绑定方式。
///
/// - `AnyProvider`：只要契约仍有任意提供者，组件就保持运行；提供者的替换对组件透明，
///   组件应通过等待层或 [`AvailabilityCoordinator::get_best`] 按需取用；
/// - `Captured`：组件在 `start` 时捕获当时的最佳提供者，该提供者一旦离开，组件即被停止并在
///   依赖仍满足时以新的提供者重新启动。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BindingMode {
    #[default]
    AnyProvider,
    Captured,
}
