//! # DependentPublisher：依赖就绪后构造并发布下游能力
//!
//! ## 核心意图（Why）
//! - 常见模式是“拿到 N 个上游能力后构造一个下游能力并发布出去”，上游任一绑定实例消失时必须撤回
//!   下游能力，上游恢复后再以新实例重建；
//! - 该模式在 [`AvailabilityCoordinator`] 的 `Captured` 绑定模式之上实现，沿用其“每条边沿恰好一次”的保证。
//!
//! ## 行为契约（What）
//! - 构造器在每次上升沿恰好调用一次，入参是当时各契约最佳提供者的新鲜快照；
//! - 任一被绑定的上游实例离开（即使同契约仍有替代者）都会撤回已发布的实例、调用拆除回调，随后在依赖
//!   仍满足时以替代者重新构造；
//! - 构造器返回错误时协调器进入 `Failed`，不会自动重试。

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::contract::ContractKey;
use crate::error::{CapabilityError, ComponentError};
use crate::lifecycle::{
    AvailabilityCoordinator, BindingMode, Component, ShutdownHook, StartContext,
};
use crate::provider::ProviderHandle;
use crate::runtime::CapabilityRuntime;

struct Publication<D: ?Sized> {
    current: Mutex<Option<(ProviderHandle, Arc<D>)>>,
    count: AtomicU64,
}

struct PublishingComponent<D: ?Sized, C> {
    constructor: C,
    teardown: Option<Box<dyn Fn(&Arc<D>) + Send + Sync>>,
    priority: i32,
    runtime: CapabilityRuntime,
    publication: Arc<Publication<D>>,
}

impl<D, C> Component for PublishingComponent<D, C>
where
    D: ?Sized + Send + Sync + 'static,
    C: Fn(&StartContext<'_>) -> Result<Arc<D>, ComponentError> + Send + Sync + 'static,
{
    fn start(&self, context: &StartContext<'_>) -> Result<(), ComponentError> {
        let instance = (self.constructor)(context)?;
        let handle = self.runtime.publish(Arc::clone(&instance), self.priority);
        *self.publication.current.lock() = Some((handle, instance));
        self.publication.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        let published = self.publication.current.lock().take();
        if let Some((handle, instance)) = published {
            self.runtime.withdraw(handle);
            if let Some(teardown) = &self.teardown {
                teardown(&instance);
            }
        }
        Ok(())
    }
}

/// [`DependentPublisher`] 的构建器。
pub struct PublisherBuilder<D: ?Sized> {
    name: String,
    required: Vec<ContractKey>,
    priority: Option<i32>,
    teardown: Option<Box<dyn Fn(&Arc<D>) + Send + Sync>>,
    shutdown_hook: Option<Arc<dyn ShutdownHook>>,
}

impl<D> PublisherBuilder<D>
where
    D: ?Sized + Send + Sync + 'static,
{
    /// 追加上游契约 `T`。
    pub fn require<T: ?Sized + 'static>(mut self) -> Self {
        self.required.push(ContractKey::of::<T>());
        self
    }

    /// 发布优先级；缺省取运行时配置的默认优先级。
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// 撤回已发布实例之后调用的拆除回调。
    pub fn teardown(mut self, teardown: impl Fn(&Arc<D>) + Send + Sync + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    /// 构造器失败时请求宿主关闭的回调。
    pub fn shutdown_hook(mut self, hook: impl ShutdownHook) -> Self {
        self.shutdown_hook = Some(Arc::new(hook));
        self
    }

    /// 以构造器挂载到运行时；依赖已全部存在时构造器在本调用内执行。
    pub fn construct<C>(
        self,
        runtime: &CapabilityRuntime,
        constructor: C,
    ) -> Result<DependentPublisher<D>, CapabilityError>
    where
        C: Fn(&StartContext<'_>) -> Result<Arc<D>, ComponentError> + Send + Sync + 'static,
    {
        let publication = Arc::new(Publication {
            current: Mutex::new(None),
            count: AtomicU64::new(0),
        });
        let component = PublishingComponent {
            constructor,
            teardown: self.teardown,
            priority: self
                .priority
                .unwrap_or(runtime.config().default_priority),
            runtime: runtime.clone(),
            publication: Arc::clone(&publication),
        };

        let coordinator = self
            .required
            .into_iter()
            .fold(
                AvailabilityCoordinator::builder(self.name),
                |builder, contract| builder.require_key(contract),
            )
            .binding(BindingMode::Captured)
            .shared_shutdown_hook(self.shutdown_hook)
            .attach(runtime, component)?;

        Ok(DependentPublisher {
            coordinator,
            publication,
        })
    }
}

/// 依赖就绪后构造并发布契约 `D` 的协调器。析构时撤回已发布的实例。
pub struct DependentPublisher<D: ?Sized> {
    coordinator: AvailabilityCoordinator,
    publication: Arc<Publication<D>>,
}

impl<D> DependentPublisher<D>
where
    D: ?Sized + Send + Sync + 'static,
{
    pub fn builder(name: impl Into<String>) -> PublisherBuilder<D> {
        PublisherBuilder {
            name: name.into(),
            required: Vec::new(),
            priority: None,
            teardown: None,
            shutdown_hook: None,
        }
    }

    /// 当前是否有已发布的实例。
    pub fn is_published(&self) -> bool {
        self.publication.current.lock().is_some()
    }

    /// 当前已发布的实例。
    pub fn published(&self) -> Option<Arc<D>> {
        self.publication
            .current
            .lock()
            .as_ref()
            .map(|(_, instance)| Arc::clone(instance))
    }

    /// 累计发布次数。
    pub fn publications(&self) -> u64 {
        self.publication.count.load(Ordering::Acquire)
    }

    /// 底层协调器。
    pub fn coordinator(&self) -> &AvailabilityCoordinator {
        &self.coordinator
    }

    /// 撤回已发布实例并停止响应依赖变化。
    pub fn close(&self) {
        self.coordinator.close();
    }
}

impl<D: ?Sized> fmt::Debug for DependentPublisher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentPublisher")
            .field("coordinator", &self.coordinator)
            .field("publications", &self.publication.count.load(Ordering::Acquire))
            .finish()
    }
}
