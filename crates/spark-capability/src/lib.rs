#![deny(unsafe_code)]
#![doc = "spark-capability: 动态能力注册表与组件生命周期协调器。"]
#![doc = ""]
#![doc = "== 角色定位 =="]
#![doc = "独立加载的模块在任意时刻发布或撤回能力（某契约的实现）；消费方声明启动前必需的能力集合，由本 crate 依据依赖的出现与消失驱动组件的启停。"]
#![doc = "同一契约的多个提供者按优先级排序，同优先级时先注册者胜出。"]
#![doc = ""]
#![doc = "== 组成 =="]
#![doc = "1. [`CapabilitySet`] 与 [`CapabilityRegistry`]：排名提供者集合与按契约分组的注册表；"]
#![doc = "2. [`CapabilityRuntime`]：宿主边界，负责发布/撤回、事件扇出与关闭标记；"]
#![doc = "3. [`AvailabilityCoordinator`]：必需契约全部满足时启动、不再满足时停止的状态机；"]
#![doc = "4. [`CapabilityProxy`]：按需解析当前最佳提供者的等待层；"]
#![doc = "5. [`DependentPublisher`]：依赖就绪后构造并发布下游能力。"]

extern crate alloc;

pub mod capability_set;
pub mod config;
pub mod contract;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod provider;
pub mod publisher;
pub mod registry;
pub mod runtime;
mod snapshot;
pub mod waiting;

pub use capability_set::{BestChange, CapabilitySet};
pub use config::RuntimeConfig;
pub use contract::{ContractKey, DEFAULT_PRIORITY};
pub use error::{CapabilityError, ComponentError, ConfigurationError, cause_chain};
pub use lifecycle::{
    AvailabilityCoordinator, BindingMode, Component, CoordinatorBuilder, CoordinatorSnapshot,
    FnComponent, ForcedShutdown, LifecycleState, ShutdownHook, StartContext, component_fn,
};
pub use provider::{ProviderEntry, ProviderHandle, ProviderId};
pub use publisher::{DependentPublisher, PublisherBuilder};
pub use registry::{CapabilityRegistry, ContractStats};
pub use runtime::{CapabilityListener, CapabilityRuntime, ListenerId};
pub use waiting::CapabilityProxy;
