//! 日志目标与字段约定。
//!
//! 教案式说明（Why）：能力层的日志会被宿主按目标过滤（例如只打开生命周期的 DEBUG），因此目标名集中为常量，
//! 由各模块在 `tracing` 宏的 `target:` 参数中引用。
//!
//! 契约定义（What）：结构化字段统一使用下列键名，告警平台可据此解析：
//! - `component`：协调器名称；
//! - `contract`：契约类型名；
//! - `provider_id`、`priority`：提供者序列号与优先级；
//! - `state`：生命周期状态；
//! - `missing`：尚未满足的契约列表；
//! - `error`：错误及其完整因果链。

/// 注册表与提供者增删。
pub const TARGET_REGISTRY: &str = "spark_capability::registry";

/// 协调器状态迁移与钩子执行。
pub const TARGET_LIFECYCLE: &str = "spark_capability::lifecycle";

/// 等待层解析。
pub const TARGET_WAITING: &str = "spark_capability::waiting";

/// 运行时事件分发与关闭。
pub const TARGET_RUNTIME: &str = "spark_capability::runtime";
