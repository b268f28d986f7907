//! 运行时配置。
//!
//! # 背景说明（Why）
//! - 等待宽限期、默认优先级等取值需要由宿主按部署环境调整，集中在 [`RuntimeConfig`] 中描述；
//! - 宿主通常以 TOML 片段下发配置，因此提供 [`RuntimeConfig::from_toml_str`] 并在加载时完成校验。
//!
//! # 契约定义（What）
//! - `grace_period_ms`：等待层在“无提供者”时最长阻塞的毫秒数，默认 1000，上限 60000，允许 0（立即失败）；
//! - `default_priority`：`publish_default` 使用的优先级，默认 0；
//! - `forced_shutdown_thread`：异步强制关闭时使用的线程名，不能为空；
//! - 未知字段会被拒绝，避免拼写错误静默生效。

use alloc::string::{String, ToString};
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// 默认宽限期（毫秒）。
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 1_000;

/// 宽限期上限（毫秒）。
pub const MAX_GRACE_PERIOD_MS: u64 = 60_000;

const DEFAULT_SHUTDOWN_THREAD: &str = "spark-capability-shutdown";

/// 能力运行时配置。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// 等待层宽限期（毫秒）。
    pub grace_period_ms: u64,
    /// 默认发布优先级。
    pub default_priority: i32,
    /// 异步强制关闭线程名。
    pub forced_shutdown_thread: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            default_priority: crate::contract::DEFAULT_PRIORITY,
            forced_shutdown_thread: DEFAULT_SHUTDOWN_THREAD.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// 从 TOML 文本解析并校验。
    ///
    /// - **契约 (What)**：缺省字段取默认值；语法错误、未知字段与越界取值均返回
    ///   [`ConfigurationError::InvalidValue`]。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigurationError> {
        let config: RuntimeConfig =
            toml::from_str(source).map_err(|err| ConfigurationError::InvalidValue {
                key: "<document>".to_string(),
                detail: err.message().to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.grace_period_ms > MAX_GRACE_PERIOD_MS {
            return Err(ConfigurationError::InvalidValue {
                key: "grace_period_ms".to_string(),
                detail: alloc::format!(
                    "{} exceeds the maximum of {MAX_GRACE_PERIOD_MS}",
                    self.grace_period_ms
                ),
            });
        }
        if self.forced_shutdown_thread.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "forced_shutdown_thread".to_string(),
                detail: "thread name must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// 宽限期。
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// 以指定宽限期覆盖，常用于测试。
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
