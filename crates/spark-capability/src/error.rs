//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义能力注册与生命周期协调对外暴露的错误语义；
//! - 区分“配置错误（不可重试）”“能力暂不可用（可重试）”“运行时关闭（终态）”三类，帮助调用方决定重试策略。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - [`CapabilityError::code`] 返回稳定错误码，用于日志与告警维度；
//! - 生命周期钩子的失败使用 [`ComponentError`] 表达，不会直接返回给任意调用方，而是通过日志、
//!   协调器状态与强制关闭回调体现。

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use core::fmt::Write as _;
use core::time::Duration;
use std::error::Error as StdError;

use thiserror::Error;

/// 能力层对调用方返回的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// 协调器或运行时配置非法，初始化阶段即失败，不应重试。
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// 等待宽限期内没有任何提供者出现。
    ///
    /// - **契约 (What)**：`waited` 为实际等待时长；调用方可自行决定是否重试。
    #[error("no provider for `{contract}` became available within {waited:?}")]
    Unavailable {
        contract: &'static str,
        waited: Duration,
    },

    /// 运行时已开始关闭，所有解析请求立即失败。
    #[error("capability runtime is shutting down; `{contract}` can no longer be resolved")]
    ShuttingDown { contract: &'static str },
}

impl CapabilityError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            CapabilityError::Configuration(ConfigurationError::DuplicateContract { .. }) => {
                "capability.config.duplicate_contract"
            }
            CapabilityError::Configuration(ConfigurationError::InvalidValue { .. }) => {
                "capability.config.invalid_value"
            }
            CapabilityError::Unavailable { .. } => "capability.unavailable",
            CapabilityError::ShuttingDown { .. } => "capability.shutting_down",
        }
    }

    /// 调用方是否值得重试。
    ///
    /// - `Unavailable` 是暂时性的；配置错误与关闭都是终态。
    pub fn is_retryable(&self) -> bool {
        matches!(self, CapabilityError::Unavailable { .. })
    }
}

/// 配置阶段的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// 同一组件的必需契约列表中出现重复项。
    #[error("component `{component}` declares required contract `{contract}` more than once")]
    DuplicateContract {
        component: String,
        contract: &'static str,
    },

    /// 运行时配置项取值非法或无法解析。
    #[error("invalid runtime configuration `{key}`: {detail}")]
    InvalidValue { key: String, detail: String },
}

/// 生命周期钩子（`start`/`stop`/构造器）返回的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：钩子内部失败原因千差万别，需要一个既能携带上下文又能保留底层错误链的统一类型。
/// - **契约 (What)**：`Failed` 的 `source` 会在日志中按因果链逐层展开，见 [`cause_chain`]。
#[derive(Debug, Error)]
pub enum ComponentError {
    /// 启动上下文中找不到必需契约的绑定实例。
    #[error("required capability `{contract}` is not bound")]
    Unbound { contract: &'static str },

    /// 钩子执行失败。
    #[error("{context}")]
    Failed {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    },
}

impl ComponentError {
    /// 仅携带描述的失败。
    pub fn msg(context: impl Into<String>) -> Self {
        ComponentError::Failed {
            context: context.into(),
            source: None,
        }
    }

    /// 携带底层错误的失败。
    pub fn with_source<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ComponentError::Failed {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// 将错误及其 `source()` 链拼接为单行文本，格式为 `outer: inner: root`。
pub fn cause_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        let _ = write!(rendered, ": {cause}");
        current = cause.source();
    }
    rendered
}
