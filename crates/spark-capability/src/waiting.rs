//! 等待层：按需解析到当前最佳提供者的转发句柄。
//!
//! # 设计背景（Why）
//! - 请求处理代码经常在依赖尚未就绪（或正被替换）时就需要调用能力；让每个调用点自行“查找、判空、重试”
//!   会把竞态处理散落到各处；
//! - [`CapabilityProxy`] 把“每次调用前重新解析、缺席时短暂等待、关闭后立即失败”收敛为一个显式的
//!   `acquire` / `call` 模式，不依赖反射式动态代理。
//!
//! # 契约说明（What）
//! - 每次调用都重新读取注册表的最佳提供者，并在整次调用中使用这一次捕获到的实例（调用中途到达的更高优先级
//!   提供者只影响后续调用）；
//! - 无提供者时最多阻塞一个宽限期，之后返回 [`CapabilityError::Unavailable`]；
//! - 运行时关闭后立即返回 [`CapabilityError::ShuttingDown`]，且绝不阻塞；阻塞中的调用也会被唤醒并失败。

use alloc::sync::Arc;
use core::fmt;
use core::marker::PhantomData;
use core::time::Duration;

use tracing::{debug, warn};

use crate::contract::ContractKey;
use crate::error::CapabilityError;
use crate::observability::TARGET_WAITING;
use crate::runtime::CapabilityRuntime;

/// 契约 `T` 的等待层句柄。
pub struct CapabilityProxy<T: ?Sized> {
    runtime: CapabilityRuntime,
    contract: ContractKey,
    grace: Duration,
    _contract: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> Clone for CapabilityProxy<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            contract: self.contract,
            grace: self.grace,
            _contract: PhantomData,
        }
    }
}

impl<T: ?Sized> fmt::Debug for CapabilityProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProxy")
            .field("contract", &self.contract)
            .field("grace", &self.grace)
            .finish()
    }
}

impl<T> CapabilityProxy<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    pub(crate) fn new(runtime: CapabilityRuntime, grace: Duration) -> Self {
        Self {
            runtime,
            contract: ContractKey::of::<T>(),
            grace,
            _contract: PhantomData,
        }
    }

    /// 句柄所代理的契约。
    pub fn contract(&self) -> ContractKey {
        self.contract
    }

    /// 当前宽限期。
    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// 覆盖宽限期。
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// 解析当前最佳实例，必要时在宽限期内等待。
    ///
    /// # 教案式说明
    /// - **逻辑 (How)**：委托注册表的 `wait_for_best`，后者在到达信号上条件等待；
    /// - **契约 (What)**：成功时返回的 `Arc<T>` 即本次调用捕获的实例，调用方持有期间不会被替换。
    pub fn acquire(&self) -> Result<Arc<T>, CapabilityError> {
        let outcome = self.runtime.registry().wait_for_best(
            self.contract,
            self.grace,
            self.runtime.shutdown_flag(),
        );
        let entry = match outcome {
            Ok(entry) => entry,
            Err(err) => {
                self.log_failure(&err);
                return Err(err);
            }
        };
        entry.downcast::<T>().ok_or(CapabilityError::Unavailable {
            contract: self.contract.name(),
            waited: Duration::ZERO,
        })
    }

    /// 不阻塞地解析：无提供者时返回 `Ok(None)`，关闭后返回错误。
    pub fn try_acquire(&self) -> Result<Option<Arc<T>>, CapabilityError> {
        if self.runtime.is_shutting_down() {
            return Err(CapabilityError::ShuttingDown {
                contract: self.contract.name(),
            });
        }
        Ok(self.runtime.best::<T>())
    }

    /// 解析一次并以捕获的实例执行 `operation`。
    pub fn call<R>(&self, operation: impl FnOnce(&T) -> R) -> Result<R, CapabilityError> {
        let captured = self.acquire()?;
        Ok(operation(&captured))
    }

    /// 当前是否存在该契约的提供者。
    pub fn is_active(&self) -> bool {
        self.runtime.is_active(self.contract)
    }

    fn log_failure(&self, err: &CapabilityError) {
        match err {
            CapabilityError::Unavailable { waited, .. } => warn!(
                target: TARGET_WAITING,
                contract = %self.contract,
                waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                "capability unavailable after grace period"
            ),
            CapabilityError::ShuttingDown { .. } => debug!(
                target: TARGET_WAITING,
                contract = %self.contract,
                "capability resolution rejected during shutdown"
            ),
            CapabilityError::Configuration(_) => {}
        }
    }
}
