//! 能力契约标识。
//!
//! # 设计背景（Why）
//! - 消费方依赖的是“某种能力”，而非某个具体实例；契约标识就是这种能力的名字。
//! - Rust 中最自然的契约载体是 Trait 对象类型（如 `dyn MailStore`），因此以其 [`TypeId`] 作为键，
//!   同时保留类型名用于日志与诊断。
//!
//! # 契约说明（What）
//! - [`ContractKey`] 的相等性与哈希仅由 `TypeId` 决定，类型名只参与展示；
//! - 键一经构造即不可变，可在线程间自由复制。

use core::any::{TypeId, type_name};
use core::fmt;
use core::hash::{Hash, Hasher};

/// 能力优先级的默认值；数值越大越优先。
pub const DEFAULT_PRIORITY: i32 = 0;

/// 能力契约的类型键。
///
/// # 教案式说明
/// - **意图 (Why)**：注册表、协调器、等待层都需要以同一把钥匙定位能力集合。
/// - **逻辑 (How)**：[`ContractKey::of`] 读取 `T` 的 `TypeId` 与类型名；`T` 可以是 `?Sized`，
///   因而 `ContractKey::of::<dyn Trait>()` 是推荐写法。
/// - **契约 (What)**：同一进程内对同一类型多次调用得到相等的键；`name()` 仅供诊断，格式不稳定。
#[derive(Clone, Copy)]
pub struct ContractKey {
    id: TypeId,
    name: &'static str,
}

impl ContractKey {
    /// 为契约类型 `T` 构造键。
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// 契约类型的 `TypeId`。
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// 契约类型名，来自 [`core::any::type_name`]。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 判断键是否对应契约类型 `T`。
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for ContractKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContractKey {}

impl Hash for ContractKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContractKey").field(&self.name).finish()
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
