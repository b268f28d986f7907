//! 能力提供者条目与句柄。
//!
//! # 设计背景（Why）
//! - 注册表需要在不知道具体 Trait 的前提下保存实例，并在读取时按契约类型还原；
//! - 排序规则（优先级降序、序列号升序）是整个 crate 的公共语言，集中在此定义。
//!
//! # 逻辑解析（How）
//! - 实例以 `Arc<T>` 的形式装箱为 `dyn Any`，读取时 `downcast_ref::<Arc<T>>()` 后克隆；
//! - 条目本身是 `Arc` 包装的不可变值，克隆只增加引用计数。
//!
//! # 契约说明（What）
//! - 注册表仅为选择目的持有实例引用；条目被移除且所有快照释放后，实例的最后一个引用回到发布方。

use alloc::sync::Arc;
use core::any::Any;
use core::cmp::{Ordering, Reverse};
use core::fmt;

use crate::contract::ContractKey;

/// 注册时分配的单调序列号，同优先级下序列号较小者胜出。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderId(u64);

impl ProviderId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 原始序列值。
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 注册成功后返回给发布方的句柄，用于之后撤回。
///
/// - **契约 (What)**：句柄只在签发它的注册表内有意义；撤回后再次使用是无害的空操作。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProviderHandle {
    contract: ContractKey,
    id: ProviderId,
}

impl ProviderHandle {
    pub(crate) const fn new(contract: ContractKey, id: ProviderId) -> Self {
        Self { contract, id }
    }

    /// 句柄所属的契约。
    pub fn contract(&self) -> ContractKey {
        self.contract
    }

    /// 句柄对应的序列号。
    pub fn id(&self) -> ProviderId {
        self.id
    }
}

/// 某契约下的一个存活提供者。
///
/// # 教案式说明
/// - **意图 (Why)**：在注册表、协调器与等待层之间传递“哪个实例、什么优先级、何时注册”。
/// - **逻辑 (How)**：内部 `Arc<EntryInner>` 使克隆廉价；`instance` 保存 `Arc<T>` 的擦除形态，
///   `addr` 记录数据指针以支持按实例身份查找。
/// - **契约 (What)**：[`ProviderEntry::downcast`] 仅在 `T` 与注册时的契约类型一致时返回 `Some`。
#[derive(Clone)]
pub struct ProviderEntry {
    inner: Arc<EntryInner>,
}

struct EntryInner {
    id: ProviderId,
    contract: ContractKey,
    priority: i32,
    addr: usize,
    instance: Box<dyn Any + Send + Sync>,
}

impl ProviderEntry {
    pub(crate) fn new<T>(id: ProviderId, instance: Arc<T>, priority: i32) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let addr = instance_addr(&instance);
        Self {
            inner: Arc::new(EntryInner {
                id,
                contract: ContractKey::of::<T>(),
                priority,
                addr,
                instance: Box::new(instance),
            }),
        }
    }

    /// 注册序列号。
    pub fn id(&self) -> ProviderId {
        self.inner.id
    }

    /// 所属契约。
    pub fn contract(&self) -> ContractKey {
        self.inner.contract
    }

    /// 优先级，数值越大越优先。
    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    /// 对应的撤回句柄。
    pub fn handle(&self) -> ProviderHandle {
        ProviderHandle::new(self.inner.contract, self.inner.id)
    }

    /// 以契约类型 `T` 取回实例。
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.instance.downcast_ref::<Arc<T>>().cloned()
    }

    /// 判断条目是否承载给定实例（按数据指针比较）。
    pub fn holds<T: ?Sized>(&self, instance: &Arc<T>) -> bool {
        self.inner.addr == instance_addr(instance)
    }

    /// 排序键：优先级降序，其次序列号升序。
    pub(crate) fn rank_key(&self) -> (Reverse<i32>, ProviderId) {
        (Reverse(self.inner.priority), self.inner.id)
    }

    /// 当前条目是否排在 `other` 之前。
    pub fn outranks(&self, other: &ProviderEntry) -> bool {
        self.rank_cmp(other) == Ordering::Less
    }

    pub(crate) fn rank_cmp(&self, other: &ProviderEntry) -> Ordering {
        self.rank_key().cmp(&other.rank_key())
    }
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.inner.id)
            .field("contract", &self.inner.contract)
            .field("priority", &self.inner.priority)
            .finish()
    }
}

fn instance_addr<T: ?Sized>(instance: &Arc<T>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}
