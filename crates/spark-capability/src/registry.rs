//! # 排名提供者注册表（Ranked Provider Registry）
//!
//! ## 核心意图（Why）
//! - 为每个契约维护一个 [`CapabilitySet`]，对外回答“当前最佳提供者是谁”“全部提供者按序是什么”；
//! - 注册与撤回可能来自任意线程，读取则来自无关的工作线程，二者不应互相阻塞。
//!
//! ## 架构定位（Where）
//! - 被 [`CapabilityRuntime`](crate::runtime::CapabilityRuntime) 独占持有，宿主通过运行时发布/撤回；
//! - 等待层借助注册表内的到达信号（`Condvar`）在宽限期内阻塞等待新的提供者。
//!
//! ## 行为契约（What）
//! - 同一契约的写操作在该契约的互斥锁内串行执行，并在锁内以一次原子替换发布完整快照，
//!   读者永远看不到“半更新”的集合；
//! - 读操作（`best`/`all`/`snapshot`）只加载快照指针，不获取任何互斥锁；
//! - 撤回后注册表不再持有实例引用（旧快照被读者释放后即回收）。
//!
//! ## 风险提示（Trade-offs）
//! - 每次写入都会克隆该契约的整个集合；提供者数量通常很小，写入频率远低于读取；
//! - 空集合对应的槽位不会被回收，契约种类有限，常驻开销可忽略。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use core::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::capability_set::{BestChange, CapabilitySet};
use crate::contract::ContractKey;
use crate::error::CapabilityError;
use crate::observability::TARGET_REGISTRY;
use crate::provider::{ProviderEntry, ProviderHandle, ProviderId};
use crate::snapshot::SnapshotCell;

/// 单个契约的统计信息。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractStats {
    /// 契约。
    pub contract: ContractKey,
    /// 存活提供者数量。
    pub providers: usize,
    /// 当前最佳提供者的优先级。
    pub best_priority: Option<i32>,
    /// 该契约快照的修订号，每次增删自增。
    pub revision: u64,
}

struct ContractSlot {
    set: Mutex<CapabilitySet>,
    snapshot: SnapshotCell<CapabilitySet>,
}

impl ContractSlot {
    fn new() -> Self {
        Self {
            set: Mutex::new(CapabilitySet::new()),
            snapshot: SnapshotCell::new(CapabilitySet::new()),
        }
    }
}

/// 按契约分组、按优先级排序的提供者注册表。
///
/// # 教案式注释
/// - **意图 (Why)**：把“多个可互换实现如何选择”收敛为一个线性化的数据结构；
/// - **契约 (What)**：序列号在注册表内单调递增且永不复用，是同优先级下的决胜依据；
/// - **风险 (Trade-offs)**：`DashMap` 的分片守卫只在定位槽位时短暂持有，不会与契约互斥锁嵌套。
pub struct CapabilityRegistry {
    slots: DashMap<ContractKey, Arc<ContractSlot>>,
    sequence: AtomicU64,
    arrivals: Mutex<u64>,
    arrived: Condvar,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    /// 创建空注册表。
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            sequence: AtomicU64::new(1),
            arrivals: Mutex::new(0),
            arrived: Condvar::new(),
        }
    }

    /// 以契约类型 `T` 注册提供者并返回撤回句柄。
    pub fn register<T>(&self, instance: Arc<T>, priority: i32) -> ProviderHandle
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_entry(instance, priority).0.handle()
    }

    /// 注册并返回完整条目，供运行时向监听者广播。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：
    ///   1. 持有契约互斥锁后再分配序列号，保证同一契约内序列号与入集合顺序一致；
    ///   2. 插入集合并发布新快照；
    ///   3. 释放契约锁后递增到达计数并唤醒全部等待者。
    /// - **契约 (What)**：返回时快照已对所有读者可见。
    pub(crate) fn register_entry<T>(
        &self,
        instance: Arc<T>,
        priority: i32,
    ) -> (ProviderEntry, BestChange)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let slot = self.slot_or_insert(ContractKey::of::<T>());

        let (entry, change) = {
            let mut set = slot.set.lock();
            let id = ProviderId::new(self.sequence.fetch_add(1, Ordering::Relaxed));
            let entry = ProviderEntry::new(id, instance, priority);
            let change = set.insert(entry.clone());
            slot.snapshot.publish(set.clone());
            (entry, change)
        };

        debug!(
            target: TARGET_REGISTRY,
            contract = %entry.contract(),
            provider_id = entry.id().get(),
            priority,
            best_changed = change.is_replaced(),
            "capability provider registered"
        );

        self.signal_arrival();
        (entry, change)
    }

    /// 撤回提供者，返回被移除的条目；句柄未知或已撤回时返回 `None`。
    pub fn unregister(&self, handle: ProviderHandle) -> Option<ProviderEntry> {
        self.unregister_entry(handle).map(|(entry, _)| entry)
    }

    pub(crate) fn unregister_entry(
        &self,
        handle: ProviderHandle,
    ) -> Option<(ProviderEntry, BestChange)> {
        let slot = self.slot(handle.contract())?;
        let removed = {
            let mut set = slot.set.lock();
            let removed = set.remove(handle.id());
            if removed.is_some() {
                slot.snapshot.publish(set.clone());
            }
            removed
        };

        if let Some((entry, change)) = &removed {
            debug!(
                target: TARGET_REGISTRY,
                contract = %entry.contract(),
                provider_id = entry.id().get(),
                priority = entry.priority(),
                best_changed = change.is_replaced(),
                "capability provider unregistered"
            );
        }
        removed
    }

    /// 契约 `T` 的当前最佳实例。
    pub fn best<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.best_entry(ContractKey::of::<T>())
            .and_then(|entry| entry.downcast::<T>())
    }

    /// 契约的当前最佳条目。
    pub fn best_entry(&self, contract: ContractKey) -> Option<ProviderEntry> {
        self.snapshot(contract)
            .and_then(|snapshot| snapshot.best().cloned())
    }

    /// 契约 `T` 的全部实例，优先级降序、同优先级按注册顺序。
    pub fn all<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries(ContractKey::of::<T>())
            .iter()
            .filter_map(ProviderEntry::downcast::<T>)
            .collect()
    }

    /// 契约的全部条目，排序同 [`CapabilityRegistry::all`]。
    pub fn entries(&self, contract: ContractKey) -> Vec<ProviderEntry> {
        self.snapshot(contract)
            .map(|snapshot| snapshot.providers().to_vec())
            .unwrap_or_default()
    }

    /// 契约的只读快照。
    pub fn snapshot(&self, contract: ContractKey) -> Option<Arc<CapabilitySet>> {
        self.slot(contract).map(|slot| slot.snapshot.load())
    }

    /// 契约当前是否至少存在一个提供者。
    pub fn has_provider(&self, contract: ContractKey) -> bool {
        self.snapshot(contract)
            .is_some_and(|snapshot| !snapshot.is_empty())
    }

    /// 按实例身份查找撤回句柄。
    pub fn find<T>(&self, instance: &Arc<T>) -> Option<ProviderHandle>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.snapshot(ContractKey::of::<T>())?
            .providers()
            .iter()
            .find(|entry| entry.holds(instance))
            .map(ProviderEntry::handle)
    }

    /// 当前存在提供者的契约。
    pub fn contracts(&self) -> Vec<ContractKey> {
        self.slots
            .iter()
            .filter(|slot| !slot.snapshot.load().is_empty())
            .map(|slot| *slot.key())
            .collect()
    }

    /// 全部契约的统计信息，顺序不保证稳定。
    pub fn stats(&self) -> Vec<ContractStats> {
        self.slots
            .iter()
            .map(|slot| {
                let snapshot = slot.snapshot.load();
                ContractStats {
                    contract: *slot.key(),
                    providers: snapshot.len(),
                    best_priority: snapshot.best().map(ProviderEntry::priority),
                    revision: slot.snapshot.revision(),
                }
            })
            .collect()
    }

    /// 阻塞等待契约出现提供者，最长 `grace`。
    ///
    /// # 教案式注释
    /// - **逻辑 (How)**：先无锁尝试一次；未命中则持有到达锁循环“检查关闭 → 检查快照 → 条件等待”。
    ///   注册方在发布快照之后才获取到达锁并广播，因此检查与等待之间不会丢失唤醒。
    /// - **契约 (What)**：`shutdown` 置位后立即返回 [`CapabilityError::ShuttingDown`]；
    ///   超时返回 [`CapabilityError::Unavailable`] 并附带实际等待时长。
    pub(crate) fn wait_for_best(
        &self,
        contract: ContractKey,
        grace: Duration,
        shutdown: &AtomicBool,
    ) -> Result<ProviderEntry, CapabilityError> {
        if shutdown.load(Ordering::Acquire) {
            return Err(CapabilityError::ShuttingDown {
                contract: contract.name(),
            });
        }
        if let Some(entry) = self.best_entry(contract) {
            return Ok(entry);
        }

        let started = Instant::now();
        let deadline = started.checked_add(grace);
        let mut arrivals = self.arrivals.lock();
        loop {
            if shutdown.load(Ordering::Acquire) {
                return Err(CapabilityError::ShuttingDown {
                    contract: contract.name(),
                });
            }
            if let Some(entry) = self.best_entry(contract) {
                return Ok(entry);
            }
            let timed_out = match deadline {
                Some(deadline) => self.arrived.wait_until(&mut arrivals, deadline).timed_out(),
                None => {
                    self.arrived.wait(&mut arrivals);
                    false
                }
            };
            if timed_out {
                drop(arrivals);
                if shutdown.load(Ordering::Acquire) {
                    return Err(CapabilityError::ShuttingDown {
                        contract: contract.name(),
                    });
                }
                return self
                    .best_entry(contract)
                    .ok_or(CapabilityError::Unavailable {
                        contract: contract.name(),
                        waited: started.elapsed(),
                    });
            }
        }
    }

    /// 唤醒全部等待者，令其重新检查关闭标记与快照。
    pub(crate) fn signal_arrival(&self) {
        {
            let mut arrivals = self.arrivals.lock();
            *arrivals = arrivals.wrapping_add(1);
        }
        self.arrived.notify_all();
    }

    fn slot(&self, contract: ContractKey) -> Option<Arc<ContractSlot>> {
        self.slots.get(&contract).map(|slot| Arc::clone(slot.value()))
    }

    fn slot_or_insert(&self, contract: ContractKey) -> Arc<ContractSlot> {
        Arc::clone(
            self.slots
                .entry(contract)
                .or_insert_with(|| Arc::new(ContractSlot::new()))
                .value(),
        )
    }
}

impl core::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("contracts", &self.slots.len())
            .finish()
    }
}
