//! 单一契约下的提供者集合（Capability Set）。
//!
//! # 设计背景（Why）
//! - 同一能力可能同时存在多个可互换的实现，消费方需要确定性地选出“当前最佳”；
//! - 选择结果被频繁读取而很少变化，因此缓存最佳者，只在必要时重算。
//!
//! # 逻辑解析（How）
//! - `providers` 始终按“优先级降序、序列号升序”排列，插入使用二分定位，保证同优先级保持注册顺序；
//! - `best` 为缓存：新条目严格高于现任才替换（O(1) 快路径）；移除现任时线性扫描剩余条目重选。
//!
//! # 契约说明（What）
//! - 非空时 `best` 必为最大优先级中序列号最小的条目；
//! - 移除非现任条目永不改变 `best`；
//! - 本类型不做同步，由注册表或协调器在各自的锁内使用。

use alloc::vec::Vec;

use crate::provider::{ProviderEntry, ProviderId};

/// 插入或移除后最佳提供者是否发生变化。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BestChange {
    /// 最佳提供者未变。
    Unchanged,
    /// 最佳提供者被替换（或由空变为非空、由非空变为空）。
    Replaced,
}

impl BestChange {
    /// 是否发生了替换。
    pub fn is_replaced(self) -> bool {
        matches!(self, BestChange::Replaced)
    }
}

/// 单一契约的提供者集合。
#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    providers: Vec<ProviderEntry>,
    best: Option<ProviderEntry>,
}

impl CapabilitySet {
    /// 构造空集合。
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入新的提供者。
    ///
    /// # 教案式说明
    /// - **逻辑 (How)**：按排序键二分定位插入点；仅当集合原为空或新条目排名高于现任（优先级更高，或同优先级且序列号更小）时替换缓存的最佳者；
    ///   因此乱序到达的插入与按序插入收敛到同一结果。
    /// - **契约 (What)**：调用方保证同一序列号不会重复插入；重复插入返回 `Unchanged` 且不修改集合。
    pub fn insert(&mut self, entry: ProviderEntry) -> BestChange {
        if self.contains(entry.id()) {
            return BestChange::Unchanged;
        }
        let position = self
            .providers
            .partition_point(|existing| existing.rank_cmp(&entry).is_lt());
        let replaces_best = match &self.best {
            None => true,
            Some(current) => entry.outranks(current),
        };
        if replaces_best {
            self.best = Some(entry.clone());
        }
        self.providers.insert(position, entry);
        if replaces_best {
            BestChange::Replaced
        } else {
            BestChange::Unchanged
        }
    }

    /// 按序列号移除提供者，返回被移除的条目与最佳者变化情况。
    ///
    /// - **逻辑 (How)**：若移除的是现任最佳者，扫描剩余条目重选；否则缓存保持不动。
    pub fn remove(&mut self, id: ProviderId) -> Option<(ProviderEntry, BestChange)> {
        let index = self.providers.iter().position(|entry| entry.id() == id)?;
        let removed = self.providers.remove(index);
        let was_best = self.best.as_ref().is_some_and(|best| best.id() == id);
        if !was_best {
            return Some((removed, BestChange::Unchanged));
        }
        self.best = self.rescan_best();
        Some((removed, BestChange::Replaced))
    }

    fn rescan_best(&self) -> Option<ProviderEntry> {
        self.providers
            .iter()
            .min_by(|left, right| left.rank_cmp(right))
            .cloned()
    }

    /// 当前最佳提供者。
    pub fn best(&self) -> Option<&ProviderEntry> {
        self.best.as_ref()
    }

    /// 按排序输出的全部提供者。
    pub fn providers(&self) -> &[ProviderEntry] {
        &self.providers
    }

    /// 是否包含指定序列号。
    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.iter().any(|entry| entry.id() == id)
    }

    /// 提供者数量。
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// 集合是否为空。
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// 清空集合并释放全部实例引用。
    pub fn clear(&mut self) {
        self.providers.clear();
        self.best = None;
    }
}
