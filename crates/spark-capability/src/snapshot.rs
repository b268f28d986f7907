//! 读无锁、写原子替换的快照单元。
//!
//! # 设计背景（Why）
//! - 注册表的 `best`/`all` 与监听者广播都处在读多写少的热路径上，读线程不应被写线程的集合重建阻塞；
//! - 写路径在外层互斥锁内构造完整的新快照，再以一次指针交换发布，读者看到的要么是旧快照，要么是新快照。
//!
//! # 逻辑解析（How）
//! - [`SnapshotCell`] 包装 `ArcSwap<T>`：`load` 返回 `Arc<T>`，`publish` 原子替换并自增修订号；
//! - 修订号只是逻辑时钟，用于诊断输出与测试断言，不参与同步。
//!
//! # 契约说明（What）
//! - `publish` 的调用者负责串行化（通常持有按契约划分的互斥锁），本类型不保证并发写的先后顺序；
//! - 读者持有的 `Arc<T>` 会延长旧快照的生命周期，因此应尽快释放，避免拖延提供者实例的回收。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

/// 带修订号的原子快照。
pub(crate) struct SnapshotCell<T> {
    value: ArcSwap<T>,
    revision: AtomicU64,
}

impl<T> SnapshotCell<T> {
    /// 以初始值构造，修订号为 0。
    pub(crate) fn new(initial: T) -> Self {
        Self {
            value: ArcSwap::from_pointee(initial),
            revision: AtomicU64::new(0),
        }
    }

    /// 获取当前快照。
    #[inline]
    pub(crate) fn load(&self) -> Arc<T> {
        self.value.load_full()
    }

    /// 原子替换快照并返回新的修订号。
    #[inline]
    pub(crate) fn publish(&self, next: T) -> u64 {
        self.value.store(Arc::new(next));
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 当前修订号。
    #[inline]
    pub(crate) fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}
