//
// 教案级说明：Loom 模型检查时切换到它的原子类型，以便穷举 `take` 的并发交错。
#[cfg(not(any(loom, spark_loom)))]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicBool, Ordering};

/// 启动闩锁：记录“`start` 已成功返回、尚未执行对应的 `stop`”。
///
/// # 设计背景（Why）
/// - 协调器在依赖抖动、显式关闭与析构等多条路径上都可能尝试停止组件；
/// - 只有成功的 `start` 才应配对恰好一次 `stop`，失败的 `start` 不得触发常规 `stop`。
///
/// # 逻辑解析（How）
/// - `arm` 在 `start` 成功后置位；
/// - `take` 以 `swap(false)` 取走标记，只有取到 `true` 的一方执行 `stop`。
///
/// # 契约说明（What）
/// - 任意多个线程并发调用 `take`，至多一个返回 `true`。
#[derive(Debug)]
pub struct StartedLatch {
    armed: AtomicBool,
}

impl Default for StartedLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StartedLatch {
    pub fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
        }
    }

    /// 标记 `start` 已成功。
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// 取走标记；返回 `true` 表示调用方负责执行 `stop`。
    pub fn take(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}
