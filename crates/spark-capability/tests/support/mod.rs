//! 集成测试共享的契约与探针组件。
//!
//! - `Mailbox`/`Directory`/`Metrics`：测试用契约，均由 [`Named`] 实现，以标签区分实例；
//! - [`Probe`]：记录 `start`/`stop` 次数与启动时绑定的标签，并在钩子重叠时直接 panic，
//!   用于断言“每次成功启动恰好配对一次停止”。
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use spark_capability::{Component, ComponentError, StartContext};

pub trait Mailbox: Send + Sync {
    fn label(&self) -> &'static str;
}

impl std::fmt::Debug for dyn Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Mailbox").field(&self.label()).finish()
    }
}

pub trait Directory: Send + Sync {
    fn label(&self) -> &'static str;
}

pub trait Metrics: Send + Sync {
    fn label(&self) -> &'static str;
}

pub struct Named(pub &'static str);

impl Mailbox for Named {
    fn label(&self) -> &'static str {
        self.0
    }
}

impl Directory for Named {
    fn label(&self) -> &'static str {
        self.0
    }
}

impl Metrics for Named {
    fn label(&self) -> &'static str {
        self.0
    }
}

pub fn mailbox(label: &'static str) -> Arc<dyn Mailbox> {
    Arc::new(Named(label))
}

pub fn directory(label: &'static str) -> Arc<dyn Directory> {
    Arc::new(Named(label))
}

pub fn metrics(label: &'static str) -> Arc<dyn Metrics> {
    Arc::new(Named(label))
}

#[derive(Default)]
struct ProbeState {
    starts: AtomicUsize,
    stops: AtomicUsize,
    running: AtomicBool,
    fail_start: AtomicBool,
    bound: Mutex<Vec<&'static str>>,
}

/// 计数探针组件，克隆后共享同一份计数。
#[derive(Clone, Default)]
pub struct Probe {
    state: Arc<ProbeState>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// 令后续 `start` 返回错误。
    pub fn failing() -> Self {
        let probe = Self::default();
        probe.state.fail_start.store(true, Ordering::SeqCst);
        probe
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// 每次启动时绑定的 `Mailbox` 标签（未要求时记为 `-`）。
    pub fn bound_mailboxes(&self) -> Vec<&'static str> {
        self.state.bound.lock().clone()
    }
}

impl Component for Probe {
    fn start(&self, context: &StartContext<'_>) -> Result<(), ComponentError> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(ComponentError::msg("mailbox offline"));
        }
        assert!(
            !self.state.running.swap(true, Ordering::SeqCst),
            "start 不得在未停止时重复执行"
        );
        let label = context
            .required::<dyn Mailbox>()
            .map(|mailbox| mailbox.label())
            .unwrap_or("-");
        self.state.bound.lock().push(label);
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}
