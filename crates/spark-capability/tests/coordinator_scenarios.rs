//! AvailabilityCoordinator 场景测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以宿主视角（发布/撤回能力）驱动协调器，验证“全部满足才启动、任一缺失即停止”
//!   的边沿语义，以及启动失败、重入撤回、显式关闭等边界路径；
//! - **结构 (How)**：每个用例构造独立的 [`CapabilityRuntime`]，组件使用 `support::Probe` 记录钩子次数；
//! - **契约 (What)**：断言集中在钩子调用次数与 [`LifecycleState`]，不依赖日志格式（启动失败用例除外）。

mod support;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use spark_capability::{
    AvailabilityCoordinator, BindingMode, CapabilityListener, CapabilityRuntime, ContractKey,
    ForcedShutdown, LifecycleState, ProviderEntry, ProviderHandle, RuntimeConfig, component_fn,
};
use support::{Directory, Mailbox, Metrics, Probe, directory, mailbox, metrics};
use tracing_test::traced_test;

fn attach_mail_directory(runtime: &CapabilityRuntime, probe: &Probe) -> AvailabilityCoordinator {
    AvailabilityCoordinator::builder("mail-service")
        .require::<dyn Mailbox>()
        .require::<dyn Directory>()
        .attach(runtime, probe.clone())
        .expect("必需契约无重复，挂载必须成功")
}

#[test]
fn scenario_a_starts_once_when_all_contracts_arrive() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::new();
    let coordinator = attach_mail_directory(&runtime, &probe);

    runtime.publish(mailbox("primary"), 0);
    assert!(!coordinator.is_ready(), "只有 Mailbox 时不应就绪");
    assert_eq!(probe.starts(), 0);
    assert_eq!(
        coordinator.missing(),
        vec![ContractKey::of::<dyn Directory>()]
    );

    runtime.publish(directory("ldap"), 0);
    assert!(coordinator.is_ready());
    assert_eq!(probe.starts(), 1, "全部满足的上升沿恰好启动一次");
    assert_eq!(coordinator.state(), LifecycleState::Started);
}

#[test]
fn scenario_b_stops_once_and_restarts_on_return() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::new();
    let coordinator = attach_mail_directory(&runtime, &probe);

    let mail = runtime.publish(mailbox("primary"), 0);
    runtime.publish(directory("ldap"), 0);
    assert_eq!(probe.starts(), 1);

    assert!(runtime.withdraw(mail));
    assert_eq!(probe.stops(), 1, "缺失边沿恰好停止一次");
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(!runtime.withdraw(mail));
    assert_eq!(probe.stops(), 1, "重复撤回不是新的边沿");

    runtime.publish(mailbox("replacement"), 0);
    assert_eq!(probe.starts(), 2, "依赖恢复后重新启动");
    assert_eq!(probe.bound_mailboxes(), vec!["primary", "replacement"]);
}

#[test]
fn additional_providers_are_not_edges() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::new();
    let _coordinator = attach_mail_directory(&runtime, &probe);

    let first = runtime.publish(mailbox("first"), 0);
    runtime.publish(directory("ldap"), 0);
    let second = runtime.publish(mailbox("second"), 5);
    assert_eq!(probe.starts(), 1, "已满足契约再次满足是空操作");

    runtime.withdraw(first);
    assert_eq!(probe.stops(), 0, "仍有提供者时不应停止");
    runtime.withdraw(second);
    assert_eq!(probe.stops(), 1);
}

#[test]
fn providers_present_before_attach_are_replayed() {
    let runtime = CapabilityRuntime::default();
    runtime.publish(mailbox("early"), 0);
    runtime.publish(directory("early"), 0);

    let probe = Probe::new();
    let coordinator = attach_mail_directory(&runtime, &probe);
    assert_eq!(probe.starts(), 1, "挂载时即满足的依赖在挂载内启动");
    assert!(coordinator.is_started());
}

#[test]
fn zero_required_contracts_start_during_attach() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::new();
    let coordinator = AvailabilityCoordinator::builder("standalone")
        .attach(&runtime, probe.clone())
        .expect("空必需列表合法");

    assert!(coordinator.is_ready());
    assert_eq!(probe.starts(), 1);
    assert_eq!(probe.bound_mailboxes(), vec!["-"]);
}

#[test]
#[traced_test]
fn start_failure_fails_terminally_and_requests_forced_shutdown() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::failing();
    let (notices, received) = mpsc::channel();

    let coordinator = AvailabilityCoordinator::builder("mail-service")
        .require::<dyn Mailbox>()
        .shutdown_hook(move |notice: &ForcedShutdown| {
            let thread_name = thread::current().name().map(str::to_owned);
            let _ = notices.send((notice.clone(), thread_name));
        })
        .attach(&runtime, probe.clone())
        .expect("挂载必须成功");

    let handle = runtime.publish(mailbox("primary"), 0);
    assert_eq!(coordinator.state(), LifecycleState::Failed);
    assert_eq!(probe.starts(), 1);
    assert_eq!(probe.stops(), 1, "回滚恰好执行一次 stop");

    let (notice, thread_name) = received
        .recv_timeout(Duration::from_secs(5))
        .expect("强制关闭回调必须被调用");
    assert_eq!(notice.component, "mail-service");
    assert_eq!(
        thread_name.as_deref(),
        Some(RuntimeConfig::default().forced_shutdown_thread.as_str()),
        "强制关闭回调必须在独立的具名线程上执行"
    );
    assert!(notice.cause.contains("mailbox offline"));
    assert!(logs_contain("component start failed"));

    runtime.withdraw(handle);
    runtime.publish(mailbox("again"), 0);
    assert_eq!(probe.starts(), 1, "失败后不自动重试");
    assert_eq!(probe.stops(), 1);
    assert_eq!(coordinator.state(), LifecycleState::Failed);
}

#[test]
fn shutdown_hook_may_reenter_the_runtime_without_deadlock() {
    //
    // 教案级说明：宿主的强制关闭回调通常会卸载模块，进而撤回该模块发布过的能力。
    // - **Why**：触发回调的线程正处于发布通知的调用栈上，若回调同步执行并重入运行时，宿主可能自锁；
    // - **How**：回调在自定义命名的线程上撤回导致失败的依赖，并把结果送回测试线程；
    // - **What**：撤回在超时之前完成，协调器保持 `Failed`，注册表中不再有该依赖。
    let config = RuntimeConfig {
        forced_shutdown_thread: "mail-bundle-stop".to_string(),
        ..RuntimeConfig::default()
    };
    let runtime = CapabilityRuntime::new(config).expect("配置合法");
    let probe = Probe::failing();
    let offline = mailbox("offline");
    let (outcomes, received) = mpsc::channel();

    let hook_runtime = runtime.clone();
    let hook_instance = Arc::clone(&offline);
    let coordinator = AvailabilityCoordinator::builder("mail-service")
        .require::<dyn Mailbox>()
        .shutdown_hook(move |_: &ForcedShutdown| {
            let thread_name = thread::current().name().map(str::to_owned);
            let withdrawn = hook_runtime.withdraw_instance(&hook_instance);
            let _ = outcomes.send((thread_name, withdrawn));
        })
        .attach(&runtime, probe.clone())
        .expect("挂载必须成功");

    runtime.publish(Arc::clone(&offline), 0);

    let (thread_name, withdrawn) = received
        .recv_timeout(Duration::from_secs(5))
        .expect("回调重入运行时不得死锁");
    assert_eq!(thread_name.as_deref(), Some("mail-bundle-stop"));
    assert!(withdrawn, "回调必须能撤回失败组件依赖的能力");
    assert!(runtime.best::<dyn Mailbox>().is_none());
    assert_eq!(coordinator.state(), LifecycleState::Failed);
    assert_eq!(probe.starts(), 1);
}

/// 拦住第一条 `added` 通知，直到测试线程放行；之后的通知直接通过。
struct HoldFirstAdded {
    release: Mutex<Option<mpsc::Receiver<()>>>,
    entered: mpsc::Sender<()>,
}

impl CapabilityListener for HoldFirstAdded {
    fn capability_added(&self, _entry: &ProviderEntry) {
        let pending = self.release.lock().take();
        if let Some(release) = pending {
            let _ = self.entered.send(());
            let _ = release.recv();
        }
    }

    fn capability_removed(&self, _entry: &ProviderEntry) {}
}

#[test]
fn delayed_event_does_not_change_equal_priority_winner() {
    //
    // 教案级说明：监听者通知来自不同的发布线程，协调器收到的顺序可能与注册顺序相反。
    // - **Why**：同优先级时最早注册者胜出，协调器视图必须与注册表给出同一个答案；
    // - **How**：先订阅的监听者拦住 `first` 的通知，`second` 的通知先到达协调器，随后放行；
    // - **What**：两条通知都送达后，`get_best` 与 `CapabilityRuntime::best` 都指向 `first`。
    let runtime = CapabilityRuntime::default();
    let (release_tx, release_rx) = mpsc::channel();
    let (entered_tx, entered_rx) = mpsc::channel();
    runtime.subscribe(Arc::new(HoldFirstAdded {
        release: Mutex::new(Some(release_rx)),
        entered: entered_tx,
    }));
    let probe = Probe::new();
    let coordinator = AvailabilityCoordinator::builder("mail-service")
        .require::<dyn Mailbox>()
        .attach(&runtime, probe.clone())
        .expect("挂载必须成功");

    let first = {
        let runtime = runtime.clone();
        thread::spawn(move || runtime.publish(mailbox("first"), 0))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("第一条通知必须被拦住");
    runtime.publish(mailbox("second"), 0);
    assert_eq!(probe.bound_mailboxes(), vec!["second"], "先到达的通知先触发启动");

    release_tx.send(()).expect("拦截监听者仍在等待");
    first.join().expect("发布线程不应 panic");

    assert_eq!(
        runtime.best::<dyn Mailbox>().map(|m| m.label()),
        Some("first"),
        "注册表按注册顺序决胜"
    );
    assert_eq!(
        coordinator.get_best::<dyn Mailbox>().map(|m| m.label()),
        Some("first"),
        "乱序到达的通知不得改变同优先级的胜者"
    );
}

#[test]
fn panic_in_start_is_resumed_after_failing_the_coordinator() {
    let runtime = CapabilityRuntime::default();
    let coordinator = AvailabilityCoordinator::builder("fragile")
        .require::<dyn Mailbox>()
        .attach(
            &runtime,
            component_fn(|_| panic!("corrupted mailbox index"), || Ok(())),
        )
        .expect("挂载必须成功");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.publish(mailbox("primary"), 0);
    }));
    assert!(outcome.is_err(), "钩子 panic 必须传播给触发方");
    assert_eq!(coordinator.state(), LifecycleState::Failed);
}

#[test]
fn reentrant_withdrawal_during_start_is_applied_afterwards() {
    let runtime = CapabilityRuntime::default();
    let directory_handle: Arc<Mutex<Option<ProviderHandle>>> = Arc::new(Mutex::new(None));
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let start_events = Arc::clone(&events);
    let stop_events = Arc::clone(&events);
    let pending = Arc::clone(&directory_handle);
    let coordinator = AvailabilityCoordinator::builder("reentrant")
        .require::<dyn Mailbox>()
        .require::<dyn Directory>()
        .attach(
            &runtime,
            component_fn(
                move |context| {
                    start_events.lock().push("start:enter");
                    if let Some(handle) = pending.lock().take() {
                        context.runtime().withdraw(handle);
                    }
                    start_events.lock().push("start:exit");
                    Ok(())
                },
                move || {
                    stop_events.lock().push("stop");
                    Ok(())
                },
            ),
        )
        .expect("挂载必须成功");

    let handle = runtime.publish(directory("ldap"), 0);
    *directory_handle.lock() = Some(handle);
    runtime.publish(mailbox("primary"), 0);

    assert_eq!(
        *events.lock(),
        vec!["start:enter", "start:exit", "stop"],
        "启动期间的缺失在 start 返回后经正常路径停止"
    );
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(!coordinator.is_ready());
}

#[test]
fn captured_binding_restarts_when_bound_instance_leaves() {
    let runtime = CapabilityRuntime::default();
    let captured = Probe::new();
    let any = Probe::new();
    let _captured = AvailabilityCoordinator::builder("captured")
        .require::<dyn Mailbox>()
        .binding(BindingMode::Captured)
        .attach(&runtime, captured.clone())
        .expect("挂载必须成功");
    let _any = AvailabilityCoordinator::builder("any")
        .require::<dyn Mailbox>()
        .attach(&runtime, any.clone())
        .expect("挂载必须成功");

    let primary = runtime.publish(mailbox("primary"), 10);
    runtime.publish(mailbox("standby"), 1);
    runtime.withdraw(primary);

    assert_eq!(captured.bound_mailboxes(), vec!["primary", "standby"]);
    assert_eq!(captured.stops(), 1);
    assert_eq!(any.starts(), 1, "AnyProvider 模式下替换对组件透明");
    assert_eq!(any.stops(), 0);
}

#[test]
fn optional_contracts_never_block_start() {
    let runtime = CapabilityRuntime::default();
    let observed: Arc<Mutex<Vec<Option<&'static str>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&observed);

    let coordinator = AvailabilityCoordinator::builder("with-optional")
        .require::<dyn Mailbox>()
        .attach(
            &runtime,
            component_fn(
                move |context| {
                    sink.lock()
                        .push(context.optional::<dyn Metrics>().map(|m| m.label()));
                    Ok(())
                },
                || Ok(()),
            ),
        )
        .expect("挂载必须成功");

    let mail = runtime.publish(mailbox("primary"), 0);
    assert!(coordinator.get_optional::<dyn Metrics>().is_none());

    runtime.publish(metrics("prometheus"), 0);
    runtime.withdraw(mail);
    runtime.publish(mailbox("primary"), 0);

    assert_eq!(*observed.lock(), vec![None, Some("prometheus")]);
    assert_eq!(
        coordinator.get_optional::<dyn Metrics>().map(|m| m.label()),
        Some("prometheus")
    );
    assert_eq!(
        coordinator.get_best::<dyn Mailbox>().map(|m| m.label()),
        Some("primary")
    );
    assert!(coordinator.get_best::<dyn Metrics>().is_none(), "非必需契约不经 get_best 暴露");
}

#[test]
fn close_stops_once_and_ignores_later_events() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::new();
    let coordinator = attach_mail_directory(&runtime, &probe);
    runtime.publish(mailbox("primary"), 0);
    runtime.publish(directory("ldap"), 0);

    coordinator.close();
    coordinator.close();
    assert_eq!(probe.stops(), 1);
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert_eq!(runtime.listener_count(), 0);

    let snapshot = coordinator.snapshot();
    assert!(!snapshot.ready, "关闭后释放全部绑定");
    assert_eq!(snapshot.missing.len(), 2);

    runtime.publish(mailbox("late"), 0);
    assert_eq!(probe.starts(), 1, "关闭后不再响应依赖变化");
}
