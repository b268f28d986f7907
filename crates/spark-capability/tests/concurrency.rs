//! 多线程抖动测试
//!
//! # 教案级说明
//! - **Why**：提供者的出现与消失来自任意线程，协调器必须在并发抖动下保持“启动与停止严格交替”；
//! - **How**：多个线程反复发布/撤回同一契约的提供者，同时读线程持续读取最佳提供者；`Probe` 在
//!   重复启动时直接 panic，panic 会沿发布线程传播并使 `join` 失败；
//! - **What**：抖动结束且依赖全部撤回后，启动次数等于停止次数，协调器回到 `Stopped`。

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use spark_capability::{AvailabilityCoordinator, CapabilityRuntime, LifecycleState};
use support::{Directory, Mailbox, Probe, directory, mailbox};

const WRITERS: usize = 6;
const ROUNDS: usize = 200;

#[test]
fn start_and_stop_alternate_under_churn() {
    let runtime = CapabilityRuntime::default();
    let probe = Probe::new();
    let coordinator = AvailabilityCoordinator::builder("churn")
        .require::<dyn Mailbox>()
        .require::<dyn Directory>()
        .attach(&runtime, probe.clone())
        .expect("挂载必须成功");
    let directory_handle = runtime.publish(directory("ldap"), 0);

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let runtime = runtime.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let priority = ((writer + round) % 5) as i32;
                    let handle = runtime.publish(mailbox("churn"), priority);
                    if round % 7 == 0 {
                        thread::yield_now();
                    }
                    assert!(runtime.withdraw(handle), "自己发布的提供者必须可撤回");
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("写线程不应 panic");
    }

    assert!(runtime.withdraw(directory_handle));
    assert_eq!(coordinator.state(), LifecycleState::Stopped);
    assert!(probe.starts() >= 1, "抖动期间至少出现过一次全部满足");
    assert_eq!(probe.starts(), probe.stops(), "每次成功启动恰好配对一次停止");
}

#[test]
fn readers_always_see_a_consistent_best() {
    let runtime = CapabilityRuntime::default();
    runtime.publish(mailbox("baseline"), 0);
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let runtime = runtime.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let best = runtime
                        .best::<dyn Mailbox>()
                        .expect("基线提供者始终存在");
                    let label = best.label();
                    assert!(label == "baseline" || label == "burst", "读到未知提供者：{label}");
                }
            })
        })
        .collect();

    let writer = {
        let runtime = runtime.clone();
        thread::spawn(move || {
            for _ in 0..ROUNDS {
                let handle = runtime.publish(mailbox("burst"), 10);
                runtime.withdraw(handle);
            }
        })
    };

    writer.join().expect("写线程不应 panic");
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().expect("读线程不应 panic");
    }
    assert_eq!(
        runtime.best::<dyn Mailbox>().map(|m| m.label()),
        Some("baseline")
    );
}
