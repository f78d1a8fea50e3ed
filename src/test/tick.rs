use super::engine::{config, worker, MockEngine, WakeCount};
use crate::log::LogLevel;
use crate::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn execute_runs_on_tick() {
    let routes = Routes::<Vec<u32>>::builder().build().unwrap();
    let (mut cx, _, wakes) = worker(MockEngine::new(), routes, Vec::new());
    let remote = cx.remote();

    assert!(remote.execute(|cx| cx.data_mut().push(1)));
    assert!(remote.execute(|cx| cx.data_mut().push(2)));
    assert_eq!(2, wakes.get());
    assert!(cx.data().is_empty());

    assert_eq!(2, cx.tick());
    assert_eq!(vec![1, 2], *cx.data());
    assert_eq!(0, cx.tick());
}

// Tasks queued by a task run on the following tick
#[test]
fn push_during_tick() {
    let routes = Routes::<Vec<u32>>::builder().build().unwrap();
    let (mut cx, _, _) = worker(MockEngine::new(), routes, Vec::new());
    let remote = cx.remote();

    let r2 = remote.clone();
    remote.execute(move |cx| {
        cx.data_mut().push(1);
        r2.execute(|cx| cx.data_mut().push(2));
    });
    assert_eq!(1, cx.tick());
    assert_eq!(vec![1], *cx.data());
    assert_eq!(1, cx.tick());
    assert_eq!(vec![1, 2], *cx.data());
}

#[test]
fn failed_push_logged_once_per_change() {
    let routes = Routes::<()>::builder().build().unwrap();
    let engine = MockEngine::new();
    let rec = engine.recorder();
    let wakes = WakeCount::default();
    let cfg = WorkerConfig {
        queue_capacity: 2,
        ..config()
    };
    let mut cx = WorkerContext::new(cfg, engine, routes, (), wakes.waker()).unwrap();
    let remote = cx.remote();

    assert!(remote.execute(|_| ()));
    assert!(remote.execute(|_| ()));
    assert!(!remote.execute(|_| ()));
    assert!(!remote.execute(|_| ()));
    // Waker is called even when the push fails
    assert_eq!(4, wakes.get());
    assert_eq!(2, remote.failed_count());

    assert_eq!(2, cx.tick());
    let crit = "an async task was unable to be enqueued";
    assert_eq!(1, rec.borrow().logged(LogLevel::Crit, crit));

    // No change, no further log
    assert_eq!(0, cx.tick());
    assert_eq!(1, rec.borrow().logged(LogLevel::Crit, crit));

    assert!(remote.execute(|_| ()));
    assert!(remote.execute(|_| ()));
    assert!(!remote.execute(|_| ()));
    assert_eq!(2, cx.tick());
    assert_eq!(2, rec.borrow().logged(LogLevel::Crit, crit));
    assert_eq!(3, remote.failed_count());
}

#[test]
fn task_panic_is_contained() {
    let routes = Routes::<u32>::builder().build().unwrap();
    let (mut cx, rec, _) = worker(MockEngine::new(), routes, 0);
    let remote = cx.remote();

    remote.execute(|_| panic!("boom"));
    remote.execute(|cx| *cx.data_mut() += 1);
    assert_eq!(2, cx.tick());
    assert_eq!(1, *cx.data());
    assert_eq!(1, rec.borrow().logged(LogLevel::Error, "worker task panicked: boom"));
}

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// Dropping the worker drops queued tasks without running them
#[test]
fn drop_worker_with_queued_tasks() {
    let routes = Routes::<()>::builder().build().unwrap();
    let (cx, _, _) = worker(MockEngine::new(), routes, ());
    let remote = cx.remote();

    let drops = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let counted = Counted(drops.clone());
        let runs = runs.clone();
        assert!(remote.execute(move |_| {
            let _keep = &counted;
            runs.fetch_add(1, Ordering::SeqCst);
        }));
    }
    drop(cx);
    assert_eq!(3, drops.load(Ordering::SeqCst));
    assert_eq!(0, runs.load(Ordering::SeqCst));

    // Pushing after the worker has gone is harmless
    let counted = Counted(drops.clone());
    remote.execute(move |_| drop(counted));
    drop(remote);
    assert_eq!(4, drops.load(Ordering::SeqCst));
    assert_eq!(0, runs.load(Ordering::SeqCst));
}

#[test]
fn bad_config() {
    let routes = Routes::<()>::builder().build().unwrap();
    let cfg = WorkerConfig {
        queue_capacity: 0,
        ..config()
    };
    match WorkerContext::new(cfg, MockEngine::new(), routes.clone(), (), || ()) {
        Err(Error::Config(_)) => (),
        _ => panic!("zero capacity accepted"),
    }
    let cfg = WorkerConfig {
        push_retries: 0,
        ..config()
    };
    match WorkerContext::new(cfg, MockEngine::new(), routes, (), || ()) {
        Err(Error::Config(_)) => (),
        _ => panic!("zero retries accepted"),
    }
    assert_eq!(4096, WorkerConfig::default().effective_capacity());
    assert_eq!(8, WorkerConfig::default().push_retries);
}
