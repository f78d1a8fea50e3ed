//! Many producer threads push tasks to one worker through cloned
//! `Remote` handles, retrying whenever a push fails.  The worker only
//! ticks when woken.  Every task must run exactly once, in push order
//! per producer, and the worker must never sleep through a wake.
//!
//! A small queue is used deliberately so that producers keep hitting
//! the full case and the retry path.

use loopbridge::log::LogFilter;
use loopbridge::{Routes, WorkerConfig, WorkerContext};
use std::thread;
use stress_queue::{notify_channel, NullEngine};

/// Number of producer threads
const PRODUCERS: usize = 8;
/// Tasks pushed by each producer per round
const EACH: usize = 10000;
/// Number of times to repeat the test
const REPEAT: usize = 100;

fn main() {
    let (wake_tx, mut wake_rx) = notify_channel();
    let config = WorkerConfig {
        queue_capacity: 64,
        log_filter: LogFilter::new(),
        ..WorkerConfig::default()
    };
    let routes = Routes::builder().build().unwrap();
    let mut cx = WorkerContext::new(
        config,
        NullEngine,
        routes,
        vec![0_usize; PRODUCERS],
        wake_tx,
    )
    .unwrap();

    for round in 0..REPEAT {
        for v in cx.data_mut().iter_mut() {
            *v = 0;
        }
        let mut handles = Vec::new();
        for p in 0..PRODUCERS {
            let remote = cx.remote();
            handles.push(thread::spawn(move || {
                let mut retries = 0_u64;
                for seq in 0..EACH {
                    while !remote.execute(move |cx| {
                        let next = &mut cx.data_mut()[p];
                        assert_eq!(*next, seq, "producer {} out of order", p);
                        *next += 1;
                    }) {
                        retries += 1;
                        thread::yield_now();
                    }
                }
                retries
            }));
        }

        let mut ticks = 0;
        while cx.data().iter().any(|n| *n < EACH) {
            wake_rx();
            cx.tick();
            ticks += 1;
        }
        let retries: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Drain wakes left over from the tail of the round
        cx.tick();
        println!(
            "round {}: {} ticks, {} failed pushes retried",
            round, ticks, retries
        );
    }
}
