//! Producers push as fast as they can and never retry, so most pushes
//! fail.  Checks that every accepted task runs exactly once, that no
//! rejected task runs, and that the shared failure counter matches
//! what the producers saw.

use loopbridge::log::LogFilter;
use loopbridge::{Routes, WorkerConfig, WorkerContext};
use std::thread;
use stress_queue::{notify_channel, NullEngine};

const PRODUCERS: usize = 6;
const EACH: usize = 50000;
const REPEAT: usize = 20;

fn main() {
    let (wake_tx, mut wake_rx) = notify_channel();
    let config = WorkerConfig {
        queue_capacity: 16,
        push_retries: 2,
        log_filter: LogFilter::new(),
        ..WorkerConfig::default()
    };
    let routes = Routes::builder().build().unwrap();
    let mut cx = WorkerContext::new(config, NullEngine, routes, 0_usize, wake_tx).unwrap();

    let mut total_failed = 0;
    for round in 0..REPEAT {
        *cx.data_mut() = 0;
        let failed_before = cx.remote().failed_count();
        let mut handles = Vec::new();
        for _ in 0..PRODUCERS {
            let remote = cx.remote();
            handles.push(thread::spawn(move || {
                let mut accepted = 0_usize;
                for _ in 0..EACH {
                    if remote.execute(|cx| *cx.data_mut() += 1) {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }

        // Keep ticking until every producer has finished and the
        // queue is drained
        let mut accepted = 0;
        let mut pending = handles;
        while !pending.is_empty() {
            wake_rx();
            cx.tick();
            let (done, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|h| h.is_finished());
            accepted += done.into_iter().map(|h| h.join().unwrap()).sum::<usize>();
            pending = rest;
        }
        while cx.tick() > 0 {}

        let failed = cx.remote().failed_count() - failed_before;
        assert_eq!(accepted, *cx.data());
        assert_eq!(PRODUCERS * EACH, accepted + failed as usize);
        total_failed += failed;
        println!("round {}: {} run, {} rejected", round, accepted, failed);
    }
    println!("total rejected: {}", total_failed);
}
