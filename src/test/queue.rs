//! Task queue behaviour, independent of the worker
//!
//! A longer multi-threaded stress test can be found under `extra/`.

use crate::queue::channel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn capacity_rounding() {
    assert_eq!(2, channel::<u32>(0, 1).1.capacity());
    assert_eq!(2, channel::<u32>(1, 1).1.capacity());
    assert_eq!(8, channel::<u32>(5, 1).1.capacity());
    assert_eq!(4096, channel::<u32>(4096, 1).0.capacity());
}

#[test]
fn fifo_and_full() {
    let (tx, mut rx) = channel(4, 8);
    assert!(rx.is_empty());
    for i in 0..4 {
        assert_eq!(Ok(()), tx.push(i));
    }
    // Full: value comes back
    assert_eq!(Err(99), tx.push(99));
    assert_eq!(4, rx.len());

    assert_eq!(Some(0), rx.pop());
    assert_eq!(Ok(()), tx.push(4));
    for i in 1..5 {
        assert_eq!(Some(i), rx.pop());
    }
    assert_eq!(None, rx.pop());
    assert!(rx.is_empty());
}

// Wrap around the ring many times with a varying fill level
#[test]
fn laps() {
    let (tx, mut rx) = channel(8, 8);

    // ZX Spectrum 16-bit pseudo-random number generator
    let mut seed: usize = 12345;
    let mut rand = |n: usize| {
        seed = ((seed + 1) * 75) % 65537 - 1;
        (seed * n) >> 16
    };

    let mut next_in = 0_usize;
    let mut next_out = 0_usize;
    for _ in 0..5000 {
        for _ in 0..rand(10) {
            match tx.push(next_in) {
                Ok(()) => next_in += 1,
                Err(v) => {
                    assert_eq!(v, next_in);
                    assert_eq!(8, next_in - next_out);
                }
            }
        }
        for _ in 0..rand(10) {
            match rx.pop() {
                Some(v) => {
                    assert_eq!(v, next_out);
                    next_out += 1;
                }
                None => assert_eq!(next_in, next_out),
            }
        }
    }
    assert!(next_in > 10000);
}

struct Counted(Arc<AtomicUsize>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// Values left in the queue are dropped with it, exactly once
#[test]
fn drop_undrained() {
    let drops = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = channel(4, 8);
    for _ in 0..4 {
        assert!(tx.push(Counted(drops.clone())).is_ok());
    }
    match tx.push(Counted(drops.clone())) {
        Ok(()) => panic!("push to full queue succeeded"),
        Err(v) => drop(v),
    }
    assert_eq!(1, drops.load(Ordering::SeqCst));

    drop(rx.pop());
    assert_eq!(2, drops.load(Ordering::SeqCst));

    drop(tx);
    drop(rx);
    assert_eq!(5, drops.load(Ordering::SeqCst));
}

// Several producers: every accepted value arrives exactly once, and in
// push order per producer
#[test]
#[cfg_attr(miri, ignore)]
fn multi_producer() {
    const PRODUCERS: usize = 4;
    const EACH: usize = 20000;

    let (tx, mut rx) = channel::<(usize, usize)>(256, 8);
    let accepted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let tx = tx.clone();
        let accepted = accepted.clone();
        handles.push(thread::spawn(move || {
            let mut seq = 0;
            while seq < EACH {
                if tx.push((p, seq)).is_ok() {
                    seq += 1;
                    accepted.fetch_add(1, Ordering::SeqCst);
                } else {
                    thread::yield_now();
                }
            }
        }));
    }
    drop(tx);

    let mut next = [0_usize; PRODUCERS];
    let mut received = 0;
    while received < PRODUCERS * EACH {
        match rx.pop() {
            Some((p, seq)) => {
                assert_eq!(next[p], seq, "producer {} out of order", p);
                next[p] += 1;
                received += 1;
            }
            None => thread::yield_now(),
        }
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(None, rx.pop());
    assert_eq!(PRODUCERS * EACH, accepted.load(Ordering::SeqCst));
}
