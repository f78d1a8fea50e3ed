use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// Bounded ring with a sequence number per slot, after Dmitry Vyukov's
// bounded MPMC queue, cut down to a single consumer.
//
// A slot at ring position `pos` is free for a producer when its
// sequence equals `pos`, and holds a value ready for the consumer when
// its sequence equals `pos + 1`.  The consumer releases the slot for
// the next lap by storing `pos + capacity`.  Producers never spin
// unboundedly: a lost race on `tail` costs one retry, and after
// `retries` attempts the push gives up and returns the value.

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Ring<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    retries: u32,
    tail: AtomicUsize,
    // Only written by the single consumer.  Kept here rather than in
    // the receiver so that `Drop` can find the live values.
    head: AtomicUsize,
}

// Values are moved in by producers and out by the one consumer, so
// only `T: Send` is needed for the ring to be shared
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // No producers remain, so every claimed slot has been written
        // and the live values are contiguous from `head`
        let mut pos = *self.head.get_mut();
        loop {
            let slot = &mut self.slots[pos & self.mask];
            if *slot.seq.get_mut() != pos.wrapping_add(1) {
                break;
            }
            unsafe { slot.value.get_mut().assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}

/// Create a bounded task queue.  `capacity` is rounded up to a power
/// of two (minimum 2).  Each push makes at most `retries` attempts
/// (minimum 1) before giving up.
pub fn channel<T: Send>(capacity: usize, retries: u32) -> (TaskSender<T>, TaskReceiver<T>) {
    let capacity = capacity.max(2).next_power_of_two();
    let slots = (0..capacity)
        .map(|i| Slot {
            seq: AtomicUsize::new(i),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        })
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let ring = Arc::new(Ring {
        slots,
        mask: capacity - 1,
        retries: retries.max(1),
        tail: AtomicUsize::new(0),
        head: AtomicUsize::new(0),
    });
    (TaskSender { ring: ring.clone() }, TaskReceiver { ring })
}

/// Producer end of a task queue.  May be cloned and used from any
/// thread.
pub struct TaskSender<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            ring: self.ring.clone(),
        }
    }
}

impl<T: Send> TaskSender<T> {
    /// Push a value without blocking.  If the queue is full, or this
    /// producer loses the race for a slot on every retry, ownership
    /// of the value is handed back in `Err`.
    pub fn push(&self, value: T) -> Result<(), T> {
        let ring = &*self.ring;
        let mut pos = ring.tail.load(Ordering::Relaxed);
        for _ in 0..ring.retries {
            let slot = &ring.slots[pos & ring.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;
            if diff == 0 {
                match ring.tail.compare_exchange(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // The CAS gives this producer exclusive use of
                        // the slot until the sequence is published
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // Slot still holds a value from the previous lap
                return Err(value);
            } else {
                pos = ring.tail.load(Ordering::Relaxed);
            }
        }
        Err(value)
    }

    /// Number of slots in the queue
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}

/// Consumer end of a task queue.  There is exactly one, owned by the
/// worker that drains the queue.
pub struct TaskReceiver<T> {
    ring: Arc<Ring<T>>,
}

impl<T: Send> TaskReceiver<T> {
    /// Pop the oldest fully-written value, or `None`
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let pos = ring.head.load(Ordering::Relaxed);
        let slot = &ring.slots[pos & ring.mask];
        if slot.seq.load(Ordering::Acquire) != pos.wrapping_add(1) {
            return None;
        }
        // Sequence says the producer has finished writing, and only
        // this receiver reads slots
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.seq
            .store(pos.wrapping_add(ring.mask + 1), Ordering::Release);
        ring.head.store(pos.wrapping_add(1), Ordering::Relaxed);
        Some(value)
    }

    /// Approximate number of values queued.  Includes slots claimed
    /// by producers that are still writing.
    pub fn len(&self) -> usize {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let head = self.ring.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head).min(self.ring.mask + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}
