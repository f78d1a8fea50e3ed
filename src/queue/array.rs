use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

// Safe alternative to the ring.  `ArrayQueue` is lock-free rather than
// wait-free: a push retries internally until it either succeeds or
// finds the queue full, so `retries` is not used.

/// Create a bounded task queue.  `capacity` is rounded up to a power
/// of two (minimum 2) to match the ring back-end.
pub fn channel<T: Send>(capacity: usize, _retries: u32) -> (TaskSender<T>, TaskReceiver<T>) {
    let capacity = capacity.max(2).next_power_of_two();
    let queue = Arc::new(ArrayQueue::new(capacity));
    (
        TaskSender {
            queue: queue.clone(),
        },
        TaskReceiver { queue },
    )
}

/// Producer end of a task queue.  May be cloned and used from any
/// thread.
pub struct TaskSender<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
        }
    }
}

impl<T: Send> TaskSender<T> {
    /// Push a value without blocking.  If the queue is full, ownership
    /// of the value is handed back in `Err`.
    pub fn push(&self, value: T) -> Result<(), T> {
        self.queue.push(value)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Consumer end of a task queue
pub struct TaskReceiver<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T: Send> TaskReceiver<T> {
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
