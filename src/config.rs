use crate::log::{LogFilter, LogLevel};
use crate::Error;

/// Per-worker settings, fixed when the [`WorkerContext`] is created
///
/// [`WorkerContext`]: struct.WorkerContext.html
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifies the worker in log records
    pub worker_id: u32,
    /// Slots in the cross-thread task queue.  Rounded up to a power of
    /// two.
    pub queue_capacity: usize,
    /// Attempts a producer makes to claim a queue slot before the push
    /// counts as failed
    pub push_retries: u32,
    /// Levels that are logged
    pub log_filter: LogFilter,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            queue_capacity: 4096,
            push_retries: 8,
            log_filter: LogFilter::from(LogLevel::Info),
        }
    }
}

impl WorkerConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be non-zero"));
        }
        if self.push_retries == 0 {
            return Err(Error::Config("push_retries must be non-zero"));
        }
        Ok(())
    }

    /// Queue size actually allocated
    pub fn effective_capacity(&self) -> usize {
        self.queue_capacity.max(2).next_power_of_two()
    }
}
