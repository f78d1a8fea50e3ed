//! Handles for reaching a worker from other threads
//!
//! A [`Remote`] pushes closures onto a worker's bounded task queue and
//! then wakes the worker's event loop through the poll-waker supplied
//! when the worker was created.  The push never blocks.  If it fails
//! (queue full, or the producer lost the race for a slot on every
//! retry) the task is dropped on the calling thread, a shared atomic
//! counter is bumped, and the worker reports the change at its next
//! tick.  That counter is the only state written by more than one
//! thread.
//!
//! A [`Resumer`] is a [`Remote`] bound to one suspended request.  It
//! is how application code finishes a request whose handler returned
//! [`Outcome::Async`].
//!
//! [`Outcome::Async`]: enum.Outcome.html#variant.Async
//! [`Remote`]: struct.Remote.html
//! [`Resumer`]: struct.Resumer.html

use crate::queue::TaskSender;
use crate::task::Task;
use crate::{HandlerResult, ReqId, Request, WorkerContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) struct Shared<D: 'static> {
    sender: TaskSender<Task<D>>,
    failed: AtomicU64,
    poll_waker: Box<dyn Fn() + Send + Sync + 'static>,
}

/// Send-able handle used to run code on a worker thread
///
/// Obtain one with [`WorkerContext::remote`] and pass it to any
/// thread.  Cloning is cheap.
///
/// [`WorkerContext::remote`]: struct.WorkerContext.html#method.remote
pub struct Remote<D: 'static> {
    shared: Arc<Shared<D>>,
}

impl<D: 'static> Remote<D> {
    pub(crate) fn new(
        sender: TaskSender<Task<D>>,
        poll_waker: Box<dyn Fn() + Send + Sync + 'static>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sender,
                failed: AtomicU64::new(0),
                poll_waker,
            }),
        }
    }

    /// Queue a closure to run on the worker at its next tick, and
    /// wake the worker.  Returns `false` if the task could not be
    /// queued, in which case it has been dropped and the failure will
    /// be logged by the worker.
    pub fn execute(&self, f: impl FnOnce(&mut WorkerContext<D>) + Send + 'static) -> bool {
        self.push(Task::new(f)).is_ok()
    }

    pub(crate) fn push(&self, task: Task<D>) -> Result<(), Task<D>> {
        let rv = self.shared.sender.push(task);
        if rv.is_err() {
            self.shared.failed.fetch_add(1, Ordering::Relaxed);
        }
        // Always wake, even on failure: the worker must get to tick
        // to report it
        (self.shared.poll_waker)();
        rv
    }

    /// Total number of failed pushes so far.  Never decreases.
    pub fn failed_count(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }
}

impl<D: 'static> Clone for Remote<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Send-able handle used to resume a suspended request
///
/// Obtained from [`Request::resumer`].  The request is identified by
/// its arena slot plus a serial number, so a [`Resumer`] that
/// outlives its request can never touch a request that later reuses
/// the same slot.
///
/// [`Request::resumer`]: struct.Request.html#method.resumer
/// [`Resumer`]: struct.Resumer.html
pub struct Resumer<D: 'static> {
    remote: Remote<D>,
    key: usize,
    serial: u64,
    req: ReqId,
}

impl<D: 'static> Resumer<D> {
    pub(crate) fn new(remote: Remote<D>, key: usize, serial: u64, req: ReqId) -> Self {
        Self {
            remote,
            key,
            serial,
            req,
        }
    }

    /// The engine request this resumes
    pub fn req(&self) -> ReqId {
        self.req
    }

    /// Queue `f` to run on the owning worker with the request, and
    /// wake the worker.  May be called from any thread.
    ///
    /// When run, the result of `f` is treated exactly like a handler
    /// result: [`Outcome::Async`] leaves the request pending,
    /// anything else finalizes it, and an error or panic finalizes it
    /// with status 500.  If the request has gone away by then, `f` is
    /// dropped without running.
    ///
    /// Returns `false` if the task could not be queued.  The request
    /// then stays open until the engine reclaims it.
    ///
    /// [`Outcome::Async`]: enum.Outcome.html#variant.Async
    pub fn execute_on_worker(
        &self,
        f: impl FnOnce(&mut Request<'_, D>) -> HandlerResult + Send + 'static,
    ) -> bool {
        let key = self.key;
        let serial = self.serial;
        self.remote
            .push(Task::new(move |cx| cx.resume(key, serial, f)))
            .is_ok()
    }
}

impl<D: 'static> Clone for Resumer<D> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            key: self.key,
            serial: self.serial,
            req: self.req,
        }
    }
}
