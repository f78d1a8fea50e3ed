//! Deferred work carried across threads to a worker

use crate::WorkerContext;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// A single-shot unit of work for a worker
///
/// Ownership moves into the queue on push and out again on pop, and
/// the closure is consumed when run, so a task can execute at most
/// once.  Only the owning worker's [`WorkerContext::tick`] runs tasks.
///
/// [`WorkerContext::tick`]: ../struct.WorkerContext.html#method.tick
pub(crate) struct Task<D: 'static> {
    f: Box<dyn FnOnce(&mut WorkerContext<D>) + Send + 'static>,
}

impl<D: 'static> Task<D> {
    #[inline]
    pub fn new(f: impl FnOnce(&mut WorkerContext<D>) + Send + 'static) -> Self {
        Self { f: Box::new(f) }
    }

    #[inline]
    pub fn run(self, cx: &mut WorkerContext<D>) {
        (self.f)(cx)
    }
}

/// Run an application callback, converting both an `Err` return and a
/// panic into a message.  Nothing escapes past this point.
pub(crate) fn guarded<R>(f: impl FnOnce() -> anyhow::Result<R>) -> Result<R, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(e) => Err(panic_message(e)),
    }
}

/// Pass through panic message if it is a `String` or `&str`, else
/// generate some debugging output
pub(crate) fn panic_message(e: Box<dyn Any + Send>) -> String {
    match e.downcast::<String>() {
        Ok(v) => *v,
        Err(e) => match e.downcast::<&str>() {
            Ok(v) => v.to_string(),
            Err(e) => format!("Panic with unknown type: {:?}", (*e).type_id()),
        },
    }
}
