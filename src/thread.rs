use crate::task::panic_message;
use crate::{Error, HandlerResult, Outcome, Request};
use std::panic::AssertUnwindSafe;

impl<'a, D: 'static> Request<'a, D> {
    /// Run blocking `work` on a new thread and finish the request from
    /// its result
    ///
    /// When `work` returns, `then` is queued back onto this worker
    /// through the request's [`Resumer`], receiving either the value or
    /// the panic message if `work` panicked.  The result of `then` is
    /// applied like a handler result.  Return the `Outcome::Async`
    /// this gives back from the handler.
    ///
    /// If the worker's queue is full when `work` finishes, `then` is
    /// dropped and the failure is logged at the worker's next tick.
    ///
    /// [`Resumer`]: struct.Resumer.html
    pub fn offload<T: Send + 'static>(
        &self,
        work: impl FnOnce() -> T + Send + 'static,
        then: impl FnOnce(&mut Request<'_, D>, Result<T, String>) -> HandlerResult + Send + 'static,
    ) -> Result<Outcome, Error> {
        self.check_live()?;
        let resumer = self.resumer();
        std::thread::Builder::new()
            .name(format!("offload-{}", resumer.req()))
            .spawn(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(work)).map_err(panic_message);
                resumer.execute_on_worker(move |req| then(req, result));
            })
            .map_err(Error::Spawn)?;
        Ok(Outcome::Async)
    }
}
