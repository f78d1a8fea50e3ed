use crate::log::{LogFilter, LogLevel, LogRecord};
use crate::queue::{channel, TaskReceiver};
use crate::request::{Phase, RequestState};
use crate::subrequest::SubrequestState;
use crate::task::{guarded, panic_message, Task};
use crate::{BodyRead, Engine, Error, HandlerResult, Outcome, PeerSelection, Remote, ReqId};
use crate::{Request, Routes, WorkerConfig};
use slab::Slab;
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt::Arguments;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

/// What the engine should do after [`WorkerContext::content_phase`]
///
/// [`WorkerContext::content_phase`]: struct.WorkerContext.html#method.content_phase
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ContentPhase {
    /// Request is now owned by the bridge.  The engine must not
    /// finalize it, but wait for the bridge to do so.
    Done,
    /// Respond with this status and finalize
    Status(u16),
}

/// The per-worker half of the bridge
///
/// One of these lives on each engine worker thread, created at worker
/// startup and dropped at worker shutdown.  It owns the engine
/// interface, the receiving end of the cross-thread task queue, and
/// all per-request and per-subrequest state.  It is not `Send`: every
/// method is called on the worker thread, either by the engine's event
/// loop through the hook methods or by tasks run from [`tick`].
///
/// The engine's event loop must call [`tick`] whenever the poll-waker
/// fires, and may call it more often.
///
/// `D` is application data owned by the worker and reachable from
/// every handler through [`Request::data_mut`].
///
/// [`Request::data_mut`]: struct.Request.html#method.data_mut
/// [`tick`]: struct.WorkerContext.html#method.tick
pub struct WorkerContext<D: 'static> {
    worker_id: u32,
    pub(crate) engine: Box<dyn Engine>,
    pub(crate) routes: Arc<Routes<D>>,
    remote: Remote<D>,
    receiver: TaskReceiver<Task<D>>,
    last_failed: u64,
    log_filter: LogFilter,
    logger: Option<Box<dyn Fn(&LogRecord<'_>)>>,
    data: D,
    pub(crate) requests: Slab<RequestState>,
    by_id: HashMap<ReqId, usize>,
    next_serial: u64,
    pub(crate) subrequests: Slab<SubrequestState<D>>,
    pub(crate) live_subrequests: Rc<Cell<usize>>,
    pub(crate) targets: HashMap<ReqId, PeerSelection>,
}

impl<D: 'static> WorkerContext<D> {
    /// Create the worker state.  `poll_waker` is called from whichever
    /// thread pushes a task, and must cause the engine's event loop to
    /// call [`tick`] soon.
    ///
    /// [`tick`]: struct.WorkerContext.html#method.tick
    pub fn new(
        config: WorkerConfig,
        engine: impl Engine + 'static,
        routes: Arc<Routes<D>>,
        data: D,
        poll_waker: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, Error> {
        config.validate()?;
        let (sender, receiver) = channel(config.queue_capacity, config.push_retries);
        Ok(Self {
            worker_id: config.worker_id,
            engine: Box::new(engine),
            routes,
            remote: Remote::new(sender, Box::new(poll_waker)),
            receiver,
            last_failed: 0,
            log_filter: config.log_filter,
            logger: None,
            data,
            requests: Slab::new(),
            by_id: HashMap::new(),
            next_serial: 1,
            subrequests: Slab::new(),
            live_subrequests: Rc::new(Cell::new(0)),
            targets: HashMap::new(),
        })
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Get a handle that other threads can use to run code on this
    /// worker
    pub fn remote(&self) -> Remote<D> {
        self.remote.clone()
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// Drain the task queue.  Runs every task that was visible when
    /// the call started, so tasks pushed meanwhile wait for the next
    /// tick.  Then, if the failed-push counter has moved since the
    /// last tick, logs the failure once at `Crit`.
    ///
    /// Returns the number of tasks run.
    pub fn tick(&mut self) -> usize {
        let visible = self.receiver.len();
        let mut ran = 0;
        while ran < visible {
            let task = match self.receiver.pop() {
                Some(task) => task,
                None => break,
            };
            ran += 1;
            if let Err(e) = panic::catch_unwind(AssertUnwindSafe(|| task.run(self))) {
                let msg = panic_message(e);
                self.log(LogLevel::Error, format_args!("worker task panicked: {}", msg));
            }
        }

        let failed = self.remote.failed_count();
        if failed != self.last_failed {
            self.log(
                LogLevel::Crit,
                format_args!(
                    "an async task was unable to be enqueued ({} lost since last tick)",
                    failed.wrapping_sub(self.last_failed)
                ),
            );
            self.last_failed = failed;
        }
        ran
    }

    /// Content-phase entry point for a request routed to a location
    /// with a registered handler
    pub fn content_phase(&mut self, req: ReqId) -> ContentPhase {
        let location = self.engine.location_id(req);
        let location = match location {
            Some(id) if self.routes.handler(id).is_some() => id,
            _ => {
                self.log_req(
                    LogLevel::Error,
                    req,
                    format_args!(
                        "unable to find handler related to the location {}",
                        LocationName(location)
                    ),
                );
                return ContentPhase::Status(500);
            }
        };

        if let Some(key) = self.by_id.remove(&req) {
            self.requests.remove(key);
        }
        let key = self.register(req, Phase::Received, Some(location));

        match self.engine.read_body(req) {
            BodyRead::Complete => {
                self.dispatch(key);
                ContentPhase::Done
            }
            BodyRead::Pending => ContentPhase::Done,
            BodyRead::Failed(rc) => {
                // Engine finalizes with the returned status itself
                self.requests[key].phase = Phase::Finalized;
                if rc >= 300 && rc <= i32::from(u16::MAX) {
                    ContentPhase::Status(rc as u16)
                } else {
                    self.log_req(
                        LogLevel::Error,
                        req,
                        format_args!("failed to read request body: engine returned {}", rc),
                    );
                    ContentPhase::Status(500)
                }
            }
        }
    }

    /// The request body has been fully buffered.  Runs the handler.
    pub fn body_ready(&mut self, req: ReqId) {
        let key = match self.by_id.get(&req) {
            Some(&key) => key,
            None => {
                self.log_req(
                    LogLevel::Warn,
                    req,
                    format_args!("body ready for a request that is not registered"),
                );
                return;
            }
        };
        assert!(
            self.requests[key].phase == Phase::Received,
            "handler for request {} invoked more than once",
            req
        );
        self.dispatch(key);
    }

    /// The engine has reclaimed the request.  All state for it is
    /// dropped, and continuations still queued for it will be dropped
    /// when they arrive.
    pub fn request_released(&mut self, req: ReqId) {
        if let Some(key) = self.by_id.remove(&req) {
            self.requests.remove(key);
        }
        self.targets.remove(&req);
    }

    /// Get a handle to a registered request
    pub fn request(&mut self, req: ReqId) -> Option<Request<'_, D>> {
        let key = *self.by_id.get(&req)?;
        Some(Request::new(self, key))
    }

    /// Create a synthetic request that exists only to host
    /// subrequests, for work that doesn't originate from a client
    /// request.  It is finalized like any other request.
    pub fn new_anchor(&mut self, server_id: u64) -> Result<ReqId, Error> {
        let req = self
            .engine
            .new_anchor(server_id)
            .map_err(Error::engine("create anchor request"))?;
        let key = self.register(req, Phase::Handling, None);
        self.requests[key].anchor = true;
        Ok(req)
    }

    /// Number of registered requests not yet released by the engine
    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    /// Number of subrequests created but whose completion has not yet
    /// been handled.  Drops back to zero once every subrequest has
    /// completed or failed to be created.
    pub fn live_subrequests(&self) -> usize {
        self.live_subrequests.get()
    }

    /// Change the log filter
    pub fn set_log_filter(&mut self, filter: LogFilter) {
        self.log_filter = filter;
    }

    /// Send log records to `logger` instead of the engine's log sink
    pub fn set_logger(&mut self, filter: LogFilter, logger: impl Fn(&LogRecord<'_>) + 'static) {
        self.log_filter = filter;
        self.logger = Some(Box::new(logger));
    }

    /// Log a message not tied to any request
    pub fn log(&self, level: LogLevel, fmt: Arguments<'_>) {
        self.emit(level, None, fmt);
    }

    pub(crate) fn log_req(&self, level: LogLevel, req: ReqId, fmt: Arguments<'_>) {
        self.emit(level, Some(req), fmt);
    }

    fn emit(&self, level: LogLevel, req: Option<ReqId>, fmt: Arguments<'_>) {
        if !self.log_filter.allows(level) {
            return;
        }
        match self.logger {
            Some(ref logger) => logger(&LogRecord {
                worker: self.worker_id,
                level,
                req,
                fmt,
            }),
            None => {
                let msg = match req {
                    Some(req) => format!("request {}: {}", req, fmt),
                    None => fmt.to_string(),
                };
                self.engine.log(level, &msg);
            }
        }
    }

    fn register(&mut self, req: ReqId, phase: Phase, location: Option<u64>) -> usize {
        let serial = self.next_serial();
        let key = self
            .requests
            .insert(RequestState::new(req, serial, phase, location));
        self.by_id.insert(req, key);
        key
    }

    pub(crate) fn next_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    pub(crate) fn key_of(&self, req: ReqId) -> Option<usize> {
        self.by_id.get(&req).copied()
    }

    fn dispatch(&mut self, key: usize) {
        self.requests[key].phase = Phase::Handling;
        let routes = self.routes.clone();
        let handler = self.requests[key]
            .location
            .and_then(|location| routes.handler(location));
        let result = match handler {
            Some(handler) => {
                let mut req = Request::new(self, key);
                guarded(|| handler(&mut req))
            }
            None => Err("location handler disappeared".to_string()),
        };
        self.apply(key, result);
    }

    /// Run a continuation pushed by a [`Resumer`].  Only a request
    /// whose handler has started and is not running a continuation
    /// already can be resumed.
    ///
    /// [`Resumer`]: struct.Resumer.html
    pub(crate) fn resume(
        &mut self,
        key: usize,
        serial: u64,
        f: impl FnOnce(&mut Request<'_, D>) -> HandlerResult,
    ) {
        let (req, phase) = match self.requests.get(key) {
            Some(st) if st.serial == serial => (st.id, st.phase),
            _ => {
                self.log(
                    LogLevel::Warn,
                    format_args!("dropping continuation for a request that has been released"),
                );
                return;
            }
        };
        match phase {
            Phase::Handling | Phase::Suspended => (),
            Phase::Finalized => {
                self.log_req(
                    LogLevel::Alert,
                    req,
                    format_args!("continuation for a finalized request rejected"),
                );
                return;
            }
            Phase::Received | Phase::Resumed => {
                self.log_req(
                    LogLevel::Alert,
                    req,
                    format_args!("continuation for a request in phase {:?} rejected", phase),
                );
                return;
            }
        }
        self.requests[key].phase = Phase::Resumed;
        let result = {
            let mut req = Request::new(self, key);
            guarded(|| f(&mut req))
        };
        self.apply(key, result);
    }

    /// Act on the result of a handler, continuation or subrequest
    /// callback for the request at `key`
    pub(crate) fn apply(&mut self, key: usize, result: Result<Outcome, String>) {
        match result {
            Ok(Outcome::Async) => {
                let st = &mut self.requests[key];
                if st.phase != Phase::Finalized {
                    st.phase = Phase::Suspended;
                }
            }
            Ok(outcome) => self.finalize(key, outcome.rc()),
            Err(msg) => {
                let req = self.requests[key].id;
                self.log_req(
                    LogLevel::Error,
                    req,
                    format_args!("failed to handle the request: {}", msg),
                );
                self.finalize(key, 500);
            }
        }
    }

    pub(crate) fn finalize(&mut self, key: usize, rc: i32) {
        let st = &mut self.requests[key];
        assert!(
            st.phase != Phase::Finalized,
            "request {} finalized twice",
            st.id
        );
        st.phase = Phase::Finalized;
        let req = st.id;
        self.engine.finalize(req, rc);
    }

    pub(crate) fn finalize_id(&mut self, req: ReqId, rc: i32) {
        match self.key_of(req) {
            Some(key) if self.requests[key].phase != Phase::Finalized => self.finalize(key, rc),
            Some(_) => self.log_req(
                LogLevel::Warn,
                req,
                format_args!("finalize skipped, request already finalized"),
            ),
            None => self.log_req(
                LogLevel::Warn,
                req,
                format_args!("finalize skipped, request has been released"),
            ),
        }
    }
}

impl<D: 'static> Drop for WorkerContext<D> {
    fn drop(&mut self) {
        // Queued tasks are dropped unrun.  Tasks pushed after this
        // point are freed with the queue when the last `Remote` goes.
        while let Some(task) = self.receiver.pop() {
            drop(task);
        }
    }
}

struct LocationName(Option<u64>);

impl std::fmt::Display for LocationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{}", id),
            None => write!(f, "(none)"),
        }
    }
}
