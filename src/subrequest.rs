//! Child requests issued from a handler, with a completion callback
//!
//! Each child gets a state record in the worker's subrequest arena,
//! created before the engine is asked for the child and holding one
//! count on the worker's live-subrequest counter.  The record is
//! removed, and the count released, in exactly one place for each
//! path: when creation fails, or after the completion callback and any
//! finalization it triggers have run.

use crate::log::LogLevel;
use crate::request::Phase;
use crate::task::guarded;
use crate::{
    Error, HandlerResult, Method, Outcome, PeerSelection, ReqId, Request, SubrequestArgs,
    SubrequestResult, WorkerContext,
};
use bytes::Bytes;
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

/// Identifies a pending subrequest to
/// [`WorkerContext::subrequest_done`]
///
/// [`WorkerContext::subrequest_done`]: struct.WorkerContext.html#method.subrequest_done
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SubToken {
    key: usize,
    serial: u64,
}

/// Description of a child request
///
/// ```
///# use loopbridge::{Method, Subrequest};
/// let sub = Subrequest::new(Method::Post, "/api/items")
///     .args("page=2")
///     .header("Content-Type", "application/json")
///     .body_copied(b"{}")
///     .target("127.0.0.1:8080".parse().unwrap());
///# let _ = sub;
/// ```
#[derive(Debug, Clone)]
pub struct Subrequest {
    method: Method,
    uri: String,
    args: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    target: Option<SocketAddr>,
    main: Option<ReqId>,
}

impl Subrequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            args: None,
            headers: Vec::new(),
            body: None,
            target: None,
            main: None,
        }
    }

    /// Query string for the child, without the `?`
    pub fn args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// Extra request header for the child
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Request body for the child, copied now
    pub fn body_copied(mut self, body: &[u8]) -> Self {
        self.body = Some(Bytes::copy_from_slice(body));
        self
    }

    /// Request body for the child, referenced without copying
    pub fn body_shared(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    /// Send the child to this peer, overriding any resolver registered
    /// for the upstream it is routed to
    pub fn target(mut self, addr: SocketAddr) -> Self {
        self.target = Some(addr);
        self
    }

    /// Run the completion callback against `main` rather than against
    /// the root request of the issuing chain.  Both are finalized when
    /// the callback finishes: root first, then `main`.
    pub fn main(mut self, main: ReqId) -> Self {
        self.main = Some(main);
        self
    }
}

/// Child request outcome handed to the completion callback
#[derive(Debug, Clone)]
pub struct SubResponse {
    pub child: ReqId,
    /// Engine return code for the child, zero on success
    pub rc: i32,
    pub status: u16,
    pub body: Bytes,
}

type SubCallback<D> = Box<dyn FnOnce(&mut Request<'_, D>, SubResponse) -> HandlerResult>;

// One count on the worker's live-subrequest counter
struct Retain(Rc<Cell<usize>>);

impl Retain {
    fn new(count: &Rc<Cell<usize>>) -> Self {
        count.set(count.get() + 1);
        Self(count.clone())
    }
}

impl Drop for Retain {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

pub(crate) struct SubrequestState<D: 'static> {
    serial: u64,
    root: ReqId,
    main: Option<ReqId>,
    child: Option<ReqId>,
    target: Option<PeerSelection>,
    inited: bool,
    callback: Option<SubCallback<D>>,
    _retain: Retain,
}

impl<'a, D: 'static> Request<'a, D> {
    /// Issue a child request.  `callback` runs on this worker when the
    /// child completes, against the root request of this chain (or the
    /// one given with [`Subrequest::main`]), and its result is applied
    /// to that request like a handler result.
    ///
    /// If this request is an anchor, the engine's posted requests are
    /// run straight away, since there is no engine event in progress
    /// to pick the child up.
    ///
    /// [`Subrequest::main`]: struct.Subrequest.html#method.main
    pub fn send_request(
        &mut self,
        sub: Subrequest,
        callback: impl FnOnce(&mut Request<'_, D>, SubResponse) -> HandlerResult + 'static,
    ) -> Result<SubToken, Error> {
        self.check_live()?;
        let parent = self.id();
        let anchor = self.is_anchor();
        let cx = self.cx();

        let serial = cx.next_serial();
        let state = SubrequestState {
            serial,
            root: cx.engine.main_of(parent),
            main: sub.main,
            child: None,
            target: sub.target.map(PeerSelection::from),
            inited: false,
            callback: Some(Box::new(callback)),
            _retain: Retain::new(&cx.live_subrequests),
        };
        let token = SubToken {
            key: cx.subrequests.insert(state),
            serial,
        };

        let args = SubrequestArgs {
            method: sub.method,
            uri: sub.uri,
            args: sub.args,
            headers: sub.headers,
            body: sub.body,
        };
        match cx.engine.subrequest(parent, args, token) {
            Ok(child) => {
                cx.init_subrequest(token, child);
                if anchor {
                    cx.engine.run_posted(parent);
                }
                Ok(token)
            }
            Err(e) => {
                drop(cx.subrequests.remove(token.key));
                cx.log_req(
                    LogLevel::Error,
                    parent,
                    format_args!("failed to create subrequest: {}", e),
                );
                Err(Error::engine("create subrequest")(e))
            }
        }
    }
}

impl<D: 'static> WorkerContext<D> {
    fn init_subrequest(&mut self, token: SubToken, child: ReqId) {
        let st = &mut self.subrequests[token.key];
        st.child = Some(child);
        if let Some(target) = st.target {
            self.targets.insert(child, target);
        }
        st.inited = true;
    }

    /// The child identified by `token` has completed.  Runs the
    /// completion callback and applies its outcome: unless it is
    /// [`Outcome::Async`], the root request is finalized, and then the
    /// callback's main request if that is a different one.  Errors and
    /// panics from the callback finalize with status 500.  If the
    /// callback's request has been finalized or released, the callback
    /// is skipped and a root that is still open is finalized with 500.
    ///
    /// When the engine runs the child to completion inside
    /// [`Engine::run_posted`], this must not be called from there.
    /// Deliver the completion later instead, for example through
    /// [`WorkerContext::remote`].
    ///
    /// Panics if called twice for the same token.
    ///
    /// [`Engine::run_posted`]: trait.Engine.html#tymethod.run_posted
    /// [`Outcome::Async`]: enum.Outcome.html#variant.Async
    /// [`WorkerContext::remote`]: struct.WorkerContext.html#method.remote
    pub fn subrequest_done(&mut self, token: SubToken, result: SubrequestResult) {
        let live = matches!(self.subrequests.get(token.key), Some(st) if st.serial == token.serial);
        assert!(
            live,
            "subrequest completion fired twice or for an unknown token: {:?}",
            token
        );
        let mut state = self.subrequests.remove(token.key);
        assert!(
            state.inited,
            "subrequest completion fired before the child was initialised"
        );
        if let Some(child) = state.child {
            self.targets.remove(&child);
        }

        let caller = state.main.unwrap_or(state.root);
        let key = match self.key_of(caller) {
            Some(key) if self.requests[key].phase != Phase::Finalized => key,
            _ => {
                self.log_req(
                    LogLevel::Warn,
                    caller,
                    format_args!("subrequest completed after its caller went away"),
                );
                // Callback is skipped, but a root that is still open
                // would otherwise never be finalized
                let root_open = matches!(
                    self.key_of(state.root),
                    Some(key) if self.requests[key].phase != Phase::Finalized
                );
                if state.root != caller && root_open {
                    self.finalize_id(state.root, 500);
                }
                return;
            }
        };
        let callback = match state.callback.take() {
            Some(cb) => cb,
            None => return,
        };

        let resp = SubResponse {
            child: result.child,
            rc: result.rc,
            status: result.status,
            body: result.body,
        };
        let resumed = self.requests[key].phase == Phase::Suspended;
        if resumed {
            self.requests[key].phase = Phase::Resumed;
        }
        let result = {
            let mut req = Request::new(self, key);
            guarded(|| callback(&mut req, resp))
        };

        let rc = match result {
            Ok(Outcome::Async) => {
                if resumed && self.requests[key].phase == Phase::Resumed {
                    self.requests[key].phase = Phase::Suspended;
                }
                None
            }
            Ok(outcome) => Some(outcome.rc()),
            Err(msg) => {
                self.log_req(
                    LogLevel::Error,
                    caller,
                    format_args!("subrequest callback failed: {}", msg),
                );
                Some(500)
            }
        };
        if let Some(rc) = rc {
            self.finalize_id(state.root, rc);
            if let Some(main) = state.main {
                if main != state.root {
                    self.finalize_id(main, rc);
                }
            }
        }
        // Releases the count only now, after the callback and any
        // finalization
        drop(state);
    }
}
