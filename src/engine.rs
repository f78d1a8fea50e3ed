//! Interface to the embedded request-processing engine
//!
//! The engine itself (routing, I/O, buffering, connections) lives
//! outside this crate.  [`Engine`] is the surface this crate consumes
//! from it.  All calls are made on the engine's own worker thread.
//! Calls in the other direction, from the engine into this crate, go
//! through the hook methods on [`WorkerContext`].
//!
//! [`Engine`]: trait.Engine.html
//! [`WorkerContext`]: ../struct.WorkerContext.html

use crate::log::LogLevel;
use crate::peer::PeerSelection;
use crate::subrequest::SubToken;
use crate::EngineError;
use bytes::Bytes;
use std::fmt;

/// Opaque identifier of an engine-owned request object
///
/// The engine chooses these values.  They are only ever compared and
/// handed back to the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ReqId(pub u64);

impl fmt::Display for ReqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// HTTP request method
///
/// The engine reports methods as a bitmask.  [`Method::from_mask`]
/// decodes it, checking bits in the same priority order as the
/// engine.
///
/// [`Method::from_mask`]: enum.Method.html#method.from_mask
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Method {
    Unknown = 0x0000_0001,
    Get = 0x0000_0002,
    Head = 0x0000_0004,
    Post = 0x0000_0008,
    Put = 0x0000_0010,
    Delete = 0x0000_0020,
    Mkcol = 0x0000_0040,
    Copy = 0x0000_0080,
    Move = 0x0000_0100,
    Options = 0x0000_0200,
    Propfind = 0x0000_0400,
    Proppatch = 0x0000_0800,
    Lock = 0x0000_1000,
    Unlock = 0x0000_2000,
    Patch = 0x0000_4000,
    Trace = 0x0000_8000,
    Connect = 0x0001_0000,
}

impl Method {
    const ALL: [Method; 17] = [
        Method::Unknown,
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Mkcol,
        Method::Copy,
        Method::Move,
        Method::Options,
        Method::Propfind,
        Method::Proppatch,
        Method::Lock,
        Method::Unlock,
        Method::Patch,
        Method::Trace,
        Method::Connect,
    ];

    /// Decode an engine method bitmask.  The first matching bit wins;
    /// no bits set gives `Unknown`.
    pub fn from_mask(mask: u32) -> Method {
        Self::ALL
            .iter()
            .copied()
            .find(|m| 0 != mask & (*m as u32))
            .unwrap_or(Method::Unknown)
    }

    /// The engine bitmask for this method
    pub fn mask(self) -> u32 {
        self as u32
    }
}

/// Result of asking the engine to read the client request body
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BodyRead {
    /// The whole body is already buffered
    Complete,
    /// The engine will call [`WorkerContext::body_ready`] once the
    /// whole body has been buffered
    ///
    /// [`WorkerContext::body_ready`]: ../struct.WorkerContext.html#method.body_ready
    Pending,
    /// Reading failed.  A code of 300 or above is an HTTP status to
    /// respond with.
    Failed(i32),
}

/// One buffer of the request body chain
#[derive(Debug)]
pub enum BodyBuf<'a> {
    InMemory(&'a [u8]),
    /// Body data spooled to a file, which cannot be exposed to
    /// handlers
    InFile,
}

/// An output chunk handed to the engine's output filter
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutChunk {
    pub data: Bytes,
    /// Transmit immediately rather than buffering
    pub flush: bool,
    /// This is the terminal chunk of the response
    pub last: bool,
}

/// Everything the engine needs to create a child request
#[derive(Debug, Clone)]
pub struct SubrequestArgs {
    pub method: Method,
    pub uri: String,
    pub args: Option<String>,
    /// Extra request headers for the child
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// Status of a completed child request, passed to
/// [`WorkerContext::subrequest_done`]
///
/// [`WorkerContext::subrequest_done`]: ../struct.WorkerContext.html#method.subrequest_done
#[derive(Debug, Clone)]
pub struct SubrequestResult {
    pub child: ReqId,
    /// Engine return code for the child, zero on success
    pub rc: i32,
    /// Response status of the child
    pub status: u16,
    /// Accumulated response body of the child
    pub body: Bytes,
}

/// Operations this crate needs from the engine
///
/// An implementation is owned by a [`WorkerContext`] and is only
/// called from that worker's thread.  Failing calls return the
/// engine's code in an [`EngineError`].
///
/// [`EngineError`]: struct.EngineError.html
/// [`WorkerContext`]: ../struct.WorkerContext.html
pub trait Engine {
    /// Log sink accepting a severity level and a message
    fn log(&self, level: LogLevel, msg: &str);

    /// Numeric id of the location that routed this request to us, if
    /// any
    fn location_id(&self, req: ReqId) -> Option<u64>;

    /// Method bitmask, see [`Method::from_mask`]
    ///
    /// [`Method::from_mask`]: enum.Method.html#method.from_mask
    fn method(&self, req: ReqId) -> u32;

    fn uri(&self, req: ReqId) -> &[u8];

    fn args(&self, req: ReqId) -> Option<&[u8]>;

    /// Visit the request headers in the order received
    fn visit_headers(&self, req: ReqId, visit: &mut dyn FnMut(&[u8], &[u8]));

    /// Start reading the client request body
    fn read_body(&mut self, req: ReqId) -> BodyRead;

    /// Visit the buffered request body chain.  Visits nothing if there
    /// is no body.
    fn visit_body(&self, req: ReqId, visit: &mut dyn FnMut(BodyBuf<'_>));

    /// The root request of the subrequest chain containing `req`,
    /// which is `req` itself for a top-level request
    fn main_of(&self, req: ReqId) -> ReqId;

    fn set_status(&mut self, req: ReqId, status: u16);

    fn add_header_out(&mut self, req: ReqId, key: &str, value: &str) -> Result<(), EngineError>;

    fn set_content_length(&mut self, req: ReqId, len: u64);

    /// Mark the response as having no body
    fn set_header_only(&mut self, req: ReqId);

    fn send_header(&mut self, req: ReqId) -> Result<(), EngineError>;

    fn output(&mut self, req: ReqId, chunk: OutChunk) -> Result<(), EngineError>;

    /// Finalize the request with the given return code.  Zero means
    /// success with whatever status was already set.
    fn finalize(&mut self, req: ReqId, rc: i32);

    /// Create a child request of `parent`, allocated in the parent's
    /// arena.  `token` must be passed back to
    /// [`WorkerContext::subrequest_done`] exactly once when the child
    /// completes.  The child must not be dispatched before control
    /// returns to the engine's event loop, except by [`run_posted`].
    ///
    /// [`run_posted`]: trait.Engine.html#tymethod.run_posted
    /// [`WorkerContext::subrequest_done`]: ../struct.WorkerContext.html#method.subrequest_done
    fn subrequest(
        &mut self,
        parent: ReqId,
        args: SubrequestArgs,
        token: SubToken,
    ) -> Result<ReqId, EngineError>;

    /// Create a synthetic request attached to the given server, for
    /// use purely as a host for subrequests
    fn new_anchor(&mut self, server_id: u64) -> Result<ReqId, EngineError>;

    /// Run posted (pending) requests on the connection of `req`.
    /// Needed when subrequests are issued outside of the engine's own
    /// event handling, i.e. from an anchor.
    ///
    /// This is called from inside [`Request::send_request`], while the
    /// worker is borrowed.  A child that completes during this call
    /// must have its completion deferred: queue it with
    /// [`Remote::execute`] or hold it until the event loop regains
    /// control, and only then call
    /// [`WorkerContext::subrequest_done`].
    ///
    /// [`Remote::execute`]: ../struct.Remote.html#method.execute
    /// [`Request::send_request`]: ../struct.Request.html#method.send_request
    /// [`WorkerContext::subrequest_done`]: ../struct.WorkerContext.html#method.subrequest_done
    fn run_posted(&mut self, req: ReqId);

    /// Copy a selected upstream peer into the request's arena for use
    /// by the pending connection attempt
    fn set_peer(&mut self, req: ReqId, peer: &PeerSelection) -> Result<(), EngineError>;
}
