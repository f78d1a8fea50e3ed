//! Per-request handle used by handlers and continuations

use crate::log::LogLevel;
use crate::{BodyBuf, Error, Method, OutChunk, ReqId, Resumer, WorkerContext};
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt::Arguments;

/// What a handler, continuation or subrequest callback tells the bridge
/// to do next
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Finalize the request successfully, with whatever status was
    /// already set
    Ok,
    /// Finalize the request with this status code
    Status(u16),
    /// Leave the request open.  Some later continuation or subrequest
    /// callback will finish it.
    Async,
}

impl Outcome {
    pub(crate) fn rc(self) -> i32 {
        match self {
            Outcome::Ok | Outcome::Async => 0,
            Outcome::Status(code) => i32::from(code),
        }
    }
}

/// Return type of every application callback.  An `Err` finalizes the
/// request with status 500.
pub type HandlerResult = anyhow::Result<Outcome>;

/// Lifecycle of a request as seen by the bridge
///
/// `Received → Handling → (Suspended ⇄ Resumed)* → Finalized`.  Anchor
/// requests start in `Handling`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    /// Waiting for the request body
    Received,
    /// The handler is running
    Handling,
    /// Waiting for a continuation or subrequest completion
    Suspended,
    /// A continuation or subrequest callback is running
    Resumed,
    /// Terminal
    Finalized,
}

pub(crate) struct RequestState {
    pub id: ReqId,
    pub serial: u64,
    pub phase: Phase,
    pub location: Option<u64>,
    pub anchor: bool,
    pub headers_sent: bool,
    pub ended: bool,
    uri: Option<String>,
    headers: Option<Vec<(String, String)>>,
    body: Option<Vec<u8>>,
}

impl RequestState {
    pub fn new(id: ReqId, serial: u64, phase: Phase, location: Option<u64>) -> Self {
        Self {
            id,
            serial,
            phase,
            location,
            anchor: false,
            headers_sent: false,
            ended: false,
            uri: None,
            headers: None,
            body: None,
        }
    }
}

/// Access to one request, valid only on its worker thread
///
/// Handed to handlers, continuations and subrequest callbacks.  It
/// borrows the [`WorkerContext`], so it cannot be kept beyond the
/// callback.  Use [`resumer`] to get something that can.
///
/// Request data (URI, headers, body) is decoded on first access and
/// memoized for the rest of the request's life.  Output follows the
/// usual HTTP order: `status` and `add_header` first, then zero or
/// more `send` calls, then exactly one `end`.
///
/// [`WorkerContext`]: struct.WorkerContext.html
/// [`resumer`]: struct.Request.html#method.resumer
pub struct Request<'a, D: 'static> {
    cx: &'a mut WorkerContext<D>,
    key: usize,
}

impl<'a, D: 'static> Request<'a, D> {
    pub(crate) fn new(cx: &'a mut WorkerContext<D>, key: usize) -> Self {
        Self { cx, key }
    }

    #[inline]
    fn state(&self) -> &RequestState {
        &self.cx.requests[self.key]
    }

    #[inline]
    fn state_mut(&mut self) -> &mut RequestState {
        &mut self.cx.requests[self.key]
    }

    pub(crate) fn cx(&mut self) -> &mut WorkerContext<D> {
        &mut *self.cx
    }

    pub(crate) fn key(&self) -> usize {
        self.key
    }

    pub fn id(&self) -> ReqId {
        self.state().id
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Whether this is an anchor request, see
    /// [`WorkerContext::new_anchor`]
    ///
    /// [`WorkerContext::new_anchor`]: struct.WorkerContext.html#method.new_anchor
    pub fn is_anchor(&self) -> bool {
        self.state().anchor
    }

    pub fn method(&self) -> Method {
        Method::from_mask(self.cx.engine.method(self.id()))
    }

    /// Request path, decoded lossily as UTF-8
    pub fn uri(&mut self) -> &str {
        if self.state().uri.is_none() {
            let uri = String::from_utf8_lossy(self.cx.engine.uri(self.id())).into_owned();
            self.state_mut().uri = Some(uri);
        }
        self.state().uri.as_deref().unwrap_or("")
    }

    /// Query string, without the `?`
    pub fn args(&self) -> Option<Cow<'_, str>> {
        self.cx
            .engine
            .args(self.id())
            .map(String::from_utf8_lossy)
    }

    /// All request headers in the order received
    pub fn headers(&mut self) -> &[(String, String)] {
        if self.state().headers.is_none() {
            let mut headers = Vec::new();
            self.cx.engine.visit_headers(self.id(), &mut |k, v| {
                headers.push((
                    String::from_utf8_lossy(k).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                ))
            });
            self.state_mut().headers = Some(headers);
        }
        self.state().headers.as_deref().unwrap_or(&[])
    }

    /// First header with this name, compared case-insensitively
    pub fn header(&mut self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request body, concatenated from the engine's buffer chain.  If
    /// any part of the body was spooled to a file, an error is logged
    /// and the body is empty.
    pub fn body(&mut self) -> &[u8] {
        if self.state().body.is_none() {
            let body = self.collect_body();
            self.state_mut().body = Some(body);
        }
        self.state().body.as_deref().unwrap_or(&[])
    }

    fn collect_body(&self) -> Vec<u8> {
        let id = self.id();
        let mut len = 0;
        let mut in_file = false;
        self.cx.engine.visit_body(id, &mut |buf| match buf {
            BodyBuf::InMemory(data) => len += data.len(),
            BodyBuf::InFile => in_file = true,
        });
        if in_file {
            self.log(LogLevel::Error, format_args!("req body is not in memory"));
            return Vec::new();
        }
        let mut body = Vec::with_capacity(len);
        self.cx.engine.visit_body(id, &mut |buf| {
            if let BodyBuf::InMemory(data) = buf {
                body.extend_from_slice(data);
            }
        });
        body
    }

    /// Worker-owned application data
    pub fn data(&self) -> &D {
        self.cx.data()
    }

    pub fn data_mut(&mut self) -> &mut D {
        self.cx.data_mut()
    }

    /// Log against this request
    pub fn log(&self, level: LogLevel, fmt: Arguments<'_>) {
        self.cx.log_req(level, self.id(), fmt);
    }

    pub(crate) fn check_live(&self) -> Result<(), Error> {
        let st = self.state();
        if st.phase == Phase::Finalized {
            return Err(Error::Finalized(st.id));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), Error> {
        self.check_live()?;
        if self.state().ended {
            return Err(Error::Ended);
        }
        Ok(())
    }

    fn check_header_open(&self) -> Result<(), Error> {
        self.check_writable()?;
        if self.state().headers_sent {
            return Err(Error::HeadersSent);
        }
        Ok(())
    }

    /// Set the response status.  Only before the header is sent.
    pub fn status(&mut self, code: u16) -> Result<(), Error> {
        self.check_header_open()?;
        let id = self.id();
        self.cx.engine.set_status(id, code);
        Ok(())
    }

    /// Add a response header.  Only before the header is sent.
    pub fn add_header(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.check_header_open()?;
        let id = self.id();
        self.cx
            .engine
            .add_header_out(id, key, value)
            .map_err(Error::engine("add header"))
    }

    fn ensure_header_sent(&mut self) -> Result<(), Error> {
        if !self.state().headers_sent {
            let id = self.id();
            self.state_mut().headers_sent = true;
            self.cx
                .engine
                .send_header(id)
                .map_err(Error::engine("send header"))?;
        }
        Ok(())
    }

    /// Send a non-terminal chunk of the response body, copying it.  The
    /// first call sends the header section.
    pub fn send(&mut self, data: &[u8], flush: bool) -> Result<(), Error> {
        if data.is_empty() {
            self.check_writable()?;
            return Err(Error::EmptyChunk);
        }
        self.send_bytes(Bytes::copy_from_slice(data), flush)
    }

    /// Send a non-terminal chunk of the response body without copying
    /// it
    pub fn send_bytes(&mut self, data: Bytes, flush: bool) -> Result<(), Error> {
        self.check_writable()?;
        if data.is_empty() {
            return Err(Error::EmptyChunk);
        }
        self.ensure_header_sent()?;
        let id = self.id();
        self.cx
            .engine
            .output(
                id,
                OutChunk {
                    data,
                    flush,
                    last: false,
                },
            )
            .map_err(Error::engine("output"))
    }

    /// Send the terminal chunk of the response, copying it.  Returns
    /// `Outcome::Ok` for convenience, but the request is only
    /// finalized when the callback returns.
    ///
    /// If nothing has been sent yet, the content length is set from
    /// `data` and an empty `data` makes the response header-only.  If
    /// the header was already sent, an empty `data` just marks the end
    /// of the body.
    pub fn end(&mut self, data: &[u8]) -> Result<Outcome, Error> {
        self.end_bytes(Bytes::copy_from_slice(data))
    }

    /// Like [`end`] but without copying
    ///
    /// [`end`]: struct.Request.html#method.end
    pub fn end_bytes(&mut self, data: Bytes) -> Result<Outcome, Error> {
        self.check_writable()?;
        let id = self.id();
        self.state_mut().ended = true;
        if !self.state().headers_sent {
            self.cx.engine.set_content_length(id, data.len() as u64);
            if data.is_empty() {
                self.cx.engine.set_header_only(id);
            }
            self.ensure_header_sent()?;
            if data.is_empty() {
                return Ok(Outcome::Ok);
            }
        }
        self.cx
            .engine
            .output(
                id,
                OutChunk {
                    data,
                    flush: false,
                    last: true,
                },
            )
            .map_err(Error::engine("output last buffer"))?;
        Ok(Outcome::Ok)
    }

    /// Get a `Send` handle that can resume this request from another
    /// thread
    pub fn resumer(&self) -> Resumer<D> {
        let st = self.state();
        Resumer::new(self.cx.remote(), self.key, st.serial, st.id)
    }

    /// Shorthand for `self.resumer().execute_on_worker(f)`
    pub fn execute_on_worker(
        &self,
        f: impl FnOnce(&mut Request<'_, D>) -> HandlerResult + Send + 'static,
    ) -> bool {
        self.resumer().execute_on_worker(f)
    }
}
