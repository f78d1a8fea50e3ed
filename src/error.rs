use crate::engine::ReqId;
use thiserror::Error;

/// Failure code returned by an [`Engine`] call
///
/// This is whatever non-zero return code the engine produced.  It is
/// converted into [`Error::Engine`] along with the name of the
/// operation that failed.
///
/// [`Engine`]: trait.Engine.html
/// [`Error::Engine`]: enum.Error.html#variant.Engine
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("engine returned {0}")]
pub struct EngineError(pub i32);

/// Errors returned by fallible bridge operations
#[derive(Debug, Error)]
pub enum Error {
    /// The request has already been finalized, so it can no longer be
    /// written to or used to issue subrequests
    #[error("request {0} has already been finalized")]
    Finalized(ReqId),

    /// Status and headers can only be changed before the first
    /// `send` or `end`
    #[error("header section has already been sent")]
    HeadersSent,

    /// The terminal chunk has already been sent
    #[error("response has already been ended")]
    Ended,

    /// `send` needs at least one byte.  Use `end` to finish a
    /// response without a body.
    #[error("the length must be greater than 0 when calling send")]
    EmptyChunk,

    /// An engine call failed
    #[error("{op} failed: engine returned {rc}")]
    Engine { op: &'static str, rc: i32 },

    /// A handler or peer resolver was registered twice under the same
    /// numeric id
    #[error("{kind} id {id} registered more than once")]
    DuplicateRoute { kind: &'static str, id: u64 },

    /// Invalid worker configuration
    #[error("invalid worker configuration: {0}")]
    Config(&'static str),

    /// The OS refused to start a thread for offloaded work
    #[error("failed to spawn offload thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl Error {
    pub(crate) fn engine(op: &'static str) -> impl FnOnce(EngineError) -> Error {
        move |e| Error::Engine { op, rc: e.0 }
    }
}
