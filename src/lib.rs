//! **loopbridge** connects application code to an embedded,
//! single-threaded, event-driven HTTP engine.  Each engine worker
//! thread runs its own event loop and owns its requests outright, so
//! nothing about a request may be touched from any other thread.
//! This crate provides the plumbing that makes that workable:
//!
//! - A bounded lock-free task queue per worker, fed from any thread
//! through [`Remote`] handles and drained by the worker's event loop
//! in [`WorkerContext::tick`].  A push never blocks.  Pushes that
//! fail are counted, and the worker logs when the count moves.
//!
//! - Request continuations.  A handler may return [`Outcome::Async`]
//! and finish the request later from another thread through a
//! [`Resumer`], which re-enters the worker with the request.
//!
//! - Subrequests, with a completion callback that runs on the worker
//! when the child completes and decides how the originating request
//! is finalized.  See [`Request::send_request`].
//!
//! - Upstream peer selection through application resolvers, with a
//! per-subrequest target override.  See [`WorkerContext::select_peer`].
//!
//! The engine itself is outside this crate.  It is reached through the
//! [`Engine`] trait, and it calls back into this crate through the
//! hook methods on [`WorkerContext`]: [`content_phase`],
//! [`body_ready`], [`subrequest_done`], [`select_peer`] and
//! [`request_released`].
//!
//! # Overview of types
//!
//! [`WorkerContext`] is the per-worker state.  It is not `Send`.  One
//! is created at worker startup with a [`WorkerConfig`], the engine
//! interface, the shared [`Routes`] table and a poll-waker closure
//! that makes the engine's event loop call [`tick`].
//!
//! [`Request`] is a borrowed handle to one request, passed to
//! handlers, continuations and subrequest callbacks.  It gives access
//! to the URI, headers and body, and writes the response.
//!
//! [`Remote`] and [`Resumer`] are `Send + Sync` handles for other
//! threads.  [`Remote`] runs arbitrary code on a worker.  [`Resumer`]
//! runs code against a particular suspended request.
//!
//! [`Routes`] maps engine location ids to handlers and upstream ids
//! to peer resolvers.  It is built once with [`RoutesBuilder`] and
//! shared read-only between workers.
//!
//! All application callbacks return [`HandlerResult`].  An error, or a
//! panic, finalizes the request with status 500.
//!
//! # Cargo features
//!
//! Both features are off by default:
//!
//! - **no-unsafe-queue**: Use the `crossbeam-queue` `ArrayQueue`
//! back-end for the task queue instead of the built-in ring, which
//! uses unsafe code.  With `ArrayQueue` a push is lock-free but not
//! bounded in the number of attempts, so `push_retries` has no effect.
//!
//! - **no-unsafe**: Disable all unsafe code within this crate.
//! Implies the safe queue back-end.
//!
//! [`Engine`]: trait.Engine.html
//! [`HandlerResult`]: type.HandlerResult.html
//! [`Outcome::Async`]: enum.Outcome.html#variant.Async
//! [`Remote`]: struct.Remote.html
//! [`Request::send_request`]: struct.Request.html#method.send_request
//! [`Request`]: struct.Request.html
//! [`Resumer`]: struct.Resumer.html
//! [`RoutesBuilder`]: struct.RoutesBuilder.html
//! [`Routes`]: struct.Routes.html
//! [`WorkerConfig`]: struct.WorkerConfig.html
//! [`WorkerContext::select_peer`]: struct.WorkerContext.html#method.select_peer
//! [`WorkerContext::tick`]: struct.WorkerContext.html#method.tick
//! [`WorkerContext`]: struct.WorkerContext.html
//! [`body_ready`]: struct.WorkerContext.html#method.body_ready
//! [`content_phase`]: struct.WorkerContext.html#method.content_phase
//! [`request_released`]: struct.WorkerContext.html#method.request_released
//! [`select_peer`]: struct.WorkerContext.html#method.select_peer
//! [`subrequest_done`]: struct.WorkerContext.html#method.subrequest_done
//! [`tick`]: struct.WorkerContext.html#method.tick

// Insist on 2018 style
#![deny(rust_2018_idioms)]
// No unsafe code is allowed anywhere if no-unsafe is set
#![cfg_attr(feature = "no-unsafe", forbid(unsafe_code))]

pub use config::WorkerConfig;
pub use engine::{
    BodyBuf, BodyRead, Engine, Method, OutChunk, ReqId, SubrequestArgs, SubrequestResult,
};
pub use error::{EngineError, Error};
pub use peer::{Family, PeerContext, PeerDecision, PeerSelection};
pub use remote::{Remote, Resumer};
pub use request::{HandlerResult, Outcome, Phase, Request};
pub use routes::{Handler, PeerResolver, Routes, RoutesBuilder};
pub use subrequest::{SubResponse, SubToken, Subrequest};
pub use worker::{ContentPhase, WorkerContext};

// Static assertions
static_assertions::assert_not_impl_any!(WorkerContext<u8>: Send, Sync);
static_assertions::assert_not_impl_any!(Request<'static, u8>: Send, Sync);
static_assertions::assert_impl_all!(Remote<u8>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Resumer<u8>: Send, Sync, Clone);
static_assertions::assert_impl_all!(Routes<u8>: Send, Sync);
static_assertions::assert_impl_all!(PeerSelection: Copy, Clone, Send, Sync);
static_assertions::assert_impl_all!(SubToken: Copy, Clone);
static_assertions::const_assert!(std::mem::size_of::<PeerSelection>() <= 24);

mod config;
mod engine;
mod error;
pub mod log;
mod peer;
mod remote;
mod request;
mod routes;
mod subrequest;
mod task;
mod thread;
mod worker;

// Task queue selection
#[cfg(not(any(feature = "no-unsafe", feature = "no-unsafe-queue")))]
pub mod queue {
    //! Bounded multi-producer single-consumer queue used to carry
    //! tasks to a worker
    mod ring;
    pub use ring::{channel, TaskReceiver, TaskSender};
}

#[cfg(any(feature = "no-unsafe", feature = "no-unsafe-queue"))]
pub mod queue {
    //! Bounded multi-producer single-consumer queue used to carry
    //! tasks to a worker
    mod array;
    pub use array::{channel, TaskReceiver, TaskSender};
}

#[cfg(test)]
mod test;
