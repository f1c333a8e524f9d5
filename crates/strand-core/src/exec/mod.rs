//! Serialized execution loops and their scheduling surface.
//!
//! An [`ExecLoop`] owns an unbounded multi-producer queue of work envelopes
//! and a single dedicated worker that drains them strictly in arrival order.
//! The [`LoopScheduler`] routes continuations back onto their owning loop so
//! logic bound to a loop never runs concurrently with other work on it.

mod envelope;
mod exec_loop;
mod group;
mod scheduler;
mod signal;

pub use exec_loop::{ExecLoop, LoopId, LoopState};
pub use group::LoopGroup;
pub use scheduler::LoopScheduler;
pub use signal::{CallFuture, CallOutcome, SingleShot};

/// Loop lifecycle and submission errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    /// A state-machine guard failed: the observed state was not the expected one.
    #[error("invalid loop transition: expected {expected:?}, observed {observed:?}")]
    InvalidTransition {
        /// State the transition required.
        expected: LoopState,
        /// State actually observed.
        observed: LoopState,
    },

    /// The loop has begun stopping and no longer accepts external submissions.
    #[error("loop queue is closed")]
    Closed,

    /// `stop()` was invoked from the loop's own worker, which would self-join.
    #[error("stop() must not be called from the loop's own worker")]
    StopFromWorker,
}

/// Result type for loop operations.
pub type LoopResult<T> = Result<T, LoopError>;

/// Failure of a single request/response call, delivered through its result signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The called function panicked; the panic was routed into the signal.
    #[error("call panicked: {0}")]
    Panicked(String),

    /// The result signal was consumed more than once.
    #[error("call result already consumed")]
    AlreadyConsumed,

    /// The result payload did not carry the expected type.
    #[error("call result had an unexpected payload type")]
    BadPayload,
}
