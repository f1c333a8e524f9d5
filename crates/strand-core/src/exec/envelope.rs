//! Work envelopes: the units of deferred execution flowing through a loop.
//!
//! Three kinds share one queue, FIFO, with no priorities and no cancellation
//! of queued envelopes (cancellation is cooperative inside the work itself).
//! A fourth internal kind, the shutdown sentinel, closes the queue.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use crate::exec::signal::{CallOutcome, SingleShot};
use crate::exec::CallError;

/// Boxed fire-and-forget work.
pub(crate) type Work = Box<dyn FnOnce() + Send + 'static>;

/// Boxed call work producing a type-erased outcome.
pub(crate) type CallWork = Box<dyn FnOnce() -> CallOutcome + Send + 'static>;

pub(crate) enum Envelope {
    /// Fire-and-forget action with its captured argument.
    Action(Work),
    /// Request/response call whose outcome is routed into the signal.
    Call {
        func: CallWork,
        signal: Arc<SingleShot>,
    },
    /// Externally-originated continuation re-routed onto the loop.
    Continuation(Work),
    /// Queue-closing sentinel enqueued by `stop()`.
    Shutdown,
}

impl Envelope {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Envelope::Action(_) => "action",
            Envelope::Call { .. } => "call",
            Envelope::Continuation(_) => "continuation",
            Envelope::Shutdown => "shutdown",
        }
    }

    /// Run the envelope on the loop's worker.
    ///
    /// Action and continuation panics are caught and logged here; the loop
    /// survives. Call envelopes never panic outward — success and panic both
    /// route into the result signal.
    pub(crate) fn run(self, loop_name: &str) {
        let kind = self.kind();
        match self {
            Envelope::Action(work) | Envelope::Continuation(work) => {
                if catch_unwind(AssertUnwindSafe(work)).is_err() {
                    error!(
                        envelope = kind,
                        exec_loop = loop_name,
                        "envelope panicked; loop continues"
                    );
                }
            }
            Envelope::Call { func, signal } => {
                let outcome = catch_unwind(AssertUnwindSafe(func))
                    .unwrap_or_else(|payload| Err(CallError::Panicked(panic_message(&*payload))));
                signal.set(outcome);
            }
            Envelope::Shutdown => {}
        }
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
