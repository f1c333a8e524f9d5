//! Reusable single-shot result signal for request/response calls.
//!
//! A [`SingleShot`] is settable exactly once per acquisition and consumed
//! exactly once by the awaiting caller; `reset()` rearms it for the next pool
//! lifetime. Payloads are type-erased (`Box<dyn Any + Send>`) so one signal
//! pool serves calls of every result type; [`CallFuture`] re-types the
//! payload at the API boundary.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::error;

use crate::exec::CallError;
use crate::pool::{Recyclable, SharedPool};

/// Outcome carried by a signal: a type-erased success value or a call failure.
pub type CallOutcome = Result<Box<dyn Any + Send>, CallError>;

enum Slot {
    Empty,
    Ready(CallOutcome),
    Consumed,
}

/// A reusable single-shot result signal.
///
/// Blocking and wakeup follow the completion-condvar idiom: one mutex-guarded
/// slot, one condvar, `notify_all` on set.
pub struct SingleShot {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl SingleShot {
    /// Create an empty signal.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    /// Deliver a success payload. See [`SingleShot::set`].
    pub fn set_result(&self, value: Box<dyn Any + Send>) {
        self.set(Ok(value));
    }

    /// Deliver a failure. See [`SingleShot::set`].
    pub fn set_error(&self, err: CallError) {
        self.set(Err(err));
    }

    /// Deliver the outcome, waking the consumer.
    ///
    /// Setting twice within one acquisition is a programming error; the
    /// second outcome is dropped and logged rather than overwriting the first.
    pub fn set(&self, outcome: CallOutcome) {
        let mut slot = self.slot.lock();
        match *slot {
            Slot::Empty => {
                *slot = Slot::Ready(outcome);
                self.ready.notify_all();
            }
            Slot::Ready(_) | Slot::Consumed => {
                debug_assert!(false, "single-shot signal set twice");
                error!("single-shot signal set twice; second outcome dropped");
            }
        }
    }

    /// Block until the outcome is delivered, consuming it.
    ///
    /// A second `wait` within the same acquisition returns
    /// [`CallError::AlreadyConsumed`].
    pub fn wait(&self) -> CallOutcome {
        let mut slot = self.slot.lock();
        loop {
            match std::mem::replace(&mut *slot, Slot::Consumed) {
                Slot::Ready(outcome) => return outcome,
                Slot::Consumed => return Err(CallError::AlreadyConsumed),
                Slot::Empty => {
                    *slot = Slot::Empty;
                    self.ready.wait(&mut slot);
                }
            }
        }
    }

    /// Whether an outcome is ready and unconsumed.
    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// Rearm the signal for its next acquisition.
    pub fn reset(&self) {
        *self.slot.lock() = Slot::Empty;
    }
}

impl Default for SingleShot {
    fn default() -> Self {
        Self::new()
    }
}

// Signals return to their pool rearmed.
impl Recyclable for Arc<SingleShot> {
    fn cleanup(&mut self) {
        self.reset();
    }
}

/// Typed handle to a pending call's outcome.
///
/// `wait()` consumes the signal exactly once and recycles it into the loop's
/// signal pool. Dropping the future without waiting lets the signal drop
/// instead of returning to the pool; the pool replaces it lazily.
pub struct CallFuture<R> {
    signal: Arc<SingleShot>,
    pool: Arc<SharedPool<Arc<SingleShot>>>,
    _result: PhantomData<fn() -> R>,
}

impl<R: Any + Send + 'static> CallFuture<R> {
    pub(crate) fn new(signal: Arc<SingleShot>, pool: Arc<SharedPool<Arc<SingleShot>>>) -> Self {
        Self {
            signal,
            pool,
            _result: PhantomData,
        }
    }

    /// Block until the call completes, returning its result or failure.
    pub fn wait(self) -> Result<R, CallError> {
        let Self { signal, pool, .. } = self;
        let outcome = signal.wait();
        pool.put(signal);
        match outcome {
            Ok(payload) => payload.downcast::<R>().map(|b| *b).map_err(|_| CallError::BadPayload),
            Err(err) => Err(err),
        }
    }

    /// Whether the call has already completed.
    pub fn is_ready(&self) -> bool {
        self.signal.is_ready()
    }
}
