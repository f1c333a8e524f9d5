//! The serialized execution loop: one queue, one worker, strict FIFO.
//!
//! Work submitted from any thread is wrapped into an envelope and pushed
//! onto an unbounded multi-producer channel. The loop's dedicated worker is
//! the only consumer: it blocks until the queue is non-empty (its sole
//! suspension point), then drains every currently-available envelope before
//! blocking again.

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::exec::envelope::{panic_message, Envelope, Work};
use crate::exec::signal::{CallFuture, SingleShot};
use crate::exec::{CallError, LoopError, LoopResult, LoopScheduler};
use crate::pool::{LocalPool, SharedPool};

/// Signals pooled per loop; beyond this the pool drops returns.
const SIGNAL_POOL_CAPACITY: usize = 32;

/// Drain batch buffers kept per worker.
const BATCH_POOL_CAPACITY: usize = 2;

/// Loop lifecycle states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Created, worker not yet spawned.
    New = 0,
    /// Worker draining the queue.
    Running = 1,
    /// Queue closed to external submissions; worker draining the remainder.
    Stopping = 2,
    /// Worker exited; the loop is not reusable.
    Stopped = 3,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::New,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Stopped,
        }
    }
}

/// Process-local unique identifier for an [`ExecLoop`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

impl LoopId {
    fn next() -> Self {
        LoopId(NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

thread_local! {
    // Home-thread sentinel: the id of the loop whose worker is the current
    // thread, or 0. The scheduler and inline call path consult this.
    static CURRENT_LOOP: Cell<u64> = const { Cell::new(0) };
}

struct Inner {
    id: LoopId,
    name: String,
    state: AtomicU8,
    tx: Sender<Envelope>,
    // Taken by start(); present exactly while the loop is New.
    rx: Mutex<Option<Receiver<Envelope>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    signal_pool: Arc<SharedPool<Arc<SingleShot>>>,
}

/// A single-consumer execution loop.
///
/// Cloning yields another handle to the same loop.
pub struct ExecLoop {
    inner: Arc<Inner>,
}

impl Clone for ExecLoop {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ExecLoop {
    /// Create a loop in the `New` state. `name` becomes the worker thread name.
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                id: LoopId::next(),
                name: name.into(),
                state: AtomicU8::new(LoopState::New as u8),
                tx,
                rx: Mutex::new(Some(rx)),
                handle: Mutex::new(None),
                signal_pool: Arc::new(SharedPool::new(SIGNAL_POOL_CAPACITY, || {
                    Arc::new(SingleShot::new())
                })),
            }),
        }
    }

    /// Transition `New → Running` and spawn the dedicated worker.
    ///
    /// Double-start is a fatal state error, not retried.
    pub fn start(&self) -> LoopResult<()> {
        self.transition(LoopState::New, LoopState::Running)?;
        let Some(rx) = self.inner.rx.lock().take() else {
            // Unreachable once the CAS above succeeded, but never panic for it.
            return Err(LoopError::InvalidTransition {
                expected: LoopState::New,
                observed: self.state(),
            });
        };

        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || worker_loop(inner, rx))
            .expect("failed to spawn loop worker thread");
        *self.inner.handle.lock() = Some(handle);
        Ok(())
    }

    /// Enqueue a plain action. Returns false once closing has begun.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_envelope(Envelope::Action(Box::new(f)))
    }

    /// Enqueue an action with one captured argument.
    ///
    /// The argument is moved into the envelope and dropped after the action
    /// runs, so large values are not retained past execution.
    pub fn post_with<A, F>(&self, f: F, arg: A) -> bool
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.post_envelope(Envelope::Action(Box::new(move || f(arg))))
    }

    /// Submit a request/response call and obtain a future for its result.
    ///
    /// From a foreign thread the call is queued FIFO like any other envelope
    /// and `wait()` blocks until the loop has run it. From the loop's own
    /// worker the call runs inline — prior posts were already drained by the
    /// time this submission could be made — and the future resolves
    /// immediately, so control stays on the same loop throughout.
    pub fn call<A, R, F>(&self, f: F, arg: A) -> LoopResult<CallFuture<R>>
    where
        A: Send + 'static,
        R: Any + Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
    {
        let signal = self.inner.signal_pool.get();
        let future = CallFuture::new(signal.clone(), self.inner.signal_pool.clone());

        if self.is_loop_thread() {
            let outcome = catch_unwind(AssertUnwindSafe(move || f(arg)))
                .map(|value| Box::new(value) as Box<dyn Any + Send>)
                .map_err(|payload| CallError::Panicked(panic_message(&*payload)));
            signal.set(outcome);
            return Ok(future);
        }

        let env = Envelope::Call {
            func: Box::new(move || Ok(Box::new(f(arg)) as Box<dyn Any + Send>)),
            signal,
        };
        if !self.post_envelope(env) {
            return Err(LoopError::Closed);
        }
        Ok(future)
    }

    /// Transition `Running → Stopping`, drain all queued work, and wait for
    /// the worker to exit (`Stopping → Stopped`).
    ///
    /// Everything enqueued before the close is guaranteed to run before this
    /// returns; submissions observed after the close return false.
    pub fn stop(&self) -> LoopResult<()> {
        if self.is_loop_thread() {
            return Err(LoopError::StopFromWorker);
        }
        self.transition(LoopState::Running, LoopState::Stopping)?;
        // The sentinel ends the worker after it has drained everything ahead.
        let _ = self.inner.tx.send(Envelope::Shutdown);
        if let Some(handle) = self.inner.handle.lock().take() {
            if handle.join().is_err() {
                // Per-envelope panics are caught inside the worker; reaching
                // here means the drain loop itself failed.
                error!(exec_loop = %self.inner.name, "loop worker panicked during drain");
            }
        }
        Ok(())
    }

    /// Scheduler bound to this loop.
    pub fn scheduler(&self) -> LoopScheduler {
        LoopScheduler::new(self.clone())
    }

    /// This loop's id.
    pub fn id(&self) -> LoopId {
        self.inner.id
    }

    /// This loop's worker thread name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the current thread is this loop's worker.
    pub fn is_loop_thread(&self) -> bool {
        CURRENT_LOOP.with(|current| current.get()) == self.inner.id.as_u64()
    }

    pub(crate) fn post_continuation(&self, work: Work) -> bool {
        self.post_envelope(Envelope::Continuation(work))
    }

    fn post_envelope(&self, env: Envelope) -> bool {
        if self.inner.state.load(Ordering::Acquire) >= LoopState::Stopping as u8 {
            return false;
        }
        self.inner.tx.send(env).is_ok()
    }

    fn transition(&self, expected: LoopState, to: LoopState) -> LoopResult<()> {
        self.inner
            .state
            .compare_exchange(
                expected as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|observed| LoopError::InvalidTransition {
                expected,
                observed: LoopState::from_u8(observed),
            })
    }
}

/// Worker body: block for work, drain the backlog, repeat until shut down.
fn worker_loop(inner: Arc<Inner>, rx: Receiver<Envelope>) {
    CURRENT_LOOP.with(|current| current.set(inner.id.as_u64()));
    debug!(exec_loop = %inner.name, "loop worker started");

    // Batch buffers are owned by this thread alone: a single-owner pool.
    let mut batches: LocalPool<VecDeque<Envelope>> =
        LocalPool::new(BATCH_POOL_CAPACITY, VecDeque::new);

    let mut open = true;
    while open {
        // Sole suspension point.
        let Ok(first) = rx.recv() else { break };

        let mut batch = batches.get();
        batch.push_back(first);
        loop {
            match rx.try_recv() {
                Ok(env) => batch.push_back(env),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        for env in batch.drain(..) {
            if matches!(env, Envelope::Shutdown) {
                // Keep running the rest of the batch: it was queued first.
                open = false;
                continue;
            }
            env.run(&inner.name);
        }
        batches.put(batch);
    }

    // Run anything that raced in behind the shutdown sentinel.
    while let Ok(env) = rx.try_recv() {
        env.run(&inner.name);
    }

    inner.state.store(LoopState::Stopped as u8, Ordering::Release);
    CURRENT_LOOP.with(|current| current.set(0));
    debug!(exec_loop = %inner.name, "loop worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn started_loop(name: &str) -> ExecLoop {
        let exec = ExecLoop::new(name);
        exec.start().unwrap();
        exec
    }

    #[test]
    fn test_lifecycle_states() {
        let exec = ExecLoop::new("test-lifecycle");
        assert_eq!(exec.state(), LoopState::New);

        exec.start().unwrap();
        assert_eq!(exec.state(), LoopState::Running);

        exec.stop().unwrap();
        assert_eq!(exec.state(), LoopState::Stopped);
    }

    #[test]
    fn test_double_start_is_fatal() {
        let exec = started_loop("test-double-start");
        assert_eq!(
            exec.start(),
            Err(LoopError::InvalidTransition {
                expected: LoopState::New,
                observed: LoopState::Running,
            })
        );
        exec.stop().unwrap();
    }

    #[test]
    fn test_stop_before_start_is_fatal() {
        let exec = ExecLoop::new("test-early-stop");
        assert_eq!(
            exec.stop(),
            Err(LoopError::InvalidTransition {
                expected: LoopState::Running,
                observed: LoopState::New,
            })
        );
    }

    #[test]
    fn test_double_stop_is_fatal() {
        let exec = started_loop("test-double-stop");
        exec.stop().unwrap();
        assert!(matches!(
            exec.stop(),
            Err(LoopError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_posts_run_in_submission_order() {
        let exec = started_loop("test-order");
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let log = log.clone();
            assert!(exec.post(move || log.lock().push(i)));
        }
        exec.stop().unwrap();

        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_post_with_argument() {
        let exec = started_loop("test-post-with");
        let (tx, rx) = mpsc::channel();

        assert!(exec.post_with(move |arg: String| tx.send(arg).unwrap(), "hello".to_string()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "hello");
        exec.stop().unwrap();
    }

    #[test]
    fn test_post_after_stop_returns_false() {
        let exec = started_loop("test-closed");
        exec.stop().unwrap();
        assert!(!exec.post(|| {}));
        assert!(!exec.post_with(|_: u8| {}, 1));
    }

    #[test]
    fn test_stop_drains_queued_work() {
        let exec = started_loop("test-drain");
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..500 {
            let ran = ran.clone();
            assert!(exec.post(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }
        exec.stop().unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn test_call_from_foreign_thread() {
        let exec = started_loop("test-call");
        let future = exec.call(|x: i32| x * 2, 21).unwrap();
        assert_eq!(future.wait().unwrap(), 42);
        exec.stop().unwrap();
    }

    #[test]
    fn test_call_panic_delivered_as_failure() {
        let exec = started_loop("test-call-panic");
        let future = exec
            .call(|_: ()| -> i32 { panic!("deliberate failure") }, ())
            .unwrap();
        match future.wait() {
            Err(CallError::Panicked(msg)) => assert!(msg.contains("deliberate failure")),
            other => panic!("expected Panicked, got {:?}", other),
        }
        // The loop survives the panicking call.
        assert_eq!(exec.call(|x: i32| x + 1, 1).unwrap().wait().unwrap(), 2);
        exec.stop().unwrap();
    }

    #[test]
    fn test_call_after_stop_is_closed() {
        let exec = started_loop("test-call-closed");
        exec.stop().unwrap();
        assert_eq!(
            exec.call(|x: i32| x, 1).map(|_| ()),
            Err(LoopError::Closed)
        );
    }

    #[test]
    fn test_call_from_loop_thread_runs_inline() {
        let exec = started_loop("test-call-inline");
        let (tx, rx) = mpsc::channel();

        let handle = exec.clone();
        exec.post(move || {
            let worker = thread::current().id();
            let future = handle
                .call(move |_: ()| thread::current().id(), ())
                .unwrap();
            // Inline execution: already resolved, and on this same worker.
            assert!(future.is_ready());
            tx.send((worker, future.wait().unwrap())).unwrap();
        });

        let (worker, ran_on) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(worker, ran_on);
        exec.stop().unwrap();
    }

    #[test]
    fn test_envelope_panic_does_not_stop_loop() {
        let exec = started_loop("test-panic-survival");
        let (tx, rx) = mpsc::channel();

        exec.post(|| panic!("first envelope dies"));
        exec.post(move || tx.send(7u8).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
        exec.stop().unwrap();
    }

    #[test]
    fn test_stop_from_worker_is_rejected() {
        let exec = started_loop("test-self-stop");
        let (tx, rx) = mpsc::channel();

        let handle = exec.clone();
        exec.post(move || tx.send(handle.stop()).unwrap());

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            Err(LoopError::StopFromWorker)
        );
        exec.stop().unwrap();
    }

    #[test]
    fn test_is_loop_thread_sentinel() {
        let exec = started_loop("test-sentinel");
        assert!(!exec.is_loop_thread());

        let (tx, rx) = mpsc::channel();
        let handle = exec.clone();
        exec.post(move || tx.send(handle.is_loop_thread()).unwrap());

        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        exec.stop().unwrap();
    }
}
