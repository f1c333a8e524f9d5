//! Loop-bound scheduling strategy.
//!
//! A [`LoopScheduler`] is 1:1 with its owning loop and makes one decision:
//! work already on the loop's worker runs inline with no extra enqueue; work
//! originating anywhere else is wrapped as a continuation envelope and posted
//! back onto the loop. Nothing but the loop's own worker ever dequeues — no
//! work-stealing — which is what preserves the serial guarantee.

use crate::exec::ExecLoop;

/// Scheduling policy bound to one [`ExecLoop`].
pub struct LoopScheduler {
    owner: ExecLoop,
}

impl LoopScheduler {
    pub(crate) fn new(owner: ExecLoop) -> Self {
        Self { owner }
    }

    /// Run `work` on the owning loop.
    ///
    /// On the loop's own worker (home-thread sentinel set) the work runs
    /// inline, without a queue round-trip. From any other thread it is
    /// re-queued as a continuation envelope; the return value is false if the
    /// loop had already closed its queue.
    pub fn schedule<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.owner.is_loop_thread() {
            self.run_inline(work);
            true
        } else {
            self.owner.post_continuation(Box::new(work))
        }
    }

    /// Run `work` immediately on the current thread.
    ///
    /// The caller is responsible for already being on the owning loop's
    /// worker; `schedule` is the checked entry point.
    pub fn run_inline<F>(&self, work: F)
    where
        F: FnOnce(),
    {
        work()
    }

    /// The loop this scheduler is bound to.
    pub fn owner(&self) -> &ExecLoop {
        &self.owner
    }
}
