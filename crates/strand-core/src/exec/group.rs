//! A fixed set of started loops, handed out round-robin.
//!
//! Service runtimes typically size their loop set to the processor count and
//! assign each service a loop from the set at registration time.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::exec::{ExecLoop, LoopResult};

/// A fixed-size set of running [`ExecLoop`]s.
pub struct LoopGroup {
    loops: Vec<ExecLoop>,
    cursor: AtomicUsize,
}

impl LoopGroup {
    /// Create and start `count` loops; `count == 0` means one per CPU core.
    pub fn new(count: usize) -> LoopResult<Self> {
        let count = if count == 0 { num_cpus::get() } else { count };
        let mut loops = Vec::with_capacity(count);
        for index in 0..count {
            let exec = ExecLoop::new(format!("strand-loop-{index}"));
            exec.start()?;
            loops.push(exec);
        }
        Ok(Self {
            loops,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Hand out the next loop, round-robin.
    pub fn next(&self) -> &ExecLoop {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[index]
    }

    /// Loop at a fixed index, for callers that pin work deterministically.
    pub fn get(&self, index: usize) -> Option<&ExecLoop> {
        self.loops.get(index)
    }

    /// Number of loops in the group.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Whether the group holds no loops. Always false for a constructed group.
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Stop every loop, draining each queue. Fails on the first loop that was
    /// already stopped out-of-band.
    pub fn stop_all(&self) -> LoopResult<()> {
        for exec in &self.loops {
            exec.stop()?;
        }
        Ok(())
    }
}
