//! Distributed unique-id allocation.
//!
//! A Snowflake-style 63-bit identifier — `node_id | relative_timestamp |
//! increment`, high bits first — generated lock-free, with a time-windowed
//! token budget limiting issuance to the configured per-millisecond rate.
//! Bursts within the rate never block; bursts beyond it degrade to a bounded
//! busy-retry, never to duplicate or invalid ids.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Payload bits in a generated id; the i64 sign bit stays clear.
pub const UID_PAYLOAD_BITS: u32 = 63;

/// Source of the current UTC time, consulted once at allocator construction.
pub trait Clock: Send + Sync {
    /// Current UTC time in whole seconds since the Unix epoch.
    fn utc_secs(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_secs(&self) -> i64 {
        epoch_millis() / 1000
    }
}

fn epoch_millis() -> i64 {
    // Before-1970 clocks collapse to 0; tick() guards regression separately.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Allocator configuration. Bit widths must sum to exactly 63.
#[derive(Debug, Clone)]
pub struct UidOptions {
    /// This node's identifier, occupying the high bits of every id.
    pub node_id: i64,
    /// Bits reserved for the node id.
    pub node_id_bits: u32,
    /// Bits reserved for the relative timestamp (seconds since `base_epoch_secs`).
    pub timestamp_bits: u32,
    /// Bits reserved for the increment counter; also sets the issuance rate,
    /// `(2^increment_bits - 1) / 1000` ids per millisecond.
    pub increment_bits: u32,
    /// Base epoch (UTC seconds) the relative timestamp is measured from.
    pub base_epoch_secs: i64,
}

/// 2020-01-01T00:00:00Z.
const DEFAULT_BASE_EPOCH_SECS: i64 = 1_577_836_800;

impl Default for UidOptions {
    fn default() -> Self {
        Self {
            node_id: 0,
            node_id_bits: 12,
            timestamp_bits: 31,
            increment_bits: 20,
            base_epoch_secs: DEFAULT_BASE_EPOCH_SECS,
        }
    }
}

/// Allocator configuration errors, fatal at construction.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum UidError {
    /// The three bit widths must sum to exactly 63 (sign bit reserved).
    #[error("bit widths must sum to 63, got {total}")]
    BitWidthSum {
        /// Sum actually configured.
        total: u32,
    },

    /// The node id does not fit its configured bit width.
    #[error("node id {node_id} does not fit in {bits} bits")]
    NodeIdRange {
        /// Configured node id.
        node_id: i64,
        /// Configured node id width.
        bits: u32,
    },

    /// The relative timestamp is negative or exceeds its bit width.
    #[error("relative timestamp {relative_secs}s is negative or does not fit in {bits} bits")]
    TimestampRange {
        /// Clock time minus base epoch, in seconds.
        relative_secs: i64,
        /// Configured timestamp width.
        bits: u32,
    },
}

/// Result type for allocator construction.
pub type UidResult<T> = Result<T, UidError>;

struct TickState {
    last_ms: i64,
}

/// Lock-free unique-id generator for one node.
///
/// Created once per process at startup; never destroyed, only ticked.
pub struct UidAllocator {
    node_prefix: i64,
    counter_mask: i64,
    counter_bits: u32,
    increment_bits: u32,
    rate_per_ms: i64,
    /// Packed `timestamp:increment` counter.
    packed: AtomicI64,
    /// Issuance budget, replenished by `tick()`.
    available: AtomicI64,
    /// Serializes concurrent tick callers; deliberately narrow so
    /// `generate_uid` callers never contend on it.
    tick_state: Mutex<TickState>,
}

impl UidAllocator {
    /// Validate `options` against `clock` and construct the allocator.
    pub fn new(options: UidOptions, clock: &dyn Clock) -> UidResult<Self> {
        let UidOptions {
            node_id,
            node_id_bits,
            timestamp_bits,
            increment_bits,
            base_epoch_secs,
        } = options;

        let total = node_id_bits + timestamp_bits + increment_bits;
        if total != UID_PAYLOAD_BITS {
            return Err(UidError::BitWidthSum { total });
        }
        if node_id < 0 || node_id >= (1i64 << node_id_bits) {
            return Err(UidError::NodeIdRange {
                node_id,
                bits: node_id_bits,
            });
        }
        let relative_secs = clock.utc_secs() - base_epoch_secs;
        if relative_secs < 0 || relative_secs >= (1i64 << timestamp_bits) {
            return Err(UidError::TimestampRange {
                relative_secs,
                bits: timestamp_bits,
            });
        }

        let counter_bits = timestamp_bits + increment_bits;
        Ok(Self {
            node_prefix: node_id << counter_bits,
            counter_mask: (1i64 << counter_bits) - 1,
            counter_bits,
            increment_bits,
            rate_per_ms: ((1i64 << increment_bits) - 1) / 1000,
            packed: AtomicI64::new(relative_secs << increment_bits),
            available: AtomicI64::new(0),
            tick_state: Mutex::new(TickState {
                last_ms: epoch_millis(),
            }),
        })
    }

    /// Replenish the issuance budget in proportion to elapsed wall time.
    ///
    /// Expected cadence is roughly once per second from an external driver
    /// (see [`UidTicker`]); `generate_uid` also forces it when starved. A
    /// non-positive elapsed delta (clock regression) skips the update.
    pub fn tick(&self) {
        let granted = {
            let mut state = self.tick_state.lock();
            let now = epoch_millis();
            let elapsed = now - state.last_ms;
            if elapsed <= 0 {
                return;
            }
            state.last_ms = now;
            elapsed * self.rate_per_ms
        };
        self.available.fetch_add(granted, Ordering::AcqRel);
    }

    /// Produce the next identifier, non-negative and unique for this node
    /// within the configured timestamp window.
    ///
    /// When the budget is exhausted this retries — warn, sleep ~1 ms, force a
    /// tick — rather than failing: backpressure, not an error.
    pub fn generate_uid(&self) -> i64 {
        loop {
            let available = self.available.load(Ordering::Acquire);
            if available > 0 {
                if self
                    .available
                    .compare_exchange_weak(
                        available,
                        available - 1,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    break;
                }
                continue;
            }
            warn!("uid budget exhausted; forcing tick and retrying");
            thread::sleep(Duration::from_millis(1));
            self.tick();
        }

        let packed = self.packed.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.node_prefix | (packed & self.counter_mask)
    }

    /// Split an id into `(node_id, relative_timestamp_secs, increment)`.
    pub fn decompose(&self, id: i64) -> (i64, i64, i64) {
        let counter = id & self.counter_mask;
        (
            id >> self.counter_bits,
            counter >> self.increment_bits,
            counter & ((1i64 << self.increment_bits) - 1),
        )
    }

    /// Ids currently issuable without replenishment.
    pub fn available_tokens(&self) -> i64 {
        self.available.load(Ordering::Acquire)
    }

    /// Configured issuance rate, ids per millisecond.
    pub fn rate_per_ms(&self) -> i64 {
        self.rate_per_ms
    }
}

/// Periodic driver thread calling [`UidAllocator::tick`] until stopped.
pub struct UidTicker {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UidTicker {
    /// Spawn the driver, ticking every `interval`.
    pub fn start(allocator: Arc<UidAllocator>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::Builder::new()
            .name("strand-uid-ticker".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    allocator.tick();
                    thread::sleep(interval);
                }
            })
            .expect("failed to spawn uid ticker thread");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the driver and wait for it to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UidTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
