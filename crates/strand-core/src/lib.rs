//! Strand Runtime Concurrency Core
//!
//! This crate provides the concurrency substrate of the Strand service
//! runtime:
//! - **Execution loops**: per-service single-consumer loops onto which all
//!   service logic is serialized (`exec` module)
//! - **Loop scheduler**: routes continuations back onto their owning loop
//!   instead of an arbitrary thread (`exec` module)
//! - **Object pools**: single-owner and multi-owner recycling caches for
//!   short-lived objects (`pool` module)
//! - **Id allocator**: a Snowflake-style distributed unique-id generator with
//!   lock-free, time-windowed throughput limiting (`uid` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_core::ExecLoop;
//!
//! let exec = ExecLoop::new("billing-loop");
//! exec.start()?;
//!
//! exec.post(|| println!("runs on the loop worker"));
//! let total = exec.call(|cents: u64| cents * 12, 499)?.wait()?;
//!
//! exec.stop()?; // drains everything queued above before returning
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Execution loops, envelopes, the loop-bound scheduler, and loop groups.
pub mod exec;

/// Object pools for recycling short-lived objects.
pub mod pool;

/// Distributed unique-id allocation.
pub mod uid;

pub use exec::{
    CallError, CallFuture, ExecLoop, LoopError, LoopGroup, LoopId, LoopResult, LoopScheduler,
    LoopState, SingleShot,
};
pub use pool::{LocalPool, Recyclable, SharedPool};
pub use uid::{Clock, SystemClock, UidAllocator, UidError, UidOptions, UidResult, UidTicker};
