//! Exploration/exploitation block scheduler.
//!
//! Each worker owns one [`Scheduler`]. It explores the keyspace with RANDOM
//! and SEQUENTIAL probes and switches to exploitation after a hit: a WINDOW
//! burst of contiguous blocks sized by the longest matching prefix, followed
//! by SKIP jumps of `2^k` around the burst.
//!
//! # Usage
//!
//! ```ignore
//! use keyloom::sched::{Scheduler, ScanResult};
//!
//! let mut sched = Scheduler::new(worker, keyspace, partition, progress, table, knobs);
//! while let Some(probe) = sched.next_probe() {
//!     let result: ScanResult = run_engine(&probe.start).await;
//!     sched.record(&result);
//! }
//! ```
//!
//! # Policies
//!
//! The variants of the state machine are selected through [`SchedulerKnobs`]:
//!
//! - [`MissPolicy`]: resample or walk sequentially after a RANDOM miss
//! - [`RandomSource`]: uniform draw or partition cursor for RANDOM
//! - [`WindowGrowth`]: how a stronger hit inside a WINDOW extends the burst
//! - [`SkipAnchor`]: fixed or compounding SKIP jumps

mod knobs;
mod policy;
mod prefix;
mod scheduler;
mod types;

pub use knobs::SchedulerKnobs;
pub use policy::{MissPolicy, RandomSource, SkipAnchor, WindowGrowth};
pub use prefix::PrefixWindowTable;
pub use scheduler::Scheduler;
pub use types::{Mode, Probe, ScanResult, SchedulerState, Transition};
