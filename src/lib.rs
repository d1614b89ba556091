//! # keyloom
//!
//! **Weaving many search workers through one huge keyspace**
//!
//! keyloom splits an arbitrary-precision integer interval into fixed-size
//! blocks, deals them out to one worker per compute device, and delegates the
//! per-block work to an external search engine. What it adds on top is the
//! scheduling policy: which block each worker probes next, and how the search
//! pattern adapts after the engine reports a hit.
//!
//! ## Features
//!
//! - **Collision-free partitioning**: stride or affine-permutation allocation,
//!   every block owned by exactly one worker
//! - **Explore/exploit scheduling**: RANDOM and SEQUENTIAL exploration, WINDOW
//!   bursts after a hit, SKIP jumps around the burst
//! - **Crash-safe progress**: append-only record of probed blocks shared by all
//!   workers, skipped on restart
//! - **Flexible Configuration**: files (TOML/YAML/JSON), environment variables,
//!   code or CLI arguments
//! - **Observability**: structured `tracing` logs and Prometheus metrics
//!
//! ## Quick Start
//!
//! ```ignore
//! use keyloom::KeyloomBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = KeyloomBuilder::new()
//!         .file("keyloom.toml")
//!         .env_prefix("KEYLOOM")
//!         .target("1PWo3JeB9")
//!         .devices(["0", "1"])
//!         .build()?;
//!
//!     let summary = supervisor.run_until_ctrl_c().await?;
//!     println!("{} probes, {} hits", summary.total_probes(), summary.total_hits());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! lower = "400000000000000000"
//! upper = "7FFFFFFFFFFFFFFFFF"
//! block_bits = 40
//! devices = ["0", "1"]
//! target = "1PWo3JeB9"
//! partition = "permutation"
//! progress_file = "done_blocks.txt"
//!
//! [windows]
//! "1PWo3JeB9jr" = 100
//! "1PWo3JeB9j" = 10
//! "1PWo3JeB9" = 4
//!
//! [engine]
//! binary = "./vanitysearch"
//! output = "found-{device}.txt"
//!
//! [knobs]
//! skip_cycle_budget = 25
//! skip_min_bits = 40
//! skip_max_bits = 64
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("KEYLOOM")`:
//! - `KEYLOOM_TARGET=1PWo3JeB9`
//! - `KEYLOOM_BLOCK_BITS=40`
//! - `KEYLOOM_KNOBS__SKIP_CYCLE_BUDGET=10`
//!
//! ## Custom engines
//!
//! Anything implementing [`SearchEngine`] can replace the subprocess engine:
//!
//! ```ignore
//! let supervisor = KeyloomBuilder::new()
//!     .target("1abc")
//!     .build_with_engine(MyEngine::new())?;
//! ```

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod keyspace;
pub mod metrics;
pub mod partition;
pub mod progress;
pub mod sched;
pub mod supervisor;

pub use builder::{KeyloomArgs, KeyloomBuilder};
pub use config::{EngineConfig, KeyloomConfig};
pub use engine::{CommandEngine, OutputParser, ProbeRequest, SearchEngine};
pub use error::{KeyloomError, Result};
pub use keyspace::{BlockIndex, Keyspace};
pub use metrics::KeyloomMetrics;
pub use partition::{BlockCursor, PartitionKind, PartitionStrategy};
pub use progress::ProgressStore;
pub use sched::{Mode, Probe, ScanResult, Scheduler, SchedulerKnobs};
pub use supervisor::{RunSummary, Supervisor, WorkerReport};
