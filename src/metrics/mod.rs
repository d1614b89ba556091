//! Metrics collection for keyloom workers.
//!
//! Metrics are always collected and can optionally be exposed through a
//! Prometheus registry for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `keyloom_active_workers` - Worker loops running
//! - `keyloom_progress_degraded` - 1 when the progress file can no longer be written
//!
//! ## Counters (cumulative)
//!
//! - `keyloom_probes` - Block probes completed
//! - `keyloom_hits` - Probes that reported a hit
//! - `keyloom_window_entries` - Transitions into WINDOW
//! - `keyloom_skip_entries` - Transitions into SKIP
//! - `keyloom_skip_exhaustions` - SKIP phases that ran out of budget
//! - `keyloom_reseeds` - Forced returns to RANDOM
//! - `keyloom_engine_failures` - Engine invocations counted as misses
//! - `keyloom_skipped_done` - Blocks skipped because they were already probed

mod prometheus;

pub use prometheus::KeyloomMetrics;
