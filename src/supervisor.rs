//! Worker supervision.
//!
//! The [`Supervisor`] owns everything shared between workers (keyspace,
//! partition, progress store, prefix table, knobs, engine and metrics) and
//! runs one worker loop per configured device on the tokio runtime.
//!
//! # Worker loop
//!
//! ```text
//!   next_probe ──► engine.probe ──► record ──► metrics ──┐
//!       ▲                                                │
//!       └────────────────────────────────────────────────┘
//! ```
//!
//! A worker stops when its scheduler reports the keyspace exhausted or the
//! supervisor is cancelled. A probe interrupted by cancellation is discarded
//! and its block is not marked done, so it will be probed again next run.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::KeyloomConfig;
use crate::engine::{ProbeRequest, SearchEngine};
use crate::error::{KeyloomError, Result};
use crate::keyspace::Keyspace;
use crate::metrics::KeyloomMetrics;
use crate::partition::{build_partition, PartitionStrategy};
use crate::progress::ProgressStore;
use crate::sched::{Mode, PrefixWindowTable, Scheduler, SchedulerKnobs};

/// What one worker did before it stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub device: String,
    /// Probes whose outcome was recorded.
    pub probes: u64,
    pub hits: u64,
    /// Done blocks passed over while choosing probes.
    pub skipped_done: u64,
    /// Mode the scheduler was in when the worker stopped.
    pub final_mode: Mode,
    /// True if the worker stopped because every block was done.
    pub exhausted: bool,
}

/// Outcome of [`Supervisor::run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub workers: Vec<WorkerReport>,
    /// Blocks recorded in the progress store when the run ended.
    pub done_blocks: usize,
    /// True if the progress store fell back to memory only.
    pub degraded: bool,
}

impl RunSummary {
    pub fn total_probes(&self) -> u64 {
        self.workers.iter().map(|w| w.probes).sum()
    }

    pub fn total_hits(&self) -> u64 {
        self.workers.iter().map(|w| w.hits).sum()
    }
}

/// Runs one scheduler per device against a shared keyspace.
pub struct Supervisor<E: SearchEngine> {
    config: KeyloomConfig,
    keyspace: Arc<Keyspace>,
    partition: Arc<dyn PartitionStrategy>,
    progress: Arc<ProgressStore>,
    table: Arc<PrefixWindowTable>,
    knobs: Arc<SchedulerKnobs>,
    engine: Arc<E>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<KeyloomMetrics>,
}

impl<E: SearchEngine> Supervisor<E> {
    /// Validate `config` and prepare a supervisor driving `engine`.
    pub fn new(config: KeyloomConfig, engine: E) -> Result<Self> {
        let metrics = Arc::new(KeyloomMetrics::with_prefix(&config.metrics_prefix));
        Self::with_metrics(config, engine, metrics)
    }

    /// Like [`new`](Self::new), sharing an existing metrics handle (e.g. one
    /// the engine also reports to).
    pub fn with_metrics(
        config: KeyloomConfig,
        engine: E,
        metrics: Arc<KeyloomMetrics>,
    ) -> Result<Self> {
        let keyspace = config.validate()?;
        let workers = config.devices.len();

        let mut rng = match config.partition_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let partition = build_partition(
            config.partition,
            keyspace.total_blocks().clone(),
            workers,
            &mut rng,
        );

        let progress = match config.progress_path() {
            Some(path) => ProgressStore::open(path),
            None => ProgressStore::in_memory(),
        };
        progress.retain_within(keyspace.total_blocks());

        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }
        metrics.set_degraded(progress.is_degraded());

        info!(
            keyspace = %keyspace,
            workers,
            partition = ?config.partition,
            target = %config.target,
            done = progress.len(),
            "building keyloom supervisor"
        );

        Ok(Self {
            table: Arc::new(config.window_table()),
            knobs: Arc::new(config.knobs.clone()),
            keyspace: Arc::new(keyspace),
            partition,
            progress: Arc::new(progress),
            engine: Arc::new(engine),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &KeyloomConfig {
        &self.config
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    pub fn partition(&self) -> &Arc<dyn PartitionStrategy> {
        &self.partition
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    pub fn metrics(&self) -> &Arc<KeyloomMetrics> {
        &self.metrics
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Token that stops all workers when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask every worker to stop. In-flight probes are terminated and not
    /// recorded. [`run`](Self::run) returns once all workers have exited.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Scheduler for `worker`, seeded from `partition_seed` when configured.
    pub fn scheduler_for(&self, worker: usize) -> Scheduler {
        let rng = match self.config.partition_seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(worker as u64 + 1)),
            None => SmallRng::from_entropy(),
        };
        Scheduler::with_rng(
            worker,
            self.keyspace.clone(),
            self.partition.clone(),
            self.progress.clone(),
            self.table.clone(),
            self.knobs.clone(),
            rng,
        )
    }

    /// Run all workers until the keyspace is exhausted or the supervisor is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`KeyloomError::WorkerPanicked`] if a worker task panicked. A
    /// panicking worker cancels the others as it unwinds; they are awaited
    /// before returning.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut handles = Vec::with_capacity(self.config.devices.len());
        for (worker, device) in self.config.devices.iter().enumerate() {
            let worker_loop = WorkerLoop {
                worker,
                device: device.clone(),
                scheduler: self.scheduler_for(worker),
                engine: self.engine.clone(),
                cancel: self.cancel.clone(),
                metrics: self.metrics.clone(),
                progress: self.progress.clone(),
                range_bits: self.keyspace.block_bits(),
                target: self.config.target.clone(),
                sink: self.config.engine.sink_for(device),
                status_interval: self.knobs.status_interval,
            };
            handles.push(self.tracker.spawn(worker_loop.run()));
        }
        self.tracker.close();

        let mut reports = Vec::with_capacity(handles.len());
        let mut failed = None;
        for (worker, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(worker, error = %e, "worker task failed, stopping the others");
                    self.cancel.cancel();
                    failed.get_or_insert(worker);
                }
            }
        }
        self.tracker.wait().await;

        if let Some(worker) = failed {
            return Err(KeyloomError::WorkerPanicked(worker));
        }

        let summary = RunSummary {
            workers: reports,
            done_blocks: self.progress.len(),
            degraded: self.progress.is_degraded(),
        };
        info!(
            probes = summary.total_probes(),
            hits = summary.total_hits(),
            done = summary.done_blocks,
            degraded = summary.degraded,
            "all workers stopped"
        );
        Ok(summary)
    }

    /// [`run`](Self::run), stopping cleanly on Ctrl-C.
    pub async fn run_until_ctrl_c(&self) -> Result<RunSummary> {
        let cancel = self.cancel.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                res = signal::ctrl_c() => match res {
                    Ok(()) => {
                        info!("interrupt received, stopping workers");
                        cancel.cancel();
                    }
                    Err(e) => warn!(error = %e, "failed to listen for interrupt"),
                },
            }
        });

        let summary = self.run().await;
        listener.abort();
        summary
    }
}

impl<E: SearchEngine> std::fmt::Debug for Supervisor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("keyspace", &self.keyspace)
            .field("partition", &self.partition)
            .field("workers", &self.config.devices.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// State moved into one worker task.
struct WorkerLoop<E> {
    worker: usize,
    device: String,
    scheduler: Scheduler,
    engine: Arc<E>,
    cancel: CancellationToken,
    metrics: Arc<KeyloomMetrics>,
    progress: Arc<ProgressStore>,
    range_bits: u32,
    target: String,
    sink: std::path::PathBuf,
    status_interval: u64,
}

impl<E: SearchEngine> WorkerLoop<E> {
    async fn run(mut self) -> WorkerReport {
        let worker = self.worker;
        self.metrics.active_workers.inc();
        let _guard = WorkerGuard {
            cancel: self.cancel.clone(),
            metrics: self.metrics.clone(),
        };
        info!(worker, device = %self.device, sink = %self.sink.display(), "worker started");

        let mut report = WorkerReport {
            worker,
            device: self.device.clone(),
            probes: 0,
            hits: 0,
            skipped_done: 0,
            final_mode: Mode::Random,
            exhausted: false,
        };

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(probe) = self.scheduler.next_probe() else {
                info!(worker, "keyspace exhausted");
                report.exhausted = true;
                break;
            };
            let skipped = self.scheduler.skipped_done();
            if skipped > report.skipped_done {
                self.metrics.add_skipped_done(skipped - report.skipped_done);
                report.skipped_done = skipped;
            }

            let request = ProbeRequest {
                worker,
                device: self.device.clone(),
                start: probe.start.clone(),
                range_bits: self.range_bits,
                target: self.target.clone(),
                sink: self.sink.clone(),
            };
            debug!(
                worker,
                index = %probe.index,
                start = %request.start_hex(),
                mode = %probe.mode,
                skip_bits = ?probe.skip_bits,
                "probing block"
            );

            let result = self.engine.probe(&request, &self.cancel).await;
            if self.cancel.is_cancelled() {
                debug!(worker, index = %probe.index, "probe interrupted, block not recorded");
                break;
            }

            let transition = self.scheduler.record(&result);
            self.metrics.record_probe(result.hit, &transition);
            self.metrics.set_degraded(self.progress.is_degraded());
            report.probes += 1;
            if result.hit {
                report.hits += 1;
                info!(
                    worker,
                    index = %probe.index,
                    start = %request.start_hex(),
                    matched = ?result.matched_text,
                    has_secret = result.matched_secret.is_some(),
                    next = %transition.mode(),
                    "hit"
                );
            }

            let scans = self.scheduler.state().scan_count;
            if self.status_interval > 0 && scans % self.status_interval == 0 {
                info!(
                    worker,
                    scans,
                    mode = %self.scheduler.mode(),
                    last_start = %request.start_hex(),
                    done = self.progress.len(),
                    "status"
                );
            }

            // Engines that answer without suspending must not starve the runtime.
            tokio::task::yield_now().await;
        }

        report.final_mode = self.scheduler.mode();
        info!(worker, probes = report.probes, hits = report.hits, "worker stopped");
        report
    }
}

/// Releases the active-worker gauge when a worker exits, and stops every
/// other worker if this one unwinds.
struct WorkerGuard {
    cancel: CancellationToken,
    metrics: Arc<KeyloomMetrics>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.metrics.active_workers.dec();
        if std::thread::panicking() {
            self.cancel.cancel();
        }
    }
}
