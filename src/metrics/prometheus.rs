//! Prometheus metrics for keyloom workers.
//!
//! Counters and gauges are always updated (plain atomic ops). Registering them
//! with a [`Registry`] is only needed for exposition.
//!
//! # Usage
//!
//! ```ignore
//! let registry = prometheus::Registry::new();
//! let supervisor = KeyloomBuilder::new()
//!     .prometheus_registry(registry.clone())
//!     .build()?;
//!
//! let encoder = TextEncoder::new();
//! encoder.encode(&registry.gather(), &mut buffer)?;
//! ```

use prometheus::{IntCounter, IntGauge, Opts, Registry};

use crate::sched::{Mode, Transition};

/// Prometheus metrics shared by all workers of one supervisor.
#[derive(Clone)]
pub struct KeyloomMetrics {
    // === Gauges ===
    /// Worker loops currently running
    pub active_workers: IntGauge,

    /// 1 when the progress store fell back to memory only
    pub progress_degraded: IntGauge,

    // === Counters ===
    /// Probes completed (outcome recorded)
    pub probes: IntCounter,

    /// Probes that reported a hit
    pub hits: IntCounter,

    /// Transitions into WINDOW
    pub window_entries: IntCounter,

    /// Transitions into SKIP
    pub skip_entries: IntCounter,

    /// SKIP phases that ran out of budget
    pub skip_exhaustions: IntCounter,

    /// Forced returns to RANDOM (period or hit streak)
    pub reseeds: IntCounter,

    /// Engine invocations that failed and were counted as misses
    pub engine_failures: IntCounter,

    /// Blocks passed over because they were already done
    pub skipped_done: IntCounter,
}

impl Default for KeyloomMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(prefix: &str, name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

fn gauge(prefix: &str, name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(format!("{}_{}", prefix, name), help))
        .expect("metric creation should not fail")
}

/// Replace characters that are invalid in a Prometheus metric name.
fn sanitize_prefix(prefix: &str) -> String {
    // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = c == '_' || c == ':' || c.is_ascii_alphabetic()
                || (i > 0 && c.is_ascii_digit());
            if valid {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl KeyloomMetrics {
    /// Create metrics with the default prefix "keyloom".
    pub fn new() -> Self {
        Self::with_prefix("keyloom")
    }

    /// Create metrics named `{prefix}_probes`, `{prefix}_hits`, etc.
    ///
    /// Hyphens and other invalid characters in the prefix become underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize_prefix(prefix);
        Self {
            active_workers: gauge(&prefix, "active_workers", "Worker loops running"),
            progress_degraded: gauge(
                &prefix,
                "progress_degraded",
                "Progress store running in memory only",
            ),

            probes: counter(&prefix, "probes", "Block probes completed"),
            hits: counter(&prefix, "hits", "Block probes that reported a hit"),
            window_entries: counter(&prefix, "window_entries", "Transitions into WINDOW"),
            skip_entries: counter(&prefix, "skip_entries", "Transitions into SKIP"),
            skip_exhaustions: counter(
                &prefix,
                "skip_exhaustions",
                "SKIP phases that exhausted their budget",
            ),
            reseeds: counter(&prefix, "reseeds", "Forced returns to RANDOM"),
            engine_failures: counter(
                &prefix,
                "engine_failures",
                "Engine invocations counted as misses after failing",
            ),
            skipped_done: counter(
                &prefix,
                "skipped_done",
                "Blocks skipped because they were already probed",
            ),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.active_workers.clone()))?;
        registry.register(Box::new(self.progress_degraded.clone()))?;
        registry.register(Box::new(self.probes.clone()))?;
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.window_entries.clone()))?;
        registry.register(Box::new(self.skip_entries.clone()))?;
        registry.register(Box::new(self.skip_exhaustions.clone()))?;
        registry.register(Box::new(self.reseeds.clone()))?;
        registry.register(Box::new(self.engine_failures.clone()))?;
        registry.register(Box::new(self.skipped_done.clone()))?;
        Ok(())
    }

    /// Record one completed probe and the transition it caused.
    #[inline]
    pub fn record_probe(&self, hit: bool, transition: &Transition) {
        self.probes.inc();
        if hit {
            self.hits.inc();
        }
        match transition {
            Transition::Enter { to: Mode::Window, .. } => self.window_entries.inc(),
            Transition::Enter { to: Mode::Skip, .. } => self.skip_entries.inc(),
            Transition::Enter {
                from: Mode::Skip,
                to: Mode::Random,
            } => self.skip_exhaustions.inc(),
            Transition::Reseed { .. } => self.reseeds.inc(),
            _ => {}
        }
    }

    #[inline]
    pub fn record_engine_failure(&self) {
        self.engine_failures.inc();
    }

    #[inline]
    pub fn add_skipped_done(&self, count: u64) {
        self.skipped_done.inc_by(count);
    }

    #[inline]
    pub fn set_degraded(&self, degraded: bool) {
        self.progress_degraded.set(i64::from(degraded));
    }
}

impl std::fmt::Debug for KeyloomMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyloomMetrics")
            .field("active_workers", &self.active_workers.get())
            .field("probes", &self.probes.get())
            .field("hits", &self.hits.get())
            .field("engine_failures", &self.engine_failures.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = KeyloomMetrics::new();
        assert_eq!(metrics.active_workers.get(), 0);
        assert_eq!(metrics.probes.get(), 0);
    }

    #[test]
    fn test_record_probe_transitions() {
        let metrics = KeyloomMetrics::new();

        metrics.record_probe(true, &Transition::Enter { from: Mode::Random, to: Mode::Window });
        assert_eq!(metrics.probes.get(), 1);
        assert_eq!(metrics.hits.get(), 1);
        assert_eq!(metrics.window_entries.get(), 1);

        metrics.record_probe(false, &Transition::Enter { from: Mode::Window, to: Mode::Skip });
        assert_eq!(metrics.skip_entries.get(), 1);

        metrics.record_probe(false, &Transition::Enter { from: Mode::Skip, to: Mode::Random });
        assert_eq!(metrics.skip_exhaustions.get(), 1);

        metrics.record_probe(false, &Transition::Reseed { from: Mode::Window });
        assert_eq!(metrics.reseeds.get(), 1);

        // staying put only counts the probe
        metrics.record_probe(false, &Transition::Stay(Mode::Random));
        assert_eq!(metrics.probes.get(), 5);
        assert_eq!(metrics.hits.get(), 1);
    }

    #[test]
    fn test_degraded_gauge() {
        let metrics = KeyloomMetrics::new();
        metrics.set_degraded(true);
        assert_eq!(metrics.progress_degraded.get(), 1);
        metrics.set_degraded(false);
        assert_eq!(metrics.progress_degraded.get(), 0);
    }

    #[test]
    fn test_registry_integration() {
        let metrics = KeyloomMetrics::new();
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");
        metrics.add_skipped_done(3);

        let families = registry.gather();
        let skipped = families
            .iter()
            .find(|f| f.get_name() == "keyloom_skipped_done");
        assert!(skipped.is_some());
    }

    #[test]
    fn test_custom_prefix_is_sanitized() {
        let metrics = KeyloomMetrics::with_prefix("gpu-farm.1");
        let registry = Registry::new();
        metrics
            .register(&registry)
            .expect("registration should succeed");

        let families = registry.gather();
        assert!(families.iter().any(|f| f.get_name() == "gpu_farm_1_probes"));
        assert!(!families.iter().any(|f| f.get_name() == "keyloom_probes"));
    }

    #[test]
    fn test_sanitize_leading_digit() {
        assert_eq!(sanitize_prefix("1abc"), "_abc");
        assert_eq!(sanitize_prefix("a1:b"), "a1:b");
    }

    #[test]
    fn test_double_registration_fails() {
        let metrics = KeyloomMetrics::new();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        assert!(metrics.register(&registry).is_err());
    }
}
