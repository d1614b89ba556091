//! Builder pattern for constructing keyloom supervisors.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;

use crate::config::KeyloomConfig;
use crate::engine::{CommandEngine, SearchEngine};
use crate::error::Result;
use crate::metrics::KeyloomMetrics;
use crate::partition::PartitionKind;
use crate::sched::SchedulerKnobs;
use crate::supervisor::Supervisor;

/// Builder for constructing a [`Supervisor`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
/// 5. CLI arguments
///
/// # Examples
///
/// ```ignore
/// use keyloom::KeyloomBuilder;
///
/// let supervisor = KeyloomBuilder::new()
///     .file("keyloom.toml")
///     .env_prefix("KEYLOOM")
///     .target("1PWo3JeB9")
///     .devices(["0", "1"])
///     .build()?;
/// ```
pub struct KeyloomBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for KeyloomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyloomBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyloomBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl KeyloomBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(KeyloomConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "toml" => self.figment.merge(Toml::file(path)),
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => {
                // Default to TOML
                self.figment.merge(Toml::file(path))
            }
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are read as `{PREFIX}_{KEY}`; nested keys are separated by a
    /// double underscore, e.g. `KEYLOOM_BLOCK_BITS=40` or
    /// `KEYLOOM_KNOBS__SKIP_CYCLE_BUDGET=10`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        let prefix = format!("{}_", prefix.trim_end_matches('_'));
        self.figment = self.figment.merge(Env::prefixed(&prefix).split("__"));
        self
    }

    /// Set the keyspace bounds (hex, inclusive).
    pub fn bounds(mut self, lower: impl Into<String>, upper: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("lower", lower.into()))
            .merge(Serialized::default("upper", upper.into()));
        self
    }

    /// Set the block width as a power of two.
    pub fn block_bits(mut self, bits: u32) -> Self {
        self.figment = self.figment.merge(Serialized::default("block_bits", bits));
        self
    }

    /// Set the device ids, one worker per device.
    pub fn devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let devices: Vec<String> = devices.into_iter().map(Into::into).collect();
        self.figment = self.figment.merge(Serialized::default("devices", devices));
        self
    }

    /// Set the target filter handed to the engine.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("target", target.into()));
        self
    }

    /// Add one prefix -> window size entry.
    pub fn window(mut self, prefix: impl Into<String>, size: u32) -> Self {
        let mut entry = BTreeMap::new();
        entry.insert(prefix.into(), size);
        self.figment = self.figment.merge(Serialized::default("windows", entry));
        self
    }

    pub fn partition(mut self, kind: PartitionKind) -> Self {
        self.figment = self.figment.merge(Serialized::default("partition", kind));
        self
    }

    /// Fix the seed for partition coefficients and worker RNGs.
    pub fn partition_seed(mut self, seed: u64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("partition_seed", seed));
        self
    }

    /// Set the progress file path.
    pub fn progress_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("progress_file", path.into()));
        self
    }

    /// Set the engine binary path.
    pub fn engine_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("engine.binary", path.into()));
        self
    }

    /// Set the scheduler knobs.
    ///
    /// ```ignore
    /// let supervisor = KeyloomBuilder::new()
    ///     .knobs(SchedulerKnobs::default().with_skip(10, 40, 60))
    ///     .build()?;
    /// ```
    pub fn knobs(mut self, knobs: SchedulerKnobs) -> Self {
        self.figment = self.figment.merge(Serialized::default("knobs", knobs));
        self
    }

    /// Set the metric name prefix.
    pub fn metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("metrics_prefix", prefix.into()));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `KeyloomArgs` struct.
    pub fn with_cli_args(mut self, args: &KeyloomArgs) -> Self {
        if let Some(ref lower) = args.lower {
            self.figment = self
                .figment
                .merge(Serialized::default("lower", lower.clone()));
        }
        if let Some(ref upper) = args.upper {
            self.figment = self
                .figment
                .merge(Serialized::default("upper", upper.clone()));
        }
        if let Some(bits) = args.block_bits {
            self.figment = self.figment.merge(Serialized::default("block_bits", bits));
        }
        if !args.devices.is_empty() {
            self.figment = self
                .figment
                .merge(Serialized::default("devices", args.devices.clone()));
        }
        if let Some(ref target) = args.target {
            self.figment = self
                .figment
                .merge(Serialized::default("target", target.clone()));
        }
        if !args.windows.is_empty() {
            let windows: BTreeMap<String, u32> = args.windows.iter().cloned().collect();
            self.figment = self.figment.merge(Serialized::default("windows", windows));
        }
        if let Some(partition) = args.partition {
            self.figment = self
                .figment
                .merge(Serialized::default("partition", partition));
        }
        if let Some(seed) = args.seed {
            self.figment = self
                .figment
                .merge(Serialized::default("partition_seed", seed));
        }
        if let Some(ref path) = args.progress_file {
            self.figment = self
                .figment
                .merge(Serialized::default("progress_file", path.clone()));
        }
        if let Some(ref binary) = args.engine {
            self.figment = self
                .figment
                .merge(Serialized::default("engine.binary", binary.clone()));
        }
        if let Some(grace) = args.grace_ms {
            self.figment = self
                .figment
                .merge(Serialized::default("engine.grace_ms", grace));
        }
        if let Some(budget) = args.skip_budget {
            self.figment = self
                .figment
                .merge(Serialized::default("knobs.skip_cycle_budget", budget));
        }
        if let Some(period) = args.reseed_period {
            self.figment = self
                .figment
                .merge(Serialized::default("knobs.reseed_period", period));
        }
        self
    }

    /// Extract and validate the merged configuration without building.
    pub fn extract(self) -> Result<KeyloomConfig> {
        let mut config: KeyloomConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry;
        config.validate()?;
        Ok(config)
    }

    /// Build a supervisor driving the configured engine binary.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - Keyspace bounds, devices, target or knobs are invalid
    pub fn build(self) -> Result<Supervisor<CommandEngine>> {
        let config = self.extract()?;
        let metrics = Arc::new(KeyloomMetrics::with_prefix(&config.metrics_prefix));
        let engine = CommandEngine::from_config(&config.engine).with_metrics(metrics.clone());
        Supervisor::with_metrics(config, engine, metrics)
    }

    /// Build a supervisor driving a caller-provided engine.
    pub fn build_with_engine<E: SearchEngine>(self, engine: E) -> Result<Supervisor<E>> {
        let config = self.extract()?;
        Supervisor::new(config, engine)
    }
}

fn parse_window(s: &str) -> std::result::Result<(String, u32), String> {
    let (prefix, size) = s
        .split_once('=')
        .ok_or_else(|| format!("expected PREFIX=SIZE, got '{}'", s))?;
    let size = size
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid window size in '{}': {}", s, e))?;
    Ok((prefix.trim().to_string(), size))
}

/// CLI arguments for keyloom configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `KeyloomBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use keyloom::{KeyloomBuilder, KeyloomArgs};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     keyloom: KeyloomArgs,
/// }
///
/// let args = MyArgs::parse();
/// let supervisor = KeyloomBuilder::new()
///     .with_cli_args(&args.keyloom)
///     .build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct KeyloomArgs {
    /// Keyspace lower bound (hex)
    #[arg(long)]
    pub lower: Option<String>,

    /// Keyspace upper bound (hex, inclusive)
    #[arg(long)]
    pub upper: Option<String>,

    /// Block width as a power of two
    #[arg(long)]
    pub block_bits: Option<u32>,

    /// Device id; repeat for several workers
    #[arg(long = "device")]
    pub devices: Vec<String>,

    /// Target filter passed to the engine
    #[arg(long)]
    pub target: Option<String>,

    /// Continuation window as PREFIX=SIZE; repeatable
    #[arg(long = "window", value_parser = parse_window)]
    pub windows: Vec<(String, u32)>,

    /// Partition strategy
    #[arg(long, value_enum)]
    pub partition: Option<PartitionKind>,

    /// Seed for partition coefficients and worker RNGs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Progress file path
    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Engine binary path
    #[arg(long)]
    pub engine: Option<PathBuf>,

    /// Grace period for a terminated engine, in milliseconds
    #[arg(long)]
    pub grace_ms: Option<u64>,

    /// SKIP jumps before returning to RANDOM
    #[arg(long)]
    pub skip_budget: Option<u32>,

    /// Force RANDOM every this many probes (0 disables)
    #[arg(long)]
    pub reseed_period: Option<u64>,
}
