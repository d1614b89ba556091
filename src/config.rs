//! Configuration types for keyloom.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use prometheus::Registry;
use serde::{Deserialize, Serialize};

use crate::error::{KeyloomError, Result};
use crate::keyspace::Keyspace;
use crate::partition::PartitionKind;
use crate::sched::{PrefixWindowTable, SchedulerKnobs};

/// Default grace period for a terminated engine, in milliseconds.
pub const DEFAULT_GRACE_MS: u64 = 2_000;

/// Configuration for a keyloom search.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment
/// variables using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyloomConfig {
    /// Lower bound of the keyspace, hex (default: "400000000000000000")
    #[serde(default = "default_lower")]
    pub lower: String,

    /// Upper bound of the keyspace, hex, inclusive (default: "7FFFFFFFFFFFFFFFFF")
    #[serde(default = "default_upper")]
    pub upper: String,

    /// Block width as a power of two (default: 40)
    #[serde(default = "default_block_bits")]
    pub block_bits: u32,

    /// Device ids, one worker per device (default: ["0"])
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,

    /// Target filter handed to the engine. Required.
    #[serde(default)]
    pub target: String,

    /// Prefix of the matched text -> WINDOW size.
    #[serde(default)]
    pub windows: BTreeMap<String, u32>,

    /// Partition strategy (default: permutation)
    #[serde(default)]
    pub partition: PartitionKind,

    /// Seed for the shared partition coefficients. Random if unset.
    #[serde(default)]
    pub partition_seed: Option<u64>,

    /// Append-only record of probed blocks. In memory only if unset.
    #[serde(default = "default_progress_file")]
    pub progress_file: Option<PathBuf>,

    /// External engine invocation.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Scheduler knobs.
    #[serde(default)]
    pub knobs: SchedulerKnobs,

    /// Prefix for metric names (default: "keyloom")
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,

    /// Prometheus registry for metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

/// How the external engine binary is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path to the engine binary (default: "./vanitysearch")
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Output sink per device; `{device}` is replaced by the device id
    /// (default: "found-{device}.txt")
    #[serde(default = "default_output")]
    pub output: String,

    /// Extra arguments inserted before the target.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Milliseconds a terminated engine gets before it is killed (default: 2000)
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

fn default_lower() -> String {
    "400000000000000000".to_string()
}

fn default_upper() -> String {
    "7FFFFFFFFFFFFFFFFF".to_string()
}

fn default_block_bits() -> u32 {
    40
}

fn default_devices() -> Vec<String> {
    vec!["0".to_string()]
}

fn default_progress_file() -> Option<PathBuf> {
    Some(PathBuf::from("done_blocks.txt"))
}

fn default_metrics_prefix() -> String {
    "keyloom".to_string()
}

fn default_binary() -> PathBuf {
    PathBuf::from("./vanitysearch")
}

fn default_output() -> String {
    "found-{device}.txt".to_string()
}

fn default_grace_ms() -> u64 {
    DEFAULT_GRACE_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            output: default_output(),
            extra_args: Vec::new(),
            grace_ms: default_grace_ms(),
        }
    }
}

impl EngineConfig {
    /// Output sink for `device`.
    pub fn sink_for(&self, device: &str) -> PathBuf {
        PathBuf::from(self.output.replace("{device}", device))
    }
}

impl Default for KeyloomConfig {
    fn default() -> Self {
        Self {
            lower: default_lower(),
            upper: default_upper(),
            block_bits: default_block_bits(),
            devices: default_devices(),
            target: String::new(),
            windows: BTreeMap::new(),
            partition: PartitionKind::default(),
            partition_seed: None,
            progress_file: default_progress_file(),
            engine: EngineConfig::default(),
            knobs: SchedulerKnobs::default(),
            metrics_prefix: default_metrics_prefix(),
            prometheus_registry: None,
        }
    }
}

impl KeyloomConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the keyspace bounds.
    pub fn keyspace(&self) -> Result<Keyspace> {
        Keyspace::from_hex(&self.lower, &self.upper, self.block_bits)
    }

    /// Prefix window table built from `windows`.
    pub fn window_table(&self) -> PrefixWindowTable {
        PrefixWindowTable::from(&self.windows)
    }

    pub fn progress_path(&self) -> Option<&Path> {
        self.progress_file.as_deref()
    }

    /// Check everything that can be checked without running anything.
    ///
    /// Returns the parsed keyspace on success.
    pub fn validate(&self) -> Result<Keyspace> {
        let keyspace = self.keyspace()?;
        if self.devices.is_empty() {
            return Err(KeyloomError::NoDevices);
        }
        if self.target.trim().is_empty() {
            return Err(KeyloomError::EmptyTarget);
        }
        if keyspace.total_blocks() < &num_bigint::BigUint::from(self.devices.len()) {
            return Err(KeyloomError::TooManyWorkers {
                workers: self.devices.len(),
                blocks: keyspace.total_blocks().to_string(),
            });
        }
        self.knobs
            .validate(keyspace.block_bits(), keyspace.span_bits())?;
        Ok(keyspace)
    }
}
