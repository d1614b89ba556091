//! Configuration knobs for the block scheduler.
//!
//! Defaults mirror a 2^40 block width: skip jumps of 2^40..2^64, a
//! 25-jump skip phase and four sequential retries after a random miss.

use serde::{Deserialize, Serialize};

use super::policy::{MissPolicy, RandomSource, SkipAnchor, WindowGrowth};
use crate::error::{KeyloomError, Result};

/// Jump exponents may exceed the keyspace width by this much.
const SKIP_BITS_MARGIN: u64 = 8;

/// Configuration knobs for the exploration/exploitation scheduler.
///
/// # State machine
///
/// ```text
///            miss (Sequential policy)          K misses
///   RANDOM ───────────────────────────► SEQUENTIAL ─────► RANDOM
///     │ hit                                 │ hit
///     ▼                                     ▼
///   WINDOW ◄────────────────────────────────┘
///     │ window_remaining == 0
///     ▼
///    SKIP ── hit ──► WINDOW
///     │ skip budget exhausted
///     ▼
///   RANDOM
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerKnobs {
    // === RANDOM / SEQUENTIAL ===
    /// What RANDOM does after a miss.
    /// Default: sequential
    pub miss_policy: MissPolicy,

    /// How RANDOM picks a block.
    /// Default: uniform
    pub random_source: RandomSource,

    /// Contiguous attempts (`K`) in SEQUENTIAL before returning to RANDOM.
    /// Default: 4
    pub sequential_limit: u32,

    /// Cursor steps taken past a block that is already done.
    /// Default: 1
    pub done_skip_step: u64,

    // === WINDOW ===
    /// Window size used when a hit matches no configured prefix.
    /// Default: 1
    pub default_window: u32,

    /// Rule for hits inside an active window.
    /// Default: extend
    pub window_growth: WindowGrowth,

    // === SKIP ===
    /// Jumps per SKIP phase before giving up and returning to RANDOM.
    /// Default: 25
    pub skip_cycle_budget: u32,

    /// Smallest jump exponent (inclusive).
    /// Default: 40
    pub skip_min_bits: u32,

    /// Largest jump exponent (inclusive).
    /// Default: 64
    pub skip_max_bits: u32,

    /// Where jumps are measured from.
    /// Default: fixed
    pub skip_anchor: SkipAnchor,

    // === Reseeding ===
    /// Force RANDOM every this many probes. 0 disables.
    /// Default: 0
    pub reseed_period: u64,

    /// Uniform jitter (+/-) applied to each reseed period.
    /// Default: 0
    pub reseed_jitter: u64,

    /// Force RANDOM after this many consecutive hits. 0 disables.
    /// Default: 0
    pub max_hit_streak: u32,

    // === Observability ===
    /// Emit a status line every this many probes. 0 disables.
    /// Default: 10
    pub status_interval: u64,
}

impl Default for SchedulerKnobs {
    fn default() -> Self {
        Self {
            miss_policy: MissPolicy::Sequential,
            random_source: RandomSource::Uniform,
            sequential_limit: 4,
            done_skip_step: 1,

            default_window: 1,
            window_growth: WindowGrowth::Extend,

            skip_cycle_budget: 25,
            skip_min_bits: 40,
            skip_max_bits: 64,
            skip_anchor: SkipAnchor::Fixed,

            reseed_period: 0,
            reseed_jitter: 0,
            max_hit_streak: 0,

            status_interval: 10,
        }
    }
}

impl SchedulerKnobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check internal consistency and compatibility with a keyspace of
    /// `2^block_bits` blocks spanning a `span_bits`-bit interval.
    pub fn validate(&self, block_bits: u32, span_bits: u64) -> Result<()> {
        if self.skip_min_bits > self.skip_max_bits {
            return Err(KeyloomError::InvalidKnobs(format!(
                "skip_min_bits {} > skip_max_bits {}",
                self.skip_min_bits, self.skip_max_bits
            )));
        }
        if self.skip_min_bits < block_bits {
            return Err(KeyloomError::InvalidKnobs(format!(
                "skip_min_bits {} is smaller than the block width 2^{}",
                self.skip_min_bits, block_bits
            )));
        }
        if u64::from(self.skip_max_bits) > span_bits + SKIP_BITS_MARGIN {
            return Err(KeyloomError::InvalidKnobs(format!(
                "skip_max_bits {} is far beyond the {}-bit keyspace",
                self.skip_max_bits, span_bits
            )));
        }
        if self.done_skip_step == 0 {
            return Err(KeyloomError::InvalidKnobs(
                "done_skip_step must be at least 1".to_string(),
            ));
        }
        if self.reseed_period > 0 && self.reseed_jitter >= self.reseed_period {
            return Err(KeyloomError::InvalidKnobs(format!(
                "reseed_jitter {} must be below reseed_period {}",
                self.reseed_jitter, self.reseed_period
            )));
        }
        Ok(())
    }

    pub fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    pub fn with_random_source(mut self, source: RandomSource) -> Self {
        self.random_source = source;
        self
    }

    pub fn with_sequential_limit(mut self, k: u32) -> Self {
        self.sequential_limit = k;
        self
    }

    pub fn with_default_window(mut self, window: u32) -> Self {
        self.default_window = window;
        self
    }

    pub fn with_window_growth(mut self, growth: WindowGrowth) -> Self {
        self.window_growth = growth;
        self
    }

    /// Set the skip budget and jump exponent range.
    pub fn with_skip(mut self, budget: u32, min_bits: u32, max_bits: u32) -> Self {
        self.skip_cycle_budget = budget;
        self.skip_min_bits = min_bits;
        self.skip_max_bits = max_bits;
        self
    }

    pub fn with_skip_anchor(mut self, anchor: SkipAnchor) -> Self {
        self.skip_anchor = anchor;
        self
    }

    pub fn with_reseed(mut self, period: u64, jitter: u64) -> Self {
        self.reseed_period = period;
        self.reseed_jitter = jitter;
        self
    }

    pub fn with_max_hit_streak(mut self, streak: u32) -> Self {
        self.max_hit_streak = streak;
        self
    }
}
