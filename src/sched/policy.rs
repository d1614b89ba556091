//! Pluggable rules for the scheduler state machine.
//!
//! Each rule captures one axis on which scheduling variants differ. They are
//! plain enums so they serialize straight out of configuration.

use serde::{Deserialize, Serialize};

/// What RANDOM does after a miss.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Stay in RANDOM and draw again.
    Resample,
    /// Walk up to `sequential_limit` contiguous blocks before drawing again.
    #[default]
    Sequential,
}

/// How RANDOM picks a block from the worker's share.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomSource {
    /// Uniform draw over the worker's share.
    #[default]
    Uniform,
    /// Next step of the worker's partition cursor.
    Cursor,
}

/// How a hit inside an active WINDOW affects the burst.
///
/// Both rules keep `window_size` monotone: a weaker hit never shrinks it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowGrowth {
    /// Grow `window_size` and extend the remaining burst by the growth.
    #[default]
    Extend,
    /// Grow `window_size` only; the current burst length is unchanged and the
    /// larger size applies to the next window.
    Retain,
}

impl WindowGrowth {
    /// Apply a new candidate to `(size, remaining)`.
    pub fn apply(&self, size: u32, remaining: u32, candidate: u32) -> (u32, u32) {
        if candidate <= size {
            return (size, remaining);
        }
        match self {
            WindowGrowth::Extend => (candidate, remaining.saturating_add(candidate - size)),
            WindowGrowth::Retain => (candidate, remaining),
        }
    }
}

/// Where SKIP jumps are measured from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipAnchor {
    /// Every jump starts from the block where the WINDOW ended.
    #[default]
    Fixed,
    /// Each jump starts from the previous jump's block.
    Compound,
}
