//! Core types for the exploration/exploitation scheduler.
//!
//! - `Mode`: the four scheduling states
//! - `SchedulerState`: per-worker mutable state
//! - `Probe`: one scheduled block
//! - `ScanResult`: outcome reported by the search engine for a probe
//! - `Transition`: what a recorded outcome did to the state machine

use num_bigint::BigUint;

use crate::keyspace::BlockIndex;

/// Scheduling state of one worker.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Mode {
    /// Draw a fresh block from the worker's partition share.
    #[default]
    Random,
    /// Walk forward contiguously after a random miss.
    Sequential,
    /// Burst of contiguous probes after a hit.
    Window,
    /// Coarse jumps around an anchor after a burst.
    Skip,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Random => "random",
            Mode::Sequential => "sequential",
            Mode::Window => "window",
            Mode::Skip => "skip",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state owned by a single scheduler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerState {
    pub mode: Mode,
    /// Size of the current (or most recent) window burst.
    pub window_size: u32,
    /// Probes left in the current window burst.
    pub window_remaining: u32,
    /// Contiguous attempts left in SEQUENTIAL mode.
    pub sequential_remaining: u32,
    /// Jumps left in the current SKIP phase.
    pub skip_remaining: u32,
    /// Jumps granted each time SKIP is (re)entered.
    pub skip_cycle_budget: u32,
    /// Last block handed out by the scheduler.
    pub last_block_index: Option<BlockIndex>,
    /// Reference block for SKIP jumps.
    pub anchor_index: Option<BlockIndex>,
    /// Number of completed probes.
    pub scan_count: u64,
    /// Consecutive probes that reported a hit.
    pub hit_streak: u32,
}

impl SchedulerState {
    /// Initial state with the given skip budget.
    pub fn new(skip_cycle_budget: u32) -> Self {
        Self {
            skip_cycle_budget,
            ..Default::default()
        }
    }
}

/// A block chosen by the scheduler, waiting for its outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Probe {
    /// Block index within the keyspace.
    pub index: BlockIndex,
    /// Absolute start value of the block.
    pub start: BigUint,
    /// Mode that produced this probe.
    pub mode: Mode,
    /// Jump exponent for SKIP probes.
    pub skip_bits: Option<u32>,
}

/// Outcome of one block probe, as reported by the search engine.
///
/// Engine failures are reported as misses, so there is no error variant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub hit: bool,
    /// The matched string (e.g. the address that matched the target).
    pub matched_text: Option<String>,
    /// Secret material associated with the most recent match.
    pub matched_secret: Option<String>,
}

impl ScanResult {
    pub fn miss() -> Self {
        Self::default()
    }

    pub fn hit(matched_text: impl Into<String>) -> Self {
        Self {
            hit: true,
            matched_text: Some(matched_text.into()),
            matched_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.matched_secret = Some(secret.into());
        self
    }
}

/// Effect of recording a probe outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Mode unchanged.
    Stay(Mode),
    /// Entered a new mode.
    Enter { from: Mode, to: Mode },
    /// Forced back to RANDOM by the reseed timer or hit-streak limit.
    Reseed { from: Mode },
}

impl Transition {
    /// Mode the scheduler is in after the transition.
    pub fn mode(&self) -> Mode {
        match self {
            Transition::Stay(mode) => *mode,
            Transition::Enter { to, .. } => *to,
            Transition::Reseed { .. } => Mode::Random,
        }
    }
}
