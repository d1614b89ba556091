//! Per-worker exploration/exploitation state machine.
//!
//! The scheduler hands out one [`Probe`] at a time and expects the outcome
//! back through [`Scheduler::record`] before the next one. Every recorded
//! outcome makes exactly one state transition.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::knobs::SchedulerKnobs;
use super::policy::{MissPolicy, RandomSource, SkipAnchor};
use super::prefix::PrefixWindowTable;
use super::types::{Mode, Probe, ScanResult, SchedulerState, Transition};
use crate::keyspace::{BlockIndex, Keyspace};
use crate::partition::{BlockCursor, PartitionStrategy};
use crate::progress::ProgressStore;

/// Uniform draws attempted before falling back to walking the cursor.
const UNIFORM_ATTEMPTS: usize = 64;

/// Exploration/exploitation scheduler for one worker.
///
/// RANDOM and SEQUENTIAL explore; WINDOW exploits the blocks right after a
/// hit; SKIP probes the coarse neighborhood of the burst before giving up.
/// Blocks already present in the shared [`ProgressStore`] are never handed
/// out.
///
/// ```ignore
/// let mut sched = Scheduler::new(0, keyspace, partition, progress, table, knobs);
/// while let Some(probe) = sched.next_probe() {
///     let result = engine.probe(&request_for(&probe), &cancel).await;
///     sched.record(&result);
/// }
/// ```
pub struct Scheduler {
    worker: usize,
    keyspace: Arc<Keyspace>,
    cursor: BlockCursor,
    progress: Arc<ProgressStore>,
    table: Arc<PrefixWindowTable>,
    knobs: Arc<SchedulerKnobs>,
    state: SchedulerState,
    pending: Option<Probe>,
    /// Probe count at which the next forced reseed happens.
    next_reseed_at: Option<u64>,
    /// Blocks passed over because they were already done.
    skipped_done: u64,
    rng: SmallRng,
}

impl Scheduler {
    /// Create a scheduler seeded from OS entropy.
    pub fn new(
        worker: usize,
        keyspace: Arc<Keyspace>,
        partition: Arc<dyn PartitionStrategy>,
        progress: Arc<ProgressStore>,
        table: Arc<PrefixWindowTable>,
        knobs: Arc<SchedulerKnobs>,
    ) -> Self {
        Self::with_rng(
            worker,
            keyspace,
            partition,
            progress,
            table,
            knobs,
            SmallRng::from_entropy(),
        )
    }

    /// Create a scheduler with an explicit RNG (deterministic in tests).
    pub fn with_rng(
        worker: usize,
        keyspace: Arc<Keyspace>,
        partition: Arc<dyn PartitionStrategy>,
        progress: Arc<ProgressStore>,
        table: Arc<PrefixWindowTable>,
        knobs: Arc<SchedulerKnobs>,
        rng: SmallRng,
    ) -> Self {
        let cursor = BlockCursor::new(partition, worker);
        let state = SchedulerState::new(knobs.skip_cycle_budget);
        let mut scheduler = Self {
            worker,
            keyspace,
            cursor,
            progress,
            table,
            knobs,
            state,
            pending: None,
            next_reseed_at: None,
            skipped_done: 0,
            rng,
        };
        scheduler.cursor.reseed(&mut scheduler.rng);
        scheduler.next_reseed_at = scheduler.schedule_reseed();
        scheduler
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn knobs(&self) -> &SchedulerKnobs {
        &self.knobs
    }

    /// Probe handed out by [`next_probe`](Self::next_probe) and not yet recorded.
    pub fn pending(&self) -> Option<&Probe> {
        self.pending.as_ref()
    }

    /// Number of done blocks passed over so far.
    pub fn skipped_done(&self) -> u64 {
        self.skipped_done
    }

    /// True when every block of the keyspace has been probed.
    pub fn is_exhausted(&self) -> bool {
        &BigUint::from(self.progress.len()) >= self.keyspace.total_blocks()
    }

    /// Choose the next block to probe.
    ///
    /// Returns the pending probe again if the previous one was never
    /// recorded. Returns `None` once the keyspace is exhausted.
    pub fn next_probe(&mut self) -> Option<Probe> {
        if let Some(pending) = &self.pending {
            return Some(pending.clone());
        }
        if self.is_exhausted() {
            return None;
        }

        let mode = self.state.mode;
        let (index, skip_bits) = match mode {
            Mode::Random => (self.draw_random()?, None),
            Mode::Sequential | Mode::Window => {
                let from = match &self.state.last_block_index {
                    Some(last) => self.keyspace.successor(last),
                    None => self.draw_random()?,
                };
                (self.next_free_forward(from)?, None)
            }
            Mode::Skip => {
                let (target, bits) = self.skip_target();
                (self.next_free_forward(target)?, Some(bits))
            }
        };

        let probe = Probe {
            start: self.keyspace.start(&index),
            index,
            mode,
            skip_bits,
        };
        self.state.last_block_index = Some(probe.index.clone());
        self.pending = Some(probe.clone());
        Some(probe)
    }

    /// Record the outcome of the pending probe and transition.
    ///
    /// The probed block is marked done in the progress store. Calling this
    /// without a pending probe is a no-op.
    pub fn record(&mut self, result: &ScanResult) -> Transition {
        let Some(probe) = self.pending.take() else {
            return Transition::Stay(self.state.mode);
        };

        self.progress.mark_done(&probe.index);
        self.state.scan_count += 1;
        if result.hit {
            self.state.hit_streak += 1;
        } else {
            self.state.hit_streak = 0;
        }

        let from = self.state.mode;
        let candidate = self
            .table
            .window_for(result.matched_text.as_deref(), self.knobs.default_window)
            .max(1);

        match from {
            Mode::Random => {
                if result.hit {
                    self.enter_window(candidate, &probe, result);
                } else {
                    match self.knobs.miss_policy {
                        MissPolicy::Sequential if self.knobs.sequential_limit > 0 => {
                            self.state.mode = Mode::Sequential;
                            self.state.sequential_remaining = self.knobs.sequential_limit;
                        }
                        _ => {}
                    }
                }
            }
            Mode::Sequential => {
                if result.hit {
                    self.enter_window(candidate, &probe, result);
                } else {
                    self.state.sequential_remaining =
                        self.state.sequential_remaining.saturating_sub(1);
                    if self.state.sequential_remaining == 0 {
                        self.state.mode = Mode::Random;
                    }
                }
            }
            Mode::Window => {
                if result.hit {
                    let (size, remaining) = self.knobs.window_growth.apply(
                        self.state.window_size,
                        self.state.window_remaining,
                        candidate,
                    );
                    if size > self.state.window_size {
                        info!(
                            worker = self.worker,
                            index = %probe.index,
                            window = size,
                            matched = ?result.matched_text,
                            "window grown"
                        );
                    }
                    self.state.window_size = size;
                    self.state.window_remaining = remaining;
                }
                self.state.window_remaining = self.state.window_remaining.saturating_sub(1);
                if self.state.window_remaining == 0 {
                    self.enter_skip(probe.index.clone());
                }
            }
            Mode::Skip => {
                if result.hit {
                    let size = self.state.window_size.max(candidate);
                    self.state.skip_remaining = self.state.skip_cycle_budget;
                    self.state.window_size = size;
                    self.state.window_remaining = size;
                    self.state.mode = Mode::Window;
                    info!(
                        worker = self.worker,
                        index = %probe.index,
                        window = size,
                        matched = ?result.matched_text,
                        "skip hit, re-entering window"
                    );
                } else {
                    if self.knobs.skip_anchor == SkipAnchor::Compound {
                        self.state.anchor_index = Some(probe.index.clone());
                    }
                    self.state.skip_remaining = self.state.skip_remaining.saturating_sub(1);
                    if self.state.skip_remaining == 0 {
                        debug!(worker = self.worker, "skip budget exhausted");
                        self.state.anchor_index = None;
                        self.state.mode = Mode::Random;
                    }
                }
            }
        }

        let streak_limit =
            self.knobs.max_hit_streak > 0 && self.state.hit_streak >= self.knobs.max_hit_streak;
        if streak_limit || self.reseed_due() {
            debug!(
                worker = self.worker,
                scans = self.state.scan_count,
                streak_limit,
                "forcing reseed"
            );
            self.reseed();
            return Transition::Reseed { from };
        }

        let to = self.state.mode;
        if from == to {
            Transition::Stay(to)
        } else {
            debug!(worker = self.worker, %from, %to, "mode transition");
            Transition::Enter { from, to }
        }
    }

    /// Return to the initial RANDOM state at a fresh cursor position.
    ///
    /// Clears any pending probe without recording it.
    pub fn reseed(&mut self) {
        let scan_count = self.state.scan_count;
        self.state = SchedulerState::new(self.knobs.skip_cycle_budget);
        self.state.scan_count = scan_count;
        self.pending = None;
        self.cursor.reseed(&mut self.rng);
        self.next_reseed_at = self.schedule_reseed();
    }

    fn enter_window(&mut self, size: u32, probe: &Probe, result: &ScanResult) {
        self.state.window_size = size;
        self.state.window_remaining = size;
        self.state.sequential_remaining = 0;
        self.state.mode = Mode::Window;
        info!(
            worker = self.worker,
            index = %probe.index,
            window = size,
            matched = ?result.matched_text,
            "hit, entering window"
        );
    }

    fn enter_skip(&mut self, anchor: BlockIndex) {
        if self.state.skip_cycle_budget == 0 {
            self.state.mode = Mode::Random;
            return;
        }
        self.state.anchor_index = Some(anchor);
        self.state.skip_remaining = self.state.skip_cycle_budget;
        self.state.mode = Mode::Skip;
    }

    fn schedule_reseed(&mut self) -> Option<u64> {
        let period = self.knobs.reseed_period;
        if period == 0 {
            return None;
        }
        let jitter = self.knobs.reseed_jitter.min(period - 1);
        let span = period - jitter + self.rng.gen_range(0..=2 * jitter);
        Some(self.state.scan_count + span)
    }

    fn reseed_due(&self) -> bool {
        matches!(self.next_reseed_at, Some(at) if self.state.scan_count >= at)
    }

    /// Block reached by jumping `2^k` from the anchor.
    fn skip_target(&mut self) -> (BlockIndex, u32) {
        let anchor = self
            .state
            .anchor_index
            .clone()
            .or_else(|| self.state.last_block_index.clone())
            .unwrap_or_else(|| self.cursor.current());
        let bits = self
            .rng
            .gen_range(self.knobs.skip_min_bits..=self.knobs.skip_max_bits);
        let delta = BigUint::one() << bits;
        let target = self
            .keyspace
            .wrap_increment(&self.keyspace.start(&anchor), &delta);
        (self.keyspace.index_of(&target), bits)
    }

    /// Draw a block from this worker's share, skipping done blocks.
    fn draw_random(&mut self) -> Option<BlockIndex> {
        if self.knobs.random_source == RandomSource::Uniform {
            for _ in 0..UNIFORM_ATTEMPTS {
                let index = self.cursor.reseed(&mut self.rng);
                if !self.progress.contains(&index) {
                    self.cursor.next(1);
                    return Some(index);
                }
                self.skipped_done += 1;
            }
        }
        self.walk_cursor()
    }

    /// Walk the cursor until a free block turns up. Falls back to a global
    /// forward scan once this worker's share looks used up.
    fn walk_cursor(&mut self) -> Option<BlockIndex> {
        let mut attempts = 0usize;
        loop {
            let index = self.cursor.current();
            if !self.progress.contains(&index) {
                self.cursor.next(1);
                return Some(index);
            }
            self.skipped_done += 1;
            attempts += 1;
            if attempts > self.progress.len() || &BigUint::from(attempts) >= self.cursor.share() {
                break;
            }
            self.cursor.next(self.knobs.done_skip_step);
        }

        let from = self.cursor.current();
        self.next_free_forward(from)
    }

    /// First block at or after `from` (wrapping) that is not done yet.
    fn next_free_forward(&mut self, from: BlockIndex) -> Option<BlockIndex> {
        let mut index = from;
        let mut scanned = 0usize;
        loop {
            if !self.progress.contains(&index) {
                return Some(index);
            }
            self.skipped_done += 1;
            scanned += 1;
            if scanned > self.progress.len() {
                return None;
            }
            index = self.keyspace.successor(&index);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker", &self.worker)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PermutationPartition, StridePartition};
    use crate::sched::policy::WindowGrowth;
    use std::collections::HashSet;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    /// 64 blocks of 4 values each.
    fn small_keyspace() -> Arc<Keyspace> {
        Arc::new(Keyspace::new(big(0), big(255), 2).unwrap())
    }

    fn table() -> Arc<PrefixWindowTable> {
        Arc::new(PrefixWindowTable::new([("abc", 5), ("ab", 2), ("x", 3)]))
    }

    fn knobs() -> SchedulerKnobs {
        SchedulerKnobs::default()
            .with_miss_policy(MissPolicy::Resample)
            .with_skip(5, 2, 5)
    }

    fn scheduler_with(knobs: SchedulerKnobs, seed: u64) -> (Scheduler, Arc<ProgressStore>) {
        let ks = small_keyspace();
        let partition: Arc<dyn PartitionStrategy> =
            Arc::new(StridePartition::new(ks.total_blocks().clone(), 1));
        let progress = Arc::new(ProgressStore::in_memory());
        let sched = Scheduler::with_rng(
            0,
            ks,
            partition,
            progress.clone(),
            table(),
            Arc::new(knobs),
            SmallRng::seed_from_u64(seed),
        );
        (sched, progress)
    }

    fn step(sched: &mut Scheduler, result: ScanResult) -> (Probe, Transition) {
        let probe = sched.next_probe().expect("keyspace should not be exhausted");
        let transition = sched.record(&result);
        (probe, transition)
    }

    #[test]
    fn test_starts_in_random() {
        let (mut sched, _) = scheduler_with(knobs(), 1);
        assert_eq!(sched.mode(), Mode::Random);
        let probe = sched.next_probe().unwrap();
        assert_eq!(probe.mode, Mode::Random);
        assert_eq!(probe.start, &probe.index * 4u32);
    }

    #[test]
    fn test_next_probe_is_idempotent_until_recorded() {
        let (mut sched, _) = scheduler_with(knobs(), 2);
        let a = sched.next_probe().unwrap();
        let b = sched.next_probe().unwrap();
        assert_eq!(a, b);
        sched.record(&ScanResult::miss());
        assert!(sched.pending().is_none());
    }

    #[test]
    fn test_record_without_pending_is_noop() {
        let (mut sched, progress) = scheduler_with(knobs(), 3);
        assert_eq!(sched.record(&ScanResult::hit("abc")), Transition::Stay(Mode::Random));
        assert!(progress.is_empty());
        assert_eq!(sched.state().scan_count, 0);
    }

    #[test]
    fn test_window_burst_length_independent_of_misses() {
        let (mut sched, _) = scheduler_with(knobs(), 4);
        let (first, t) = step(&mut sched, ScanResult::hit("xyz"));
        assert_eq!(t, Transition::Enter { from: Mode::Random, to: Mode::Window });
        assert_eq!(sched.state().window_size, 3);

        let mut prev = first.index.clone();
        for i in 0..3 {
            // a weaker hit in the middle must not change the burst length
            let result = if i == 1 { ScanResult::hit("zzz") } else { ScanResult::miss() };
            let (probe, _) = step(&mut sched, result);
            assert_eq!(probe.mode, Mode::Window);
            assert_eq!(probe.index, (&prev + 1u32) % 64u32);
            prev = probe.index;
        }
        assert_eq!(sched.mode(), Mode::Skip);
        assert_eq!(sched.state().anchor_index, Some(prev));
    }

    #[test]
    fn test_window_size_never_shrinks() {
        let (mut sched, _) = scheduler_with(knobs(), 5);
        step(&mut sched, ScanResult::hit("abcdef"));
        assert_eq!(sched.state().window_size, 5);

        step(&mut sched, ScanResult::hit("abzzz"));
        assert_eq!(sched.state().window_size, 5);
        assert_eq!(sched.state().window_remaining, 4);
    }

    #[test]
    fn test_window_extend_growth() {
        let (mut sched, _) = scheduler_with(knobs(), 6);
        step(&mut sched, ScanResult::hit("ab"));
        assert_eq!(sched.state().window_size, 2);

        step(&mut sched, ScanResult::hit("abc"));
        assert_eq!(sched.state().window_size, 5);
        // 2 remaining + 3 growth - 1 probe
        assert_eq!(sched.state().window_remaining, 4);
    }

    #[test]
    fn test_window_retain_growth() {
        let (mut sched, _) = scheduler_with(knobs().with_window_growth(WindowGrowth::Retain), 6);
        step(&mut sched, ScanResult::hit("ab"));
        step(&mut sched, ScanResult::hit("abc"));
        assert_eq!(sched.state().window_size, 5);
        assert_eq!(sched.state().window_remaining, 1);
        step(&mut sched, ScanResult::miss());
        assert_eq!(sched.mode(), Mode::Skip);
    }

    #[test]
    fn test_sequential_after_random_miss() {
        let knobs = knobs()
            .with_miss_policy(MissPolicy::Sequential)
            .with_sequential_limit(3);
        let (mut sched, _) = scheduler_with(knobs, 7);

        let (first, t) = step(&mut sched, ScanResult::miss());
        assert_eq!(t, Transition::Enter { from: Mode::Random, to: Mode::Sequential });

        let mut prev = first.index;
        for _ in 0..3 {
            let (probe, _) = step(&mut sched, ScanResult::miss());
            assert_eq!(probe.mode, Mode::Sequential);
            assert_eq!(probe.index, (&prev + 1u32) % 64u32);
            prev = probe.index;
        }
        assert_eq!(sched.mode(), Mode::Random);
    }

    #[test]
    fn test_sequential_hit_enters_window() {
        let knobs = knobs().with_miss_policy(MissPolicy::Sequential);
        let (mut sched, _) = scheduler_with(knobs, 8);
        step(&mut sched, ScanResult::miss());
        let (_, t) = step(&mut sched, ScanResult::hit("ab"));
        assert_eq!(t, Transition::Enter { from: Mode::Sequential, to: Mode::Window });
        assert_eq!(sched.state().window_remaining, 2);
        assert_eq!(sched.state().sequential_remaining, 0);
    }

    #[test]
    fn test_resample_policy_stays_random() {
        let (mut sched, _) = scheduler_with(knobs(), 9);
        for _ in 0..10 {
            let (_, t) = step(&mut sched, ScanResult::miss());
            assert_eq!(t, Transition::Stay(Mode::Random));
        }
    }

    #[test]
    fn test_fixed_anchor_jumps_do_not_compound() {
        let ks = Arc::new(Keyspace::new(big(0), (BigUint::one() << 40u32) - 1u32, 4).unwrap());
        let partition: Arc<dyn PartitionStrategy> =
            Arc::new(StridePartition::new(ks.total_blocks().clone(), 1));
        let knobs = SchedulerKnobs::default()
            .with_miss_policy(MissPolicy::Resample)
            .with_skip(10, 8, 30);
        let mut sched = Scheduler::with_rng(
            0,
            ks.clone(),
            partition,
            Arc::new(ProgressStore::in_memory()),
            table(),
            Arc::new(knobs),
            SmallRng::seed_from_u64(10),
        );

        step(&mut sched, ScanResult::hit("q"));
        let (window_probe, _) = step(&mut sched, ScanResult::miss());
        assert_eq!(sched.mode(), Mode::Skip);
        let anchor = window_probe.index;

        for _ in 0..9 {
            let (probe, _) = step(&mut sched, ScanResult::miss());
            let bits = probe.skip_bits.unwrap();
            let expected = ks.index_of(&ks.wrap_increment(&ks.start(&anchor), &(BigUint::one() << bits)));
            assert_eq!(probe.index, expected);
            assert_eq!(sched.state().anchor_index.as_ref(), Some(&anchor));
        }
    }

    #[test]
    fn test_compound_anchor_follows_jumps() {
        let knobs = knobs().with_skip_anchor(SkipAnchor::Compound);
        let (mut sched, _) = scheduler_with(knobs, 11);
        step(&mut sched, ScanResult::hit("q"));
        step(&mut sched, ScanResult::miss());
        assert_eq!(sched.mode(), Mode::Skip);

        let (probe, _) = step(&mut sched, ScanResult::miss());
        assert_eq!(sched.state().anchor_index, Some(probe.index));
    }

    #[test]
    fn test_skip_hit_reenters_window_with_budget_reset() {
        let (mut sched, _) = scheduler_with(knobs(), 12);
        step(&mut sched, ScanResult::hit("ab"));
        step(&mut sched, ScanResult::miss());
        step(&mut sched, ScanResult::miss());
        assert_eq!(sched.mode(), Mode::Skip);

        step(&mut sched, ScanResult::miss());
        assert_eq!(sched.state().skip_remaining, 4);

        let (probe, t) = step(&mut sched, ScanResult::hit("x"));
        assert_eq!(probe.mode, Mode::Skip);
        assert_eq!(t, Transition::Enter { from: Mode::Skip, to: Mode::Window });
        // carried window size 2 grows to 3
        assert_eq!(sched.state().window_size, 3);
        assert_eq!(sched.state().window_remaining, 3);
        assert_eq!(sched.state().skip_remaining, 5);
    }

    #[test]
    fn test_skip_exhaustion_returns_to_random() {
        let (mut sched, _) = scheduler_with(knobs(), 13);
        step(&mut sched, ScanResult::hit("q"));
        step(&mut sched, ScanResult::miss());
        for i in 0..5 {
            assert_eq!(sched.mode(), Mode::Skip, "jump {i}");
            step(&mut sched, ScanResult::miss());
        }
        assert_eq!(sched.mode(), Mode::Random);
        assert!(sched.state().anchor_index.is_none());
    }

    #[test]
    fn test_post_skip_random_draw_is_uniform_over_available() {
        const TRIALS: u64 = 4000;
        let mut counts = vec![0u32; 64];

        for seed in 0..TRIALS {
            let (mut sched, progress) = scheduler_with(knobs(), seed);
            step(&mut sched, ScanResult::hit("ab"));
            step(&mut sched, ScanResult::miss());
            step(&mut sched, ScanResult::miss());
            for _ in 0..5 {
                step(&mut sched, ScanResult::miss());
            }
            assert_eq!(sched.mode(), Mode::Random);

            let probe = sched.next_probe().unwrap();
            assert_eq!(probe.mode, Mode::Random);
            assert!(!progress.contains(&probe.index));
            let idx: usize = probe.index.to_string().parse().unwrap();
            counts[idx] += 1;
        }

        // 8 of 64 blocks are done in each trial; expected count ~62 per block.
        let mean = TRIALS as f64 / 64.0;
        for (idx, &count) in counts.iter().enumerate() {
            assert!(count > 0, "block {idx} never drawn");
            assert!(
                (count as f64) < mean * 2.5,
                "block {idx} drawn {count} times (mean {mean})"
            );
        }
    }

    #[test]
    fn test_reseed_period_forces_random() {
        let knobs = knobs().with_reseed(3, 0);
        let (mut sched, _) = scheduler_with(knobs, 14);
        step(&mut sched, ScanResult::hit("abc"));
        step(&mut sched, ScanResult::miss());
        let (_, t) = step(&mut sched, ScanResult::miss());
        assert_eq!(t, Transition::Reseed { from: Mode::Window });
        assert_eq!(sched.mode(), Mode::Random);
        assert_eq!(sched.state().window_size, 0);
        assert_eq!(sched.state().scan_count, 3);
    }

    #[test]
    fn test_hit_streak_limit_forces_random() {
        let knobs = knobs().with_max_hit_streak(2);
        let (mut sched, _) = scheduler_with(knobs, 15);
        let (_, t) = step(&mut sched, ScanResult::hit("abc"));
        assert_eq!(t.mode(), Mode::Window);
        let (_, t) = step(&mut sched, ScanResult::hit("abc"));
        assert_eq!(t, Transition::Reseed { from: Mode::Window });
        assert_eq!(sched.state().hit_streak, 0);
    }

    #[test]
    fn test_never_returns_done_blocks() {
        let (mut sched, progress) = scheduler_with(knobs(), 16);
        for i in 0..60u64 {
            progress.mark_done(&big(i));
        }
        let mut seen = HashSet::new();
        while let Some(probe) = sched.next_probe() {
            assert!(probe.index >= big(60), "handed out done block {}", probe.index);
            assert!(seen.insert(probe.index.clone()));
            sched.record(&ScanResult::miss());
        }
        assert_eq!(seen.len(), 4);
        assert!(sched.is_exhausted());
        assert!(sched.skipped_done() > 0);
    }

    #[test]
    fn test_window_skips_done_blocks() {
        let (mut sched, progress) = scheduler_with(knobs(), 17);
        let (first, _) = step(&mut sched, ScanResult::hit("x"));
        let next = (&first.index + 1u32) % 64u32;
        progress.mark_done(&next);

        let (probe, _) = step(&mut sched, ScanResult::miss());
        assert_eq!(probe.mode, Mode::Window);
        assert_eq!(probe.index, (&first.index + 2u32) % 64u32);
    }

    #[test]
    fn test_random_draws_respect_partition() {
        let ks = small_keyspace();
        let partition: Arc<dyn PartitionStrategy> =
            Arc::new(StridePartition::new(ks.total_blocks().clone(), 4));
        let mut sched = Scheduler::with_rng(
            2,
            ks,
            partition,
            Arc::new(ProgressStore::in_memory()),
            table(),
            Arc::new(knobs()),
            SmallRng::seed_from_u64(18),
        );
        for _ in 0..16 {
            let (probe, _) = step(&mut sched, ScanResult::miss());
            assert_eq!(&probe.index % 4u32, big(2));
        }
    }

    #[test]
    fn test_cursor_source_walks_permutation() {
        let ks = small_keyspace();
        let partition: Arc<dyn PartitionStrategy> = Arc::new(
            PermutationPartition::with_coefficients(ks.total_blocks().clone(), 2, big(5), big(3))
                .unwrap(),
        );
        let knobs = knobs().with_random_source(RandomSource::Cursor);
        let mut sched = Scheduler::with_rng(
            1,
            ks,
            partition.clone(),
            Arc::new(ProgressStore::in_memory()),
            table(),
            Arc::new(knobs),
            SmallRng::seed_from_u64(19),
        );

        let owned: HashSet<BigUint> = (0..32u64)
            .map(|s| partition.index_at(1, &big(s)))
            .collect();
        let mut seen = HashSet::new();
        for _ in 0..32 {
            let (probe, _) = step(&mut sched, ScanResult::miss());
            assert!(owned.contains(&probe.index));
            seen.insert(probe.index);
        }
        assert_eq!(seen, owned);
    }

    #[test]
    fn test_explicit_reseed_resets_state() {
        let (mut sched, _) = scheduler_with(knobs(), 20);
        step(&mut sched, ScanResult::hit("abc"));
        sched.next_probe();
        sched.reseed();
        assert!(sched.pending().is_none());
        assert_eq!(sched.mode(), Mode::Random);
        assert_eq!(sched.state().window_remaining, 0);
        assert_eq!(sched.state().scan_count, 1);
    }
}
