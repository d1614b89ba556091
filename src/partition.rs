//! Block allocation across workers.
//!
//! Every strategy numbers the keyspace's blocks with a *logical position*
//! `t = step * total_workers + worker`, so each worker owns exactly the
//! positions congruent to its id. When `total_blocks` is not a multiple of the
//! worker count, workers `0..r` (with `r = total_blocks mod total_workers`)
//! own one extra step each. A strategy then maps logical positions onto block
//! indices with a bijection on `[0, total_blocks)`:
//!
//! - [`StridePartition`]: identity, so worker `w` visits `w, w+N, w+2N, ...`
//! - [`PermutationPartition`]: modular affine map `(a*t + b) mod total_blocks`
//!   with `gcd(a, total_blocks) = 1`, which looks random but needs no visited set
//!
//! Workers consume their share through a [`BlockCursor`].

use std::fmt;
use std::sync::Arc;

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::keyspace::BlockIndex;

/// Which partition strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// Ascending interleave.
    Stride,
    /// Affine permutation of block indices.
    #[default]
    Permutation,
}

/// Maps `(worker, step)` pairs to disjoint block indices.
pub trait PartitionStrategy: Send + Sync + fmt::Debug {
    /// Total number of blocks being partitioned.
    fn total_blocks(&self) -> &BigUint;

    /// Number of workers sharing the keyspace.
    fn total_workers(&self) -> usize;

    /// Block index visited by `worker` at logical `step`.
    ///
    /// `step` must be below [`share`](Self::share) for `worker`.
    fn index_at(&self, worker: usize, step: &BigUint) -> BlockIndex;

    /// Number of steps (blocks) owned by `worker` in one full cycle.
    fn share(&self, worker: usize) -> BigUint {
        let workers = BigUint::from(self.total_workers());
        let (base, rem) = self.total_blocks().div_rem(&workers);
        if BigUint::from(worker) < rem {
            base + 1u32
        } else {
            base
        }
    }

    /// Logical position of `worker` at `step`.
    fn position(&self, worker: usize, step: &BigUint) -> BigUint {
        step * BigUint::from(self.total_workers()) + BigUint::from(worker)
    }
}

/// Worker `w` owns `{ i : i mod N == w }`, visited in ascending order.
#[derive(Debug, Clone)]
pub struct StridePartition {
    total_blocks: BigUint,
    total_workers: usize,
}

impl StridePartition {
    pub fn new(total_blocks: BigUint, total_workers: usize) -> Self {
        assert!(total_workers > 0, "partition requires at least one worker");
        Self {
            total_blocks,
            total_workers,
        }
    }
}

impl PartitionStrategy for StridePartition {
    fn total_blocks(&self) -> &BigUint {
        &self.total_blocks
    }

    fn total_workers(&self) -> usize {
        self.total_workers
    }

    fn index_at(&self, worker: usize, step: &BigUint) -> BlockIndex {
        self.position(worker, step)
    }
}

/// Affine permutation `index = (a * t + b) mod total_blocks`.
///
/// `a` and `b` are shared by every worker of one assignment; only then is the
/// map a bijection over the union of all workers' logical positions.
#[derive(Debug, Clone)]
pub struct PermutationPartition {
    total_blocks: BigUint,
    total_workers: usize,
    multiplier: BigUint,
    offset: BigUint,
}

impl PermutationPartition {
    /// Draw `a` (coprime with `total_blocks`) and `b` from `rng`.
    pub fn random<R: Rng + ?Sized>(total_blocks: BigUint, total_workers: usize, rng: &mut R) -> Self {
        assert!(total_workers > 0, "partition requires at least one worker");
        if total_blocks <= BigUint::one() {
            return Self {
                total_blocks,
                total_workers,
                multiplier: BigUint::one(),
                offset: BigUint::zero(),
            };
        }

        let multiplier = loop {
            let candidate = rng.gen_biguint_range(&BigUint::one(), &total_blocks);
            if candidate.gcd(&total_blocks).is_one() {
                break candidate;
            }
        };
        let offset = rng.gen_biguint_below(&total_blocks);

        Self {
            total_blocks,
            total_workers,
            multiplier,
            offset,
        }
    }

    /// Build with explicit coefficients, returning `None` if `a` is not
    /// coprime with `total_blocks`.
    pub fn with_coefficients(
        total_blocks: BigUint,
        total_workers: usize,
        multiplier: BigUint,
        offset: BigUint,
    ) -> Option<Self> {
        if total_workers == 0 || total_blocks.is_zero() {
            return None;
        }
        let multiplier = multiplier % &total_blocks;
        if !multiplier.gcd(&total_blocks).is_one() {
            return None;
        }
        let offset = offset % &total_blocks;
        Some(Self {
            total_blocks,
            total_workers,
            multiplier,
            offset,
        })
    }

    pub fn multiplier(&self) -> &BigUint {
        &self.multiplier
    }

    pub fn offset(&self) -> &BigUint {
        &self.offset
    }
}

impl PartitionStrategy for PermutationPartition {
    fn total_blocks(&self) -> &BigUint {
        &self.total_blocks
    }

    fn total_workers(&self) -> usize {
        self.total_workers
    }

    fn index_at(&self, worker: usize, step: &BigUint) -> BlockIndex {
        let t = self.position(worker, step);
        (&self.multiplier * t + &self.offset) % &self.total_blocks
    }
}

/// Build the partition selected by `kind`.
pub fn build_partition<R: Rng + ?Sized>(
    kind: PartitionKind,
    total_blocks: BigUint,
    total_workers: usize,
    rng: &mut R,
) -> Arc<dyn PartitionStrategy> {
    match kind {
        PartitionKind::Stride => Arc::new(StridePartition::new(total_blocks, total_workers)),
        PartitionKind::Permutation => Arc::new(PermutationPartition::random(
            total_blocks,
            total_workers,
            rng,
        )),
    }
}

/// Stateful position of one worker inside its partition share.
///
/// The cursor only moves through [`next`](Self::next) and
/// [`seek`](Self::seek); the block it points at is derived from the partition.
#[derive(Clone)]
pub struct BlockCursor {
    partition: Arc<dyn PartitionStrategy>,
    worker: usize,
    share: BigUint,
    step: BigUint,
}

impl BlockCursor {
    /// Cursor for `worker`, positioned at step 0.
    pub fn new(partition: Arc<dyn PartitionStrategy>, worker: usize) -> Self {
        let share = partition.share(worker);
        Self {
            partition,
            worker,
            share,
            step: BigUint::zero(),
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Number of blocks this cursor can visit per cycle.
    pub fn share(&self) -> &BigUint {
        &self.share
    }

    /// Current logical step.
    pub fn step(&self) -> &BigUint {
        &self.step
    }

    /// Block index at the current step.
    pub fn current(&self) -> BlockIndex {
        self.partition.index_at(self.worker, &self.step)
    }

    /// Advance by `steps` (wrapping at the share) and return the new block.
    pub fn next(&mut self, steps: u64) -> BlockIndex {
        if self.share.is_zero() {
            return self.current();
        }
        self.step = (&self.step + steps) % &self.share;
        self.current()
    }

    /// Jump to `step` (reduced modulo the share).
    pub fn seek(&mut self, step: BigUint) {
        self.step = if self.share.is_zero() {
            BigUint::zero()
        } else {
            step % &self.share
        };
    }

    /// Move to a uniformly random step and return its block.
    pub fn reseed<R: Rng + ?Sized>(&mut self, rng: &mut R) -> BlockIndex {
        if !self.share.is_zero() {
            self.step = rng.gen_biguint_below(&self.share);
        }
        self.current()
    }
}

impl fmt::Debug for BlockCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCursor")
            .field("worker", &self.worker)
            .field("step", &self.step)
            .field("share", &self.share)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn collect_cycle(partition: &Arc<dyn PartitionStrategy>) -> Vec<HashSet<BigUint>> {
        (0..partition.total_workers())
            .map(|w| {
                let mut cursor = BlockCursor::new(partition.clone(), w);
                let share = cursor.share().clone();
                let mut seen = HashSet::new();
                let mut count = BigUint::zero();
                seen.insert(cursor.current());
                count += 1u32;
                while count < share {
                    let idx = cursor.next(1);
                    assert!(seen.insert(idx), "worker {w} repeated a block within a cycle");
                    count += 1u32;
                }
                seen
            })
            .collect()
    }

    fn assert_exact_cover(partition: Arc<dyn PartitionStrategy>, total: u64) {
        let sets = collect_cycle(&partition);
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                assert!(
                    sets[i].is_disjoint(&sets[j]),
                    "workers {i} and {j} overlap (total={total})"
                );
            }
        }
        let union: HashSet<BigUint> = sets.into_iter().flatten().collect();
        let expected: HashSet<BigUint> = (0..total).map(BigUint::from).collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn test_stride_exact_cover() {
        for total in 1u64..=23 {
            for workers in 1usize..=(total as usize).min(7) {
                let p: Arc<dyn PartitionStrategy> =
                    Arc::new(StridePartition::new(BigUint::from(total), workers));
                assert_exact_cover(p, total);
            }
        }
    }

    #[test]
    fn test_permutation_exact_cover() {
        let mut rng = SmallRng::seed_from_u64(7);
        for total in 1u64..=23 {
            for workers in 1usize..=(total as usize).min(7) {
                let p: Arc<dyn PartitionStrategy> = Arc::new(PermutationPartition::random(
                    BigUint::from(total),
                    workers,
                    &mut rng,
                ));
                assert_exact_cover(p, total);
            }
        }
    }

    #[test]
    fn test_uneven_shares_go_to_lowest_workers() {
        let p = StridePartition::new(BigUint::from(10u32), 4);
        let shares: Vec<BigUint> = (0..4).map(|w| p.share(w)).collect();
        assert_eq!(
            shares,
            vec![3u32, 3, 2, 2].into_iter().map(BigUint::from).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_permutation_multiplier_is_coprime() {
        let mut rng = SmallRng::seed_from_u64(42);
        let total = BigUint::from(360u32);
        for _ in 0..50 {
            let p = PermutationPartition::random(total.clone(), 3, &mut rng);
            assert!(p.multiplier().gcd(&total).is_one());
            assert!(p.offset() < &total);
        }
    }

    #[test]
    fn test_with_coefficients_rejects_shared_factor() {
        let total = BigUint::from(12u32);
        assert!(PermutationPartition::with_coefficients(
            total.clone(),
            2,
            BigUint::from(4u32),
            BigUint::zero()
        )
        .is_none());
        let p = PermutationPartition::with_coefficients(total, 2, BigUint::from(5u32), BigUint::from(3u32))
            .unwrap();
        // t = 1 * 2 + 1 = 3 => (5*3 + 3) mod 12 = 6
        assert_eq!(p.index_at(1, &BigUint::one()), BigUint::from(6u32));
    }

    #[test]
    fn test_cursor_next_wraps() {
        let p: Arc<dyn PartitionStrategy> = Arc::new(StridePartition::new(BigUint::from(10u32), 3));
        let mut cursor = BlockCursor::new(p, 1);
        assert_eq!(cursor.share(), &BigUint::from(3u32));
        assert_eq!(cursor.current(), BigUint::from(1u32));
        assert_eq!(cursor.next(1), BigUint::from(4u32));
        assert_eq!(cursor.next(1), BigUint::from(7u32));
        assert_eq!(cursor.next(1), BigUint::from(1u32));
        assert_eq!(cursor.next(5), BigUint::from(7u32));
    }

    #[test]
    fn test_cursor_reseed_stays_in_partition() {
        let p: Arc<dyn PartitionStrategy> = Arc::new(StridePartition::new(BigUint::from(100u32), 4));
        let mut cursor = BlockCursor::new(p, 2);
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            let idx = cursor.reseed(&mut rng);
            assert_eq!(&idx % 4u32, BigUint::from(2u32));
        }
    }
}
