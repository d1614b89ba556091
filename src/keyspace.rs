//! Keyspace model and block addressing arithmetic.
//!
//! A [`Keyspace`] is the closed interval `[lower, upper]` split into blocks of
//! `2^block_bits` values. Blocks are addressed by index; the absolute start of
//! a block is derived on demand and never stored.
//!
//! ```
//! use keyloom::keyspace::Keyspace;
//! use num_bigint::BigUint;
//!
//! let ks = Keyspace::from_hex("10", "1F", 2).unwrap();
//! assert_eq!(ks.total_blocks(), &BigUint::from(4u32));
//! assert_eq!(ks.start(&BigUint::from(3u32)), BigUint::from(0x1Cu32));
//! ```

use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};

use crate::error::{KeyloomError, Result};

/// Index of a block within a keyspace, in `[0, total_blocks)`.
pub type BlockIndex = BigUint;

/// Immutable description of the searched interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    lower: BigUint,
    upper: BigUint,
    block_bits: u32,
    block_size: BigUint,
    total_blocks: BigUint,
}

impl Keyspace {
    /// Create a keyspace, validating `lower <= upper` and that one block fits.
    pub fn new(lower: BigUint, upper: BigUint, block_bits: u32) -> Result<Self> {
        if lower > upper {
            return Err(KeyloomError::InvalidKeyspace(format!(
                "lower bound 0x{lower:x} exceeds upper bound 0x{upper:x}"
            )));
        }

        let span = &upper - &lower + 1u32;
        let block_size = BigUint::one() << block_bits;
        if block_size > span {
            return Err(KeyloomError::InvalidKeyspace(format!(
                "block size 2^{block_bits} exceeds keyspace span 0x{span:x}"
            )));
        }

        let total_blocks = span.div_ceil(&block_size);

        Ok(Self {
            lower,
            upper,
            block_bits,
            block_size,
            total_blocks,
        })
    }

    /// Create a keyspace from hex bounds, with or without a `0x` prefix.
    pub fn from_hex(lower: &str, upper: &str, block_bits: u32) -> Result<Self> {
        Self::new(parse_hex(lower)?, parse_hex(upper)?, block_bits)
    }

    pub fn lower(&self) -> &BigUint {
        &self.lower
    }

    pub fn upper(&self) -> &BigUint {
        &self.upper
    }

    pub fn block_bits(&self) -> u32 {
        self.block_bits
    }

    pub fn block_size(&self) -> &BigUint {
        &self.block_size
    }

    /// Bit length of the interval width `upper - lower + 1`.
    pub fn span_bits(&self) -> u64 {
        (&self.upper - &self.lower + 1u32).bits()
    }

    /// Number of blocks, counting a trailing partial block as one.
    pub fn total_blocks(&self) -> &BigUint {
        &self.total_blocks
    }

    /// Absolute start value of block `index`.
    pub fn start(&self, index: &BlockIndex) -> BigUint {
        &self.lower + index * &self.block_size
    }

    /// Index of the block containing `value`, clamped into the keyspace.
    pub fn index_of(&self, value: &BigUint) -> BlockIndex {
        if value <= &self.lower {
            return BigUint::zero();
        }
        let idx = (value - &self.lower) >> self.block_bits;
        if idx >= self.total_blocks {
            &self.total_blocks - 1u32
        } else {
            idx
        }
    }

    /// Largest offset from `lower` at which a full block still fits.
    pub fn max_offset(&self) -> BigUint {
        &self.upper - &self.lower + 1u32 - &self.block_size
    }

    /// Move `start` forward by `delta`, wrapping inside the valid offset domain
    /// `[0, max_offset]`.
    ///
    /// Applying this with `delta = 1` exactly `max_offset + 1` times returns
    /// to the original value.
    pub fn wrap_increment(&self, start: &BigUint, delta: &BigUint) -> BigUint {
        let modulus = self.max_offset() + 1u32;
        let off = (start - &self.lower + delta) % modulus;
        &self.lower + off
    }

    /// Next block index after `index`, wrapping at `total_blocks`.
    pub fn successor(&self, index: &BlockIndex) -> BlockIndex {
        let next = index + 1u32;
        if next >= self.total_blocks {
            BigUint::zero()
        } else {
            next
        }
    }
}

impl std::fmt::Display for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[0x{:x}, 0x{:x}] @2^{} ({} blocks)",
            self.lower, self.upper, self.block_bits, self.total_blocks
        )
    }
}

/// Parse an arbitrary-precision hex string, tolerating a `0x` prefix and
/// `_` separators.
pub fn parse_hex(s: &str) -> Result<BigUint> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .replace('_', "");
    if digits.is_empty() {
        return Err(KeyloomError::InvalidHex(s.to_string()));
    }
    BigUint::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| KeyloomError::InvalidHex(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_small_keyspace_addressing() {
        let ks = Keyspace::from_hex("0x10", "0x1F", 2).unwrap();
        assert_eq!(ks.block_size(), &big(4));
        assert_eq!(ks.total_blocks(), &big(4));
        assert_eq!(ks.start(&big(0)), big(0x10));
        assert_eq!(ks.start(&big(3)), big(0x1C));
        // width 16 needs 5 bits
        assert_eq!(ks.span_bits(), 5);
    }

    #[test]
    fn test_partial_trailing_block() {
        // span 10, block 4 => 3 blocks, last one partial
        let ks = Keyspace::new(big(0), big(9), 2).unwrap();
        assert_eq!(ks.total_blocks(), &big(3));
        assert_eq!(ks.index_of(&big(9)), big(2));
        assert_eq!(ks.index_of(&big(1000)), big(2));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let result = Keyspace::new(big(20), big(10), 1);
        assert!(matches!(result, Err(KeyloomError::InvalidKeyspace(_))));
    }

    #[test]
    fn test_rejects_oversized_block() {
        let result = Keyspace::new(big(0), big(7), 4);
        assert!(matches!(result, Err(KeyloomError::InvalidKeyspace(_))));
    }

    #[test]
    fn test_single_block_keyspace() {
        let ks = Keyspace::new(big(0), big(15), 4).unwrap();
        assert_eq!(ks.total_blocks(), &big(1));
        assert_eq!(ks.max_offset(), big(0));
        assert_eq!(ks.wrap_increment(&big(0), &big(12345)), big(0));
        assert_eq!(ks.successor(&big(0)), big(0));
    }

    #[test]
    fn test_wrap_increment_is_cyclic() {
        let ks = Keyspace::from_hex("10", "1F", 2).unwrap();
        let max_offset = ks.max_offset();
        assert_eq!(max_offset, big(12));

        for start in 0x10u64..=0x1C {
            let origin = big(start);
            let mut value = origin.clone();
            let steps = (&max_offset + 1u32).to_string().parse::<u64>().unwrap();
            for i in 1..=steps {
                value = ks.wrap_increment(&value, &big(1));
                if i < steps {
                    assert_ne!(value, origin, "returned early after {i} steps");
                }
            }
            assert_eq!(value, origin);
        }
    }

    #[test]
    fn test_wrap_increment_large_delta() {
        let ks = Keyspace::from_hex("400000000000000000", "7FFFFFFFFFFFFFFFFF", 40).unwrap();
        let start = ks.lower().clone();
        let jumped = ks.wrap_increment(&start, &(BigUint::one() << 64u32));
        assert!(&jumped >= ks.lower());
        assert!(jumped <= ks.lower() + ks.max_offset());
        assert_eq!(jumped, ks.lower() + (BigUint::one() << 64u32));
    }

    #[test]
    fn test_parse_hex_variants() {
        assert_eq!(parse_hex("ff").unwrap(), big(255));
        assert_eq!(parse_hex("0xFF").unwrap(), big(255));
        assert_eq!(parse_hex(" 0X1_00 ").unwrap(), big(256));
        assert!(matches!(parse_hex("0x"), Err(KeyloomError::InvalidHex(_))));
        assert!(matches!(parse_hex("xyz"), Err(KeyloomError::InvalidHex(_))));
    }

    #[test]
    fn test_display() {
        let ks = Keyspace::from_hex("10", "1F", 2).unwrap();
        assert_eq!(ks.to_string(), "[0x10, 0x1f] @2^2 (4 blocks)");
    }
}
