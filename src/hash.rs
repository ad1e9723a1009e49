//! Bucket-id extraction from record keys.
//!
//! Two interchangeable choices: masking the low b bits, and a multiplicative
//! hash that takes the top b bits of `key * phi`. Which one wins depends on
//! the key distribution (low-bit masking is free but trusts the low bits to
//! be uniform), so the routing code is generic over the choice rather than
//! hardcoding one.

/// Maps a key to a bucket id in `[0, 2^bits)`.
///
/// Implementations must be cheap and branch-free; they run once per record
/// in the routing hot loop.
pub trait BucketHash: Copy + Send + Sync {
    fn bucket(&self, key: u64, bits: u32) -> usize;
}

/// Low-bit mask: `key & (2^bits - 1)`.
#[derive(Copy, Clone, Debug, Default)]
pub struct LowBits;

impl BucketHash for LowBits {
    #[inline(always)]
    fn bucket(&self, key: u64, bits: u32) -> usize {
        (key & ((1u64 << bits) - 1)) as usize
    }
}

/// Multiplicative hash: top `bits` bits of `key * FIBONACCI`.
#[derive(Copy, Clone, Debug, Default)]
pub struct Fibonacci;

impl Fibonacci {
    /// 2^64 / phi.
    const FIBONACCI: u64 = 11_400_714_819_323_198_485;
}

impl BucketHash for Fibonacci {
    #[inline(always)]
    fn bucket(&self, key: u64, bits: u32) -> usize {
        if bits == 0 {
            return 0;
        }
        (key.wrapping_mul(Self::FIBONACCI) >> (64 - bits)) as usize
    }
}
