//! Bucket-capacity planning.
//!
//! A plan decides, before any routing starts, how many buckets a run uses
//! and how many records each bucket can hold. Capacity is the expected mean
//! load `T / 2^b` scaled by an over-provisioning factor: the split of T
//! records across `2^b` uniform buckets is multinomial, and its relative
//! per-bucket variance grows as buckets shrink, so a factor that is safe at
//! b=8 under-provisions at b=18. The stepped policy raises the factor past
//! fixed thresholds of b for that reason.
//!
//! Planning is a pure function of its inputs and never touches the routing
//! code.

use crate::PartitionError;

/// Multiplier sizing bucket capacity above the expected mean load.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OverprovisionPolicy {
    /// Constant factor regardless of bucket count.
    Fixed(f64),
    /// Empirically calibrated schedule: 2x below b=14, 4x for b in [14, 17),
    /// 7x for b >= 17.
    Stepped,
}

impl OverprovisionPolicy {
    /// Factor applied to the mean per-bucket load for `bucket_bits`.
    pub fn factor(self, bucket_bits: u32) -> f64 {
        match self {
            Self::Fixed(f) => f,
            Self::Stepped => {
                if bucket_bits >= 17 {
                    7.0
                } else if bucket_bits >= 14 {
                    4.0
                } else {
                    2.0
                }
            }
        }
    }
}

/// Inputs to capacity planning.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlanConfig {
    /// Bucket-count exponent: the run uses `2^bucket_bits` buckets.
    pub bucket_bits: u32,
    /// Total records the run will route.
    pub total_records: usize,
    pub policy: OverprovisionPolicy,
    /// Capacity floor; a computed capacity below this is raised to it.
    pub min_capacity: usize,
    /// Bucket-count ceiling; `2^bucket_bits` past this is rejected.
    pub max_buckets: usize,
}

impl PlanConfig {
    /// Config with the calibrated defaults: stepped policy, floor 64,
    /// ceiling 2^18 buckets.
    pub fn new(bucket_bits: u32, total_records: usize) -> Self {
        Self {
            bucket_bits,
            total_records,
            policy: OverprovisionPolicy::Stepped,
            min_capacity: 64,
            max_buckets: 1 << 18,
        }
    }
}

/// The result of planning: how much storage a run gets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    pub bucket_bits: u32,
    /// `2^bucket_bits`.
    pub buckets: usize,
    /// Per-bucket record capacity.
    pub capacity: usize,
}

impl PartitionPlan {
    /// Compute bucket count and per-bucket capacity.
    ///
    /// Identical inputs always yield an identical plan. Fails before any
    /// allocation if the bucket count exceeds the ceiling or the capacity
    /// comes out degenerate even after the floor.
    pub fn compute(cfg: &PlanConfig) -> Result<Self, PartitionError> {
        if cfg.bucket_bits >= usize::BITS {
            return Err(PartitionError::Config(format!(
                "bucket_bits {} out of range",
                cfg.bucket_bits
            )));
        }
        let buckets = 1usize << cfg.bucket_bits;
        if buckets > cfg.max_buckets {
            return Err(PartitionError::Config(format!(
                "2^{} = {buckets} buckets exceeds ceiling {}",
                cfg.bucket_bits, cfg.max_buckets
            )));
        }

        let mean = cfg.total_records as f64 / buckets as f64;
        let scaled = (mean * cfg.policy.factor(cfg.bucket_bits)).ceil() as usize;
        let capacity = scaled.max(cfg.min_capacity);
        if capacity == 0 {
            return Err(PartitionError::Config(
                "computed bucket capacity is zero".to_string(),
            ));
        }

        Ok(Self {
            bucket_bits: cfg.bucket_bits,
            buckets,
            capacity,
        })
    }
}
