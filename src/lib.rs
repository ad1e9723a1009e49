//! Partition-phase throughput benchmarking primitives.
//!
//! Routes a stream of fixed-size key/payload records into hash-selected
//! buckets (the shuffle underlying parallel hash joins and aggregations)
//! under two concurrency disciplines:
//!
//! - [`shared`]: one global bucket set, slots reserved with a relaxed
//!   fetch-and-increment per bucket.
//! - [`indep`]: per-worker private bucket sets with plain cursors, reconciled
//!   afterwards by a [`indep::MergeView`].
//!
//! Capacity planning ([`plan`]), bucket storage ([`arena`]), bucket-id
//! extraction ([`hash`]) and worker-to-core placement ([`topo`]) are separate,
//! independently testable pieces. The routing entry points report elapsed
//! wall-clock time and record count; formatting throughput is the caller's
//! job.

pub mod arena;
pub mod hash;
pub mod indep;
pub mod plan;
pub mod route;
pub mod shared;
pub mod topo;

pub use arena::{BucketArena, LocalArena};
pub use hash::{BucketHash, Fibonacci, LowBits};
pub use indep::{CompactSet, MergeView, route_independent};
pub use plan::{OverprovisionPolicy, PartitionPlan, PlanConfig};
pub use route::{RangeSpan, RouteReport};
pub use shared::route_shared;

/// Fixed-size unit being partitioned: an 8-byte key and an 8-byte payload,
/// created once at generation and immutable afterwards.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Record {
    pub key: u64,
    pub payload: u64,
}

impl Record {
    #[inline(always)]
    pub fn new(key: u64, payload: u64) -> Self {
        Self { key, payload }
    }
}

/// Failure taxonomy for a partitioning run.
///
/// `Config` and `OutOfMemory` are raised synchronously during setup, before
/// any worker thread starts. `CapacityOverflow` is the one mid-run failure:
/// it aborts the entire run rather than risk a silent out-of-bounds write.
/// Placement failures are not errors: the worker runs unpinned and a
/// warning is logged.
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Invalid bucket count, degenerate capacity, or a core-id list that
    /// does not match the worker count.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Bucket storage allocation failed during setup. Everything allocated
    /// so far is released before this propagates.
    #[error("bucket storage allocation failed: {0}")]
    OutOfMemory(#[from] std::collections::TryReserveError),

    /// A reservation landed past the bucket's capacity: the plan
    /// under-provisioned for the observed key distribution. Fatal for the
    /// whole run; the core never resizes in place.
    #[error("bucket {bucket} overflowed: slot {slot} >= capacity {capacity}")]
    CapacityOverflow {
        bucket: usize,
        slot: usize,
        capacity: usize,
    },
}
