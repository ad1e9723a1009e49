//! Bucket storage.
//!
//! One contiguous slot region holds every bucket: bucket `k` owns slots
//! `[k*C, (k+1)*C)` for per-bucket capacity `C`. Buckets are allocated once
//! per run and released by drop on every exit path, including the fatal
//! overflow abort.
//!
//! Two arena flavors share the layout:
//!
//! - [`BucketArena`]: write cursors are atomics, each padded to its own
//!   cache line so concurrent fetch-adds on neighbouring buckets never
//!   false-share. Used by the shared-output strategy.
//! - [`LocalArena`]: plain cursors, single owner, no synchronization. Used
//!   per worker by the independent-output strategy.
//!
//! `prime_pages` writes one record per 4 KiB page before the timed region,
//! so physical page backing is established outside the measured hot loop.

use std::cell::UnsafeCell;
use std::mem::{MaybeUninit, size_of};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::plan::PartitionPlan;
use crate::{PartitionError, Record};

const PAGE_SIZE: usize = 4096;

/// Write cursor padded to a full cache line.
#[repr(align(64))]
struct PaddedCursor(AtomicU32);

/// Shared bucket set with atomic slot reservation.
pub struct BucketArena {
    slots: Box<[UnsafeCell<MaybeUninit<Record>>]>,
    cursors: Box<[PaddedCursor]>,
    bucket_bits: u32,
    buckets: usize,
    capacity: usize,
}

// SAFETY: concurrent access goes through `reserve`, which hands out each
// (bucket, slot) pair exactly once, and `write`, which only touches slots
// obtained from `reserve`.
unsafe impl Send for BucketArena {}
unsafe impl Sync for BucketArena {}

impl BucketArena {
    /// Allocate `2^b` buckets of the planned capacity.
    ///
    /// Allocation is fallible; on failure everything allocated so far is
    /// dropped before the error propagates.
    pub fn new(plan: &PartitionPlan) -> Result<Self, PartitionError> {
        let total = plan
            .buckets
            .checked_mul(plan.capacity)
            .ok_or_else(|| PartitionError::Config("bucket storage size overflows".to_string()))?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(total)?;
        slots.resize_with(total, || UnsafeCell::new(MaybeUninit::uninit()));

        let mut cursors = Vec::new();
        cursors.try_reserve_exact(plan.buckets)?;
        cursors.resize_with(plan.buckets, || PaddedCursor(AtomicU32::new(0)));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            cursors: cursors.into_boxed_slice(),
            bucket_bits: plan.bucket_bits,
            buckets: plan.buckets,
            capacity: plan.capacity,
        })
    }

    /// Touch one record per page so the OS maps physical memory now rather
    /// than mid-measurement.
    pub fn prime_pages(&mut self) {
        let step = (PAGE_SIZE / size_of::<Record>()).max(1);
        for i in (0..self.slots.len()).step_by(step) {
            self.slots[i].get_mut().write(Record::default());
        }
    }

    /// Rewind all cursors so the arena can be reused for another pass.
    /// Previously routed contents become unreachable.
    pub fn reset(&mut self) {
        for c in self.cursors.iter_mut() {
            *c.0.get_mut() = 0;
        }
    }

    pub fn bucket_bits(&self) -> u32 {
        self.bucket_bits
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserve the next slot in `bucket`.
    ///
    /// The fetch-and-increment is the sole linearization point: no two
    /// callers ever receive the same slot, and relaxed ordering suffices
    /// because nothing orders across buckets. A reservation past capacity is
    /// fatal under-provisioning and is reported, never written.
    #[inline(always)]
    pub fn reserve(&self, bucket: usize) -> Result<usize, PartitionError> {
        let slot = self.cursors[bucket].0.fetch_add(1, Ordering::Relaxed) as usize;
        if slot >= self.capacity {
            return Err(PartitionError::CapacityOverflow {
                bucket,
                slot,
                capacity: self.capacity,
            });
        }
        Ok(slot)
    }

    /// Write a record into a reserved slot.
    ///
    /// # Safety
    ///
    /// `slot` must have been returned by `reserve(bucket)` on this arena,
    /// and each (bucket, slot) pair must be written at most once.
    #[inline(always)]
    pub unsafe fn write(&self, bucket: usize, slot: usize, record: Record) {
        let idx = bucket * self.capacity + slot;
        unsafe {
            (*self.slots[idx].get()).write(record);
        }
    }

    /// Records routed into `bucket` so far.
    pub fn len(&self, bucket: usize) -> usize {
        (self.cursors[bucket].0.load(Ordering::Acquire) as usize).min(self.capacity)
    }

    pub fn is_empty(&self, bucket: usize) -> bool {
        self.len(bucket) == 0
    }

    /// Contents of `bucket`.
    ///
    /// Call only after the routing threads have been joined; the join is
    /// what makes the workers' writes visible here.
    pub fn bucket(&self, bucket: usize) -> &[Record] {
        let len = self.len(bucket);
        let base = bucket * self.capacity;
        // SAFETY: slots [base, base + len) were initialized through `write`
        // before the corresponding workers were joined.
        unsafe { std::slice::from_raw_parts(self.slots[base..].as_ptr() as *const Record, len) }
    }
}

/// Private bucket set owned by a single worker.
///
/// Cursors are plain integers; routing into a `LocalArena` involves no
/// atomics at all.
pub struct LocalArena {
    slots: Box<[MaybeUninit<Record>]>,
    cursors: Box<[u32]>,
    bucket_bits: u32,
    buckets: usize,
    capacity: usize,
}

impl LocalArena {
    pub fn new(plan: &PartitionPlan) -> Result<Self, PartitionError> {
        let total = plan
            .buckets
            .checked_mul(plan.capacity)
            .ok_or_else(|| PartitionError::Config("bucket storage size overflows".to_string()))?;

        let mut slots = Vec::new();
        slots.try_reserve_exact(total)?;
        slots.resize_with(total, MaybeUninit::uninit);

        let mut cursors = Vec::new();
        cursors.try_reserve_exact(plan.buckets)?;
        cursors.resize(plan.buckets, 0);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            cursors: cursors.into_boxed_slice(),
            bucket_bits: plan.bucket_bits,
            buckets: plan.buckets,
            capacity: plan.capacity,
        })
    }

    pub fn prime_pages(&mut self) {
        let step = (PAGE_SIZE / size_of::<Record>()).max(1);
        for i in (0..self.slots.len()).step_by(step) {
            self.slots[i].write(Record::default());
        }
    }

    pub fn bucket_bits(&self) -> u32 {
        self.bucket_bits
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record to `bucket`, preserving input order.
    #[inline(always)]
    pub fn push(&mut self, bucket: usize, record: Record) -> Result<(), PartitionError> {
        let slot = self.cursors[bucket] as usize;
        if slot >= self.capacity {
            return Err(PartitionError::CapacityOverflow {
                bucket,
                slot,
                capacity: self.capacity,
            });
        }
        self.slots[bucket * self.capacity + slot].write(record);
        self.cursors[bucket] = slot as u32 + 1;
        Ok(())
    }

    pub fn len(&self, bucket: usize) -> usize {
        self.cursors[bucket] as usize
    }

    pub fn is_empty(&self, bucket: usize) -> bool {
        self.len(bucket) == 0
    }

    /// Contents of `bucket`, in the order they were pushed.
    pub fn bucket(&self, bucket: usize) -> &[Record] {
        let len = self.len(bucket);
        let base = bucket * self.capacity;
        // SAFETY: `push` initialized exactly the first `len` slots of this
        // bucket's range.
        unsafe { std::slice::from_raw_parts(self.slots[base..].as_ptr() as *const Record, len) }
    }
}
