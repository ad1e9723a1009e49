//! Independent-output routing: per-worker private bucket sets, merged by a
//! logical view.
//!
//! Each worker owns a [`LocalArena`] sized for its own share of the stream
//! and routes with plain cursors, so the hot loop has no atomics and no
//! cross-thread write contention at all. The price is `2^b * workers`
//! buckets of storage instead of `2^b`.
//!
//! Downstream consumers see the result through a [`MergeView`]: global
//! bucket `k` is the concatenation, across workers in worker-id order, of
//! each worker's bucket `k`. By default that is a view with no data
//! movement; [`MergeView::compact`] is the eager variant that copies into
//! one contiguous region, preserving per-(worker, bucket) internal order.

use std::time::Instant;

use crate::arena::LocalArena;
use crate::hash::BucketHash;
use crate::plan::{PartitionPlan, PlanConfig};
use crate::route::{POISON_CHECK_MASK, Poison, RouteReport, StartGate, split_ranges, validate_run};
use crate::topo::pin_or_warn;
use crate::{PartitionError, Record};

/// Result of an independent-output run, indexed by (worker, bucket).
pub struct MergeView {
    locals: Vec<LocalArena>,
    buckets: usize,
}

impl MergeView {
    pub fn worker_count(&self) -> usize {
        self.locals.len()
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    /// Worker `w`'s private slice of bucket `k`, in its input order.
    pub fn worker_bucket(&self, worker: usize, bucket: usize) -> &[Record] {
        self.locals[worker].bucket(bucket)
    }

    /// Global bucket `k` as per-worker slices in worker-id order.
    pub fn bucket_parts(&self, bucket: usize) -> impl Iterator<Item = &[Record]> {
        self.locals.iter().map(move |l| l.bucket(bucket))
    }

    /// All records of global bucket `k`, walking the parts in order.
    pub fn bucket_records(&self, bucket: usize) -> impl Iterator<Item = &Record> {
        self.bucket_parts(bucket).flatten()
    }

    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.locals.iter().map(|l| l.len(bucket)).sum()
    }

    pub fn total_records(&self) -> u64 {
        (0..self.buckets).map(|b| self.bucket_len(b) as u64).sum()
    }

    /// Eager compaction: prefix-sum the per-(worker, bucket) lengths, then
    /// copy every part into one contiguous region. Per-part order is
    /// preserved exactly.
    pub fn compact(&self) -> CompactSet {
        let mut offsets = Vec::with_capacity(self.buckets + 1);
        offsets.push(0);
        let mut total = 0;
        for b in 0..self.buckets {
            total += self.bucket_len(b);
            offsets.push(total);
        }

        let mut data = Vec::with_capacity(total);
        for b in 0..self.buckets {
            for part in self.bucket_parts(b) {
                data.extend_from_slice(part);
            }
        }

        CompactSet { offsets, data }
    }
}

/// Contiguous, bucket-ordered copy of a [`MergeView`].
pub struct CompactSet {
    offsets: Vec<usize>,
    data: Vec<Record>,
}

impl CompactSet {
    pub fn buckets(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn bucket(&self, bucket: usize) -> &[Record] {
        &self.data[self.offsets[bucket]..self.offsets[bucket + 1]]
    }
}

/// Route `records` with `workers` threads, each into its own private bucket
/// set planned from that worker's share of the stream.
///
/// `cfg` supplies bucket_bits and the capacity policy; `cfg.total_records`
/// is ignored in favor of each worker's actual range length. All arenas are
/// allocated and page-primed before any worker starts, so the reported
/// duration covers routing only.
pub fn route_independent<H: BucketHash>(
    records: &[Record],
    cfg: &PlanConfig,
    hash: H,
    workers: usize,
    cores: Option<&[usize]>,
) -> Result<(MergeView, RouteReport), PartitionError> {
    validate_run(workers, cores)?;
    let spans = split_ranges(records.len(), workers);

    let mut arenas = Vec::with_capacity(workers);
    for span in &spans {
        let plan = PartitionPlan::compute(&PlanConfig {
            total_records: span.len,
            ..*cfg
        })?;
        let mut arena = LocalArena::new(&plan)?;
        arena.prime_pages();
        arenas.push(arena);
    }

    let bits = cfg.bucket_bits;
    let buckets = 1usize << bits;
    let gate = StartGate::new();
    let poison = Poison::new();

    let (elapsed, joined) = std::thread::scope(|s| {
        let handles: Vec<_> = arenas
            .into_iter()
            .zip(spans.iter())
            .enumerate()
            .map(|(worker, (mut arena, &span))| {
                let gate = &gate;
                let poison = &poison;
                s.spawn(move || {
                    if let Some(cores) = cores {
                        pin_or_warn(worker, cores[worker]);
                    }
                    gate.wait();
                    for (i, record) in span.slice(records).iter().enumerate() {
                        if (i & POISON_CHECK_MASK) == 0 && poison.is_tripped() {
                            return Ok(arena);
                        }
                        let bucket = hash.bucket(record.key, bits);
                        if let Err(e) = arena.push(bucket, *record) {
                            poison.trip();
                            return Err(e);
                        }
                    }
                    Ok(arena)
                })
            })
            .collect();

        gate.open();
        let started = Instant::now();

        let mut locals = Vec::with_capacity(workers);
        let mut fatal = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(arena)) => locals.push(arena),
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        (started.elapsed(), fatal.map_or(Ok(locals), Err))
    });

    let locals = joined?;
    Ok((
        MergeView { locals, buckets },
        RouteReport {
            elapsed,
            records: records.len() as u64,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::BucketArena;
    use crate::hash::{Fibonacci, LowBits};
    use crate::plan::OverprovisionPolicy;
    use crate::shared::route_shared;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn uniform_records(count: usize, seed: u64) -> Vec<Record> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|i| Record::new(rng.random::<u64>(), i as u64))
            .collect()
    }

    #[test]
    fn matches_shared_strategy_per_bucket() {
        let total = 1 << 16;
        let records = uniform_records(total, 42);
        let cfg = PlanConfig::new(6, total);

        let plan = PartitionPlan::compute(&cfg).unwrap();
        let shared_arena = BucketArena::new(&plan).unwrap();
        route_shared(&records, &shared_arena, Fibonacci, 4, None).unwrap();

        let (view, report) = route_independent(&records, &cfg, Fibonacci, 8, None).unwrap();
        assert_eq!(report.records, total as u64);
        assert_eq!(view.total_records(), total as u64);

        for b in 0..view.buckets() {
            let mut ours: Vec<u64> = view.bucket_records(b).map(|r| r.payload).collect();
            let mut theirs: Vec<u64> = shared_arena.bucket(b).iter().map(|r| r.payload).collect();
            ours.sort_unstable();
            theirs.sort_unstable();
            assert_eq!(ours, theirs, "bucket {b}");
        }
    }

    #[test]
    fn per_worker_bucket_preserves_input_order() {
        // Payloads are sequential ids, so within any (worker, bucket) pair
        // they must come out strictly increasing.
        let total = 1 << 14;
        let records = uniform_records(total, 3);
        let cfg = PlanConfig::new(5, total);
        let (view, _) = route_independent(&records, &cfg, LowBits, 4, None).unwrap();

        for w in 0..view.worker_count() {
            for b in 0..view.buckets() {
                let part = view.worker_bucket(w, b);
                for pair in part.windows(2) {
                    assert!(pair[0].payload < pair[1].payload);
                }
            }
        }
    }

    #[test]
    fn view_concatenates_in_worker_id_order() {
        let total = 1 << 12;
        let records = uniform_records(total, 9);
        let cfg = PlanConfig::new(4, total);
        let (view, _) = route_independent(&records, &cfg, LowBits, 4, None).unwrap();

        for b in 0..view.buckets() {
            let flat: Vec<Record> = view.bucket_records(b).copied().collect();
            let mut expected = Vec::new();
            for w in 0..view.worker_count() {
                expected.extend_from_slice(view.worker_bucket(w, b));
            }
            assert_eq!(flat, expected);
        }
    }

    #[test]
    fn compact_equals_logical_view() {
        let total = 1 << 14;
        let records = uniform_records(total, 11);
        let cfg = PlanConfig::new(5, total);
        let (view, _) = route_independent(&records, &cfg, Fibonacci, 3, None).unwrap();

        let compact = view.compact();
        assert_eq!(compact.buckets(), view.buckets());
        for b in 0..view.buckets() {
            let flat: Vec<Record> = view.bucket_records(b).copied().collect();
            assert_eq!(compact.bucket(b), flat.as_slice());
        }
    }

    #[test]
    fn degenerate_skew_overflows() {
        let total = 4096;
        let records: Vec<Record> = (0..total).map(|i| Record::new(3, i as u64)).collect();
        let cfg = PlanConfig {
            bucket_bits: 4,
            total_records: total,
            policy: OverprovisionPolicy::Fixed(1.0),
            min_capacity: 1,
            max_buckets: 1 << 18,
        };
        assert!(matches!(
            route_independent(&records, &cfg, LowBits, 4, None),
            Err(PartitionError::CapacityOverflow { bucket: 3, .. })
        ));
    }

    #[test]
    fn bucket_ceiling_rejected_before_start() {
        let records = uniform_records(128, 1);
        let mut cfg = PlanConfig::new(10, 128);
        cfg.max_buckets = 1 << 8;
        assert!(matches!(
            route_independent(&records, &cfg, LowBits, 2, None),
            Err(PartitionError::Config(_))
        ));
    }

    #[test]
    fn empty_stream() {
        let cfg = PlanConfig::new(4, 0);
        let (view, report) = route_independent(&[], &cfg, LowBits, 2, None).unwrap();
        assert_eq!(report.records, 0);
        assert_eq!(view.total_records(), 0);
    }
}
