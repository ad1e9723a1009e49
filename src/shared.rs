//! Shared-output routing: one global bucket set, atomic slot reservation.
//!
//! Every worker routes its own contiguous range of the shared record slice
//! into the same [`BucketArena`]. A slot is claimed with a relaxed
//! fetch-and-increment on the target bucket's cursor; that increment is the
//! sole linearization point, so no two workers ever receive the same slot
//! and no lock or wait is involved. Records written concurrently into one
//! bucket land in no particular order.
//!
//! A reservation past capacity means the plan under-provisioned for the
//! observed key distribution. The detecting worker trips a shared poison
//! flag; every worker polls it periodically and bails, and the caller gets
//! the overflow error instead of a partially-consistent bucket set.

use std::time::Instant;

use crate::arena::BucketArena;
use crate::hash::BucketHash;
use crate::route::{POISON_CHECK_MASK, Poison, RangeSpan, RouteReport, StartGate, split_ranges, validate_run};
use crate::topo::pin_or_warn;
use crate::{PartitionError, Record};

/// Route `records` into `arena` with `workers` threads.
///
/// `cores`, when given, pins worker `i` to `cores[i]`; its length must
/// equal `workers`. Config errors are returned before any thread starts.
/// Thread spawn cost is excluded from the reported duration: workers spin
/// on a start gate and the clock starts when the gate opens.
pub fn route_shared<H: BucketHash>(
    records: &[Record],
    arena: &BucketArena,
    hash: H,
    workers: usize,
    cores: Option<&[usize]>,
) -> Result<RouteReport, PartitionError> {
    validate_run(workers, cores)?;
    let bits = arena.bucket_bits();
    let spans = split_ranges(records.len(), workers);
    let gate = StartGate::new();
    let poison = Poison::new();

    let (elapsed, fatal) = std::thread::scope(|s| {
        let handles: Vec<_> = spans
            .iter()
            .enumerate()
            .map(|(worker, &span)| {
                let gate = &gate;
                let poison = &poison;
                s.spawn(move || {
                    if let Some(cores) = cores {
                        pin_or_warn(worker, cores[worker]);
                    }
                    gate.wait();
                    route_span(records, span, arena, hash, bits, poison)
                })
            })
            .collect();

        gate.open();
        let started = Instant::now();

        let mut fatal = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    fatal.get_or_insert(e);
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        (started.elapsed(), fatal)
    });

    match fatal {
        Some(e) => Err(e),
        None => Ok(RouteReport {
            elapsed,
            records: records.len() as u64,
        }),
    }
}

fn route_span<H: BucketHash>(
    records: &[Record],
    span: RangeSpan,
    arena: &BucketArena,
    hash: H,
    bits: u32,
    poison: &Poison,
) -> Result<(), PartitionError> {
    for (i, record) in span.slice(records).iter().enumerate() {
        // Another worker hit fatal overflow; abandon this range. The
        // tripping worker owns the error report.
        if (i & POISON_CHECK_MASK) == 0 && poison.is_tripped() {
            return Ok(());
        }
        let bucket = hash.bucket(record.key, bits);
        match arena.reserve(bucket) {
            Ok(slot) => unsafe { arena.write(bucket, slot, *record) },
            Err(e) => {
                poison.trip();
                return Err(e);
            }
        }
    }
    Ok(())
}
