//! Worker orchestration pieces shared by both routing strategies: range
//! assignment over the record stream, the start gate that keeps thread
//! creation out of the timed region, the poison flag that turns one
//! worker's fatal overflow into a whole-run abort, and the run report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{PartitionError, Record};

/// How often the routing hot loop checks the poison flag, in records.
/// A power of two so the check compiles to a mask.
pub(crate) const POISON_CHECK_MASK: usize = 4096 - 1;

/// Contiguous index range over the record stream, passed to exactly one
/// worker by value. The union of a run's spans covers the stream exactly
/// once, with no gap and no overlap.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RangeSpan {
    pub start: usize,
    pub len: usize,
}

impl RangeSpan {
    #[inline(always)]
    pub fn slice<'a>(&self, records: &'a [Record]) -> &'a [Record] {
        &records[self.start..self.start + self.len]
    }
}

/// Split `total` records into one span per worker. Every worker gets
/// `total / workers` records; the last worker also takes the remainder.
pub fn split_ranges(total: usize, workers: usize) -> Vec<RangeSpan> {
    debug_assert!(workers > 0);
    let chunk = total / workers;
    (0..workers)
        .map(|w| {
            let start = w * chunk;
            let len = if w == workers - 1 {
                total - start
            } else {
                chunk
            };
            RangeSpan { start, len }
        })
        .collect()
}

/// One-shot gate every worker spins on before entering its routing loop.
///
/// The Release store in `open` paired with the Acquire loads in `wait` is
/// the single memory-visible release point for the run; everything the
/// orchestrator wrote before opening is visible to every worker after its
/// spin ends.
pub struct StartGate {
    open: AtomicBool,
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
        }
    }

    /// Busy-wait until the gate opens. Workers never suspend here; the
    /// routing phase has no scheduling points by design.
    #[inline]
    pub fn wait(&self) {
        while !self.open.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    #[inline]
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared abort flag. The worker that detects a fatal overflow trips it;
/// every other worker polls it periodically and bails out, so the run
/// never reports a partially-consistent result set.
pub(crate) struct Poison(AtomicBool);

impl Poison {
    pub(crate) fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    pub(crate) fn trip(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What the core reports back: wall-clock duration of the routing phase and
/// the number of records routed. Throughput math and printing belong to the
/// caller.
#[derive(Copy, Clone, Debug)]
pub struct RouteReport {
    pub elapsed: Duration,
    pub records: u64,
}

/// Orchestrator-contract checks, run before any thread starts.
pub(crate) fn validate_run(
    workers: usize,
    cores: Option<&[usize]>,
) -> Result<(), PartitionError> {
    if workers == 0 {
        return Err(PartitionError::Config("worker_count must be >= 1".to_string()));
    }
    if let Some(cores) = cores {
        if cores.len() != workers {
            return Err(PartitionError::Config(format!(
                "core-id list has {} entries for {} workers",
                cores.len(),
                workers
            )));
        }
    }
    Ok(())
}
