//! Per-key operation outcomes and the low-bandwidth failure aggregator.

use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering::Relaxed;

/// Outcome of inserting or find-or-putting one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Outcome {
    /// The key was already present in the probed bucket(s).
    Found = 0,
    /// The key was inserted. The two-pass find-or-put also uses this value
    /// as its internal "nothing decided yet" scratch state between passes.
    Put = 1,
    /// The table rejected the key: the eviction chain hit its bound or
    /// every candidate bucket was full. Soft failure; earlier insertions
    /// remain valid.
    Full = 2,
}

/// Process-wide "a FULL was observed" flag.
///
/// Written relaxed by every bulk insertion that produces [`Outcome::Full`],
/// on any table. The flag has a strict single-use lifecycle: reset it, run
/// one bulk operation, read it, discard the reading. It is shared by all
/// tables in the process, so concurrent independent operations MUST either
/// serialize around it or ignore it and inspect their own result buffers.
static FULL_OBSERVED: AtomicBool = AtomicBool::new(false);

/// Clears the process-wide failure flag. Call before the one bulk
/// operation whose failures you want to aggregate.
pub fn reset_full_observed() {
    FULL_OBSERVED.store(false, Relaxed);
}

/// Whether any bulk insertion since the last reset produced
/// [`Outcome::Full`]. See the lifecycle caveat on [`reset_full_observed`].
pub fn full_observed() -> bool {
    FULL_OBSERVED.load(Relaxed)
}

/// Records an outcome into the aggregator. Any-writer, relaxed.
#[inline]
pub(crate) fn note(outcome: Outcome) -> Outcome {
    if outcome == Outcome::Full {
        FULL_OBSERVED.store(true, Relaxed);
    }
    outcome
}
