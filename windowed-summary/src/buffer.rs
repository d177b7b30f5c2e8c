//! Snapshot coordination between observers and collectors.
//!
//! Collecting a summary data point has to read count, sum, and quantile state
//! as one consistent unit, without making observers wait out the (relatively
//! slow) quantile queries.  The [`ObservationBuffer`] arbitrates this with
//! two phases: while OPEN, observers update the live state inline; while
//! COLLECTING, they divert their values into a spill queue that is replayed
//! once the snapshot is built.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;

use crate::spill::SpillQueue;

// High bit of the start counter doubles as the phase flag.  Adding it flips
// the phase to COLLECTING; adding it again wraps around and clears it,
// leaving the low bits (the actual start count) untouched either way.
const COLLECTING: u64 = 1 << 63;

/// The per-data-point buffer arbitrating observers and collectors.
///
/// `started` counts observation starts.  The data point counts completions
/// separately (its `count`, incremented last in the observe path), and the
/// collect protocol uses the difference to know when every in-flight inline
/// observer has published.
pub(crate) struct ObservationBuffer {
    started: AtomicU64,
    pending: SpillQueue,
    // At most one collection per data point runs at a time.
    collect_lock: Mutex<()>,
}

impl ObservationBuffer {
    pub(crate) fn new() -> ObservationBuffer {
        ObservationBuffer {
            started: AtomicU64::new(0),
            pending: SpillQueue::new(),
            collect_lock: Mutex::new(()),
        }
    }

    /// Registers an observation start.
    ///
    /// Returns `false` while OPEN: the caller performs the update inline.
    /// Returns `true` while COLLECTING: the value was queued and will be
    /// replayed after the snapshot in flight completes.
    pub(crate) fn append(&self, value: f64) -> bool {
        let started = self.started.fetch_add(1, Ordering::AcqRel);
        if started & COLLECTING == 0 {
            false
        } else {
            self.pending.push(value);
            true
        }
    }

    /// Runs `snapshot` at a point where the live state is consistent, then
    /// replays diverted values through `replay` (the inline observe path).
    ///
    /// `completed` receives the number of observation starts captured at the
    /// phase switch and must report whether the data point's completion
    /// counter has caught up to it.  Both waits below are short: an inline
    /// observer finishes in bounded time, as does a diverted append.
    pub(crate) fn run<T>(
        &self,
        completed: impl Fn(u64) -> bool,
        snapshot: impl FnOnce() -> T,
        mut replay: impl FnMut(f64),
    ) -> T {
        let guard = self.collect_lock.lock();

        // Enter COLLECTING, capturing how many observers went inline.
        let inline = self.started.fetch_add(COLLECTING, Ordering::AcqRel) & !COLLECTING;
        while !completed(inline) {
            thread::yield_now();
        }

        let result = snapshot();

        // Leave COLLECTING.  Every start between the two phase switches was
        // diverted, so the difference tells us how many queued values to wait
        // for before draining.
        let total = self.started.fetch_add(COLLECTING, Ordering::AcqRel) & !COLLECTING;
        let diverted = (total - inline) as usize;
        while self.pending.len() < diverted {
            thread::yield_now();
        }

        let values = self.pending.drain();
        drop(guard);

        for value in values {
            replay(value);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crossbeam_utils::thread::scope;

    use super::ObservationBuffer;

    #[test]
    fn append_goes_inline_while_open() {
        let buffer = ObservationBuffer::new();
        assert!(!buffer.append(1.0));
        assert!(!buffer.append(2.0));
    }

    #[test]
    fn run_waits_for_inline_completions() {
        let buffer = ObservationBuffer::new();
        let count = AtomicU64::new(0);

        // Two inline observations, both completed.
        assert!(!buffer.append(1.0));
        count.fetch_add(1, Ordering::Release);
        assert!(!buffer.append(2.0));
        count.fetch_add(1, Ordering::Release);

        let seen = buffer.run(
            |expected| count.load(Ordering::Acquire) == expected,
            || count.load(Ordering::Acquire),
            |_| {},
        );
        assert_eq!(seen, 2);
    }

    #[test]
    fn appends_during_collection_are_replayed() {
        let buffer = ObservationBuffer::new();
        let count = AtomicU64::new(0);

        let replayed = scope(|s| {
            let observer = s.spawn(|_| {
                // Runs concurrently with the collection below; every value
                // ends up either inline or replayed.
                for i in 0..1000 {
                    if !buffer.append(i as f64) {
                        count.fetch_add(1, Ordering::Release);
                    }
                }
            });

            let mut replayed = Vec::new();
            buffer.run(
                |expected| count.load(Ordering::Acquire) == expected,
                || (),
                |value| {
                    replayed.push(value);
                    count.fetch_add(1, Ordering::Release);
                },
            );

            observer.join().unwrap();
            replayed
        })
        .unwrap();

        // Whatever was diverted came back out exactly once.
        let inline = count.load(Ordering::Acquire) as usize - replayed.len();
        assert_eq!(inline + replayed.len(), 1000);
    }

    #[test]
    fn consecutive_runs_reopen_the_buffer() {
        let buffer = ObservationBuffer::new();
        let count = AtomicU64::new(0);

        for _ in 0..3 {
            buffer.run(
                |expected| count.load(Ordering::Acquire) == expected,
                || (),
                |_| {},
            );
            // Back in OPEN: appends go inline again.
            assert!(!buffer.append(1.0));
            count.fetch_add(1, Ordering::Release);
        }
    }
}
