//! Time-windowed quantile state.
//!
//! A [`SlidingWindow`] keeps a ring of [`CkmsQuantiles`] instances and
//! rotates through them as wall-clock time passes, so that quantile queries
//! reflect recent observations instead of the full process lifetime.  There
//! is no background thread; rotation happens lazily on access.

use std::sync::Arc;
use std::time::Duration;

use quanta::{Clock, Instant};

use crate::ckms::{CkmsQuantiles, QuantileTarget};

/// A ring of quantile estimators rotated over a fixed time window.
///
/// Each bucket covers `max_age / age_buckets` of wall-clock time, and an
/// observation lands in exactly one bucket: the current one.  [`current`]
/// therefore reflects observations from the active bucket only — a bounded
/// memory tradeoff, since merging buckets on every query would require
/// retaining raw values.
///
/// The window is not internally synchronized.  The owning data point wraps it
/// in a mutex covering both [`observe`] and [`current`].
///
/// [`observe`]: SlidingWindow::observe
/// [`current`]: SlidingWindow::current
pub struct SlidingWindow {
    buckets: Vec<CkmsQuantiles>,
    current: usize,
    // Rotation deadline of the current bucket.
    deadline: Instant,
    bucket_duration: Duration,
    clock: Clock,
}

impl SlidingWindow {
    /// Creates a window of `age_buckets` estimators spanning `max_age`.
    pub fn new(
        targets: Arc<[QuantileTarget]>,
        max_age: Duration,
        age_buckets: u32,
        clock: Clock,
    ) -> SlidingWindow {
        debug_assert!(!max_age.is_zero());
        debug_assert!(age_buckets > 0);

        let bucket_duration = max_age / age_buckets;
        let buckets =
            (0..age_buckets).map(|_| CkmsQuantiles::new(targets.clone())).collect();
        let deadline = clock.now() + bucket_duration;

        SlidingWindow { buckets, current: 0, deadline, bucket_duration, clock }
    }

    /// Records a value into the current bucket.
    pub fn observe(&mut self, value: f64) {
        self.rotate();
        self.buckets[self.current].insert(value);
    }

    /// Returns the active estimator, rotating first if its deadline passed.
    pub fn current(&mut self) -> &mut CkmsQuantiles {
        self.rotate();
        &mut self.buckets[self.current]
    }

    fn rotate(&mut self) {
        let now = self.clock.now();
        if now < self.deadline {
            return;
        }

        // Advance at most one full revolution; each step clears the slot that
        // becomes current and pushes the deadline by one bucket duration.
        let mut advances = 0;
        while now >= self.deadline && advances < self.buckets.len() {
            self.current = (self.current + 1) % self.buckets.len();
            self.buckets[self.current].reset();
            self.deadline += self.bucket_duration;
            advances += 1;
        }

        // The gap exceeded the whole window: every bucket is stale, so start
        // over with the deadline anchored at the present.
        if now >= self.deadline {
            for bucket in &mut self.buckets {
                bucket.reset();
            }
            self.deadline = now + self.bucket_duration;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quanta::Clock;

    use super::SlidingWindow;
    use crate::ckms::QuantileTarget;

    const MAX_AGE: Duration = Duration::from_secs(300);

    fn window(clock: Clock) -> SlidingWindow {
        let targets: Arc<[QuantileTarget]> =
            vec![QuantileTarget::new(0.5, 0.01).unwrap()].into();
        SlidingWindow::new(targets, MAX_AGE, 5, clock)
    }

    #[test]
    fn fresh_window_is_empty() {
        let (clock, _mock) = Clock::mock();
        let mut window = window(clock);
        assert!(window.current().get(0.5).is_nan());
    }

    #[test]
    fn observations_land_in_current_bucket() {
        let (clock, _mock) = Clock::mock();
        let mut window = window(clock);
        for i in 1..=100 {
            window.observe(i as f64);
        }
        let median = window.current().get(0.5);
        assert!((49.0..=52.0).contains(&median), "median {median}");
    }

    #[test]
    fn observations_survive_within_bucket_duration() {
        let (clock, mock) = Clock::mock();
        let mut window = window(clock);
        window.observe(42.0);
        // One bucket covers 60s; 30s later the same bucket is still current.
        mock.increment(Duration::from_secs(30));
        assert_eq!(window.current().get(0.5), 42.0);
    }

    #[test]
    fn rotation_clears_expired_observations() {
        let (clock, mock) = Clock::mock();
        let mut window = window(clock);
        window.observe(42.0);
        mock.increment(MAX_AGE + Duration::from_secs(1));
        assert!(window.current().get(0.5).is_nan());
    }

    #[test]
    fn rotation_is_incremental_across_buckets() {
        let (clock, mock) = Clock::mock();
        let mut window = window(clock);

        window.observe(1.0);
        mock.increment(Duration::from_secs(70));
        // Rotated into the second bucket; the first still holds 1.0 but is no
        // longer current.
        assert!(window.current().get(0.5).is_nan());

        window.observe(2.0);
        assert_eq!(window.current().get(0.5), 2.0);
    }

    #[test]
    fn long_gap_reanchors_the_ring() {
        let (clock, mock) = Clock::mock();
        let mut window = window(clock);
        window.observe(42.0);

        // Several whole windows pass.
        mock.increment(MAX_AGE * 7);
        assert!(window.current().get(0.5).is_nan());

        // The re-anchored ring behaves like a fresh one.
        window.observe(9.0);
        assert_eq!(window.current().get(0.5), 9.0);
        mock.increment(Duration::from_secs(30));
        assert_eq!(window.current().get(0.5), 9.0);
    }
}
