//! Streaming φ-quantile estimation with bounded rank error.
//!
//! This is the Cormode/Korn/Muthukrishnan/Srivastava ("targeted quantiles")
//! summary: a compressed list of samples over an unbounded stream, sized
//! O((1/ε)·log(εn)) in expectation, that can answer each configured
//! φ-quantile to within ε of its true rank.

use std::mem;
use std::sync::Arc;

use crate::error::SummaryError;

/// How many observations are batched before being merged into the sample
/// list.  Draining is O(samples + buffer), so larger buffers amortize better
/// at the cost of staler intermediate state.
const INSERT_BUFFER_CAPACITY: usize = 500;

/// A φ-quantile to track, with its allowed rank error.
///
/// The returned estimate for `(φ, ε)` is guaranteed to be some observed value
/// whose rank is within `ε·n` of `⌈φ·n⌉`.  The special targets `(0.0, 0.0)`
/// and `(1.0, 0.0)` request the exact minimum and maximum.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantileTarget {
    quantile: f64,
    error: f64,

    // Invariant-function coefficients, precomputed since they're evaluated on
    // every drain and compression pass.
    u: f64,
    v: f64,
}

impl QuantileTarget {
    /// Creates a new `QuantileTarget`.
    ///
    /// Both the quantile and the allowed error must lie within `0.0..=1.0`.
    pub fn new(quantile: f64, error: f64) -> Result<QuantileTarget, SummaryError> {
        if !(0.0..=1.0).contains(&quantile) {
            return Err(SummaryError::QuantileOutOfRange(quantile));
        }
        if !(0.0..=1.0).contains(&error) {
            return Err(SummaryError::ErrorOutOfRange(error));
        }

        let (u, v) = if quantile == 0.0 || quantile == 1.0 {
            // Endpoints are answered exactly and don't constrain compression.
            (0.0, 0.0)
        } else {
            (2.0 * error / (1.0 - quantile), 2.0 * error / quantile)
        };

        Ok(QuantileTarget { quantile, error, u, v })
    }

    /// The φ-quantile this target tracks.
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    /// The allowed rank error for this target.
    pub fn error(&self) -> f64 {
        self.error
    }

    fn is_endpoint(&self) -> bool {
        self.quantile == 0.0 || self.quantile == 1.0
    }
}

// One retained sample: `g` is the rank gap to the previous retained sample,
// `delta` the rank slack this sample was inserted with.
#[derive(Clone, Copy, Debug)]
struct Sample {
    value: f64,
    g: u64,
    delta: u64,
}

/// A CKMS quantile estimator for a fixed set of targets.
///
/// `CkmsQuantiles` is single-writer: callers serialize `insert` and `get`
/// externally (the summary data point does so under its window mutex).
pub struct CkmsQuantiles {
    targets: Arc<[QuantileTarget]>,
    samples: Vec<Sample>,
    buffer: Vec<f64>,
    // Observations merged into `samples` so far.  Buffered values don't count
    // until they're drained.
    inserted: u64,
    // A φ=0.0 target pins the minimum: the first sample is then exempt from
    // compression.  The maximum needs no pin, merging only ever removes the
    // left sample of a pair.
    preserve_min: bool,
}

impl CkmsQuantiles {
    /// Creates an estimator for the given targets.
    ///
    /// An empty target set is allowed; `get` then always returns `NaN`.
    pub fn new(targets: Arc<[QuantileTarget]>) -> CkmsQuantiles {
        let preserve_min = targets.iter().any(|t| t.quantile == 0.0);

        CkmsQuantiles {
            targets,
            samples: Vec::new(),
            buffer: Vec::with_capacity(INSERT_BUFFER_CAPACITY),
            inserted: 0,
            preserve_min,
        }
    }

    /// Adds a value from the stream.  `NaN` values are ignored.
    pub fn insert(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }

        self.buffer.push(value);
        if self.buffer.len() >= INSERT_BUFFER_CAPACITY {
            self.drain_buffer();
        }
    }

    /// Returns the estimate for `quantile`, or `NaN` if nothing has been
    /// observed yet (or no targets were configured).
    ///
    /// `quantile` should be one of the configured targets; other values are
    /// answered on a best-effort basis with no error bound of their own.
    pub fn get(&mut self, quantile: f64) -> f64 {
        self.drain_buffer();

        if self.targets.is_empty() || self.samples.is_empty() {
            return f64::NAN;
        }
        if quantile <= 0.0 {
            return self.samples[0].value;
        }
        if quantile >= 1.0 {
            return self.samples[self.samples.len() - 1].value;
        }

        let n = self.inserted as f64;
        let desired = (quantile * n).ceil() as u64;
        let border = desired as f64 + self.invariant(desired) / 2.0;

        let mut rank = 0u64;
        for pair in self.samples.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            rank += prev.g;
            if rank as f64 + cur.g as f64 + cur.delta as f64 > border {
                return prev.value;
            }
        }
        self.samples[self.samples.len() - 1].value
    }

    /// Total number of values accepted, including ones still buffered.
    pub fn count(&self) -> u64 {
        self.inserted + self.buffer.len() as u64
    }

    /// Clears all state, as if freshly constructed.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.buffer.clear();
        self.inserted = 0;
    }

    // The invariant function f(r): the largest width `g + delta` a sample
    // covering rank `r` may have without violating any target's error bound.
    fn invariant(&self, rank: u64) -> f64 {
        let n = self.inserted as f64;
        let r = rank as f64;

        let mut min = f64::MAX;
        for target in self.targets.iter() {
            if target.is_endpoint() {
                continue;
            }
            let f = if r >= (target.quantile * n).floor() {
                target.v * r
            } else {
                target.u * (n - r)
            };
            if f < min {
                min = f;
            }
        }
        min
    }

    // Sorts the pending buffer and merge-scans it into the sample list, then
    // compresses.  O(samples + buffer).
    fn drain_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let mut pending = mem::take(&mut self.buffer);
        pending.sort_unstable_by(f64::total_cmp);

        let existing = mem::take(&mut self.samples);
        let mut merged = Vec::with_capacity(existing.len() + pending.len());
        let mut existing = existing.into_iter().peekable();
        let mut rank = 0u64;

        for &value in pending.iter() {
            while let Some(sample) = existing.peek() {
                if sample.value > value {
                    break;
                }
                rank += sample.g;
                merged.push(*sample);
                existing.next();
            }

            // Values entering at either end of the list carry no slack; they
            // are, for now, an exact minimum or maximum.
            let delta = if merged.is_empty() || existing.peek().is_none() {
                0
            } else {
                (self.invariant(rank) - 1.0).floor().max(0.0) as u64
            };
            merged.push(Sample { value, g: 1, delta });
            self.inserted += 1;
        }
        merged.extend(existing);

        pending.clear();
        self.buffer = pending;
        self.samples = merged;

        self.compress();
    }

    // One left-to-right pass, merging each sample into its right neighbor
    // whenever the combined width still fits under the invariant function.
    fn compress(&mut self) {
        if self.samples.len() < 3 {
            return;
        }

        let samples = mem::take(&mut self.samples);
        let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
        let protected = usize::from(self.preserve_min);
        let mut rank = 0u64;

        for cur in samples {
            let merge = match out.last() {
                Some(prev) if out.len() > protected => {
                    let width = prev.g as f64 + cur.g as f64 + cur.delta as f64;
                    width <= self.invariant(rank + cur.g)
                }
                _ => false,
            };
            rank += cur.g;

            if merge {
                if let Some(prev) = out.pop() {
                    out.push(Sample { value: cur.value, g: prev.g + cur.g, delta: cur.delta });
                }
            } else {
                out.push(cur);
            }
        }

        self.samples = out;
    }

    #[cfg(test)]
    fn samples(&self) -> &[Sample] {
        &self.samples
    }
}
