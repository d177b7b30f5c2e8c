//! A time-windowed, Prometheus-style summary metric core.
//!
//! A summary tracks a running count and sum of observed values, plus a set of
//! configurable φ-quantiles — the value below which a fraction φ of recent
//! observations fall.  Quantiles are estimated with the
//! Cormode/Korn/Muthukrishnan/Srivastava streaming algorithm, which keeps a
//! compressed sample list in sublinear space while guaranteeing that every
//! answer is within a configurable error of the true *rank* (not the value).
//!
//! # Overview
//!
//! Each distinct label-value combination of a [`Summary`] gets its own
//! [`SummaryDataPoint`], created lazily on first use and kept for the life of
//! the metric.  Observing is cheap and never blocks on a concurrent scrape:
//! count and sum are atomics, the quantile window hides behind a short mutex,
//! and observations arriving while a snapshot is being assembled are diverted
//! into a lock-free queue and replayed afterwards, so each one lands in
//! exactly one snapshot.
//!
//! Quantiles are windowed: a ring of estimators rotates over
//! `max_age` seconds (default 5 minutes, in 5 buckets), so a latency spike
//! from an hour ago doesn't haunt the p99 forever.  Rotation happens lazily
//! on access; there are no background threads.
//!
//! [`Summary::collect`] produces an immutable [`SummarySnapshot`] — counts,
//! sums, quantile estimates, labels, exemplars, and creation timestamps — for
//! an exposition layer to render.  This crate deliberately stops there: no
//! text formats, no HTTP, no registry.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use windowed_summary::Summary;
//!
//! # fn main() -> Result<(), windowed_summary::SummaryError> {
//! let summary = Summary::builder("request_duration_seconds")
//!     .help("Duration of HTTP requests.")
//!     .unit("seconds")
//!     .label_names(["path"])
//!     .quantile(0.5)?
//!     .quantile_with_error(0.95, 0.001)?
//!     .max_age(Duration::from_secs(600))
//!     .build()?;
//!
//! let point = summary.with_label_values(&["/api"])?;
//! point.observe(0.212);
//! point.observe(0.667);
//!
//! let snapshot = summary.collect();
//! assert_eq!(snapshot.data[0].count, 2);
//! # Ok(())
//! # }
//! ```
//!
//! Metrics without labels skip `with_label_values` and observe directly via
//! [`Summary::observe`].  The exact minimum and maximum can be tracked with
//! the special targets `(0.0, 0.0)` and `(1.0, 0.0)`.

mod buffer;
mod builder;
mod ckms;
mod error;
mod exemplar;
mod label;
mod snapshot;
mod spill;
mod summary;
mod window;

pub use self::builder::{SummaryBuilder, SummaryConfig};
pub use self::ckms::{CkmsQuantiles, QuantileTarget};
pub use self::error::SummaryError;
pub use self::exemplar::{Exemplar, ExemplarSampler, ExemplarSamplerFactory};
pub use self::label::{Label, SharedString};
pub use self::snapshot::{
    MetricMetadata, QuantileValue, SummaryDataPointSnapshot, SummarySnapshot,
};
pub use self::summary::{MetricCore, Summary, SummaryDataPoint, Timer};
pub use self::window::SlidingWindow;
