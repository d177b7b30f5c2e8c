//! Immutable snapshot values emitted by [`Summary::collect`](crate::Summary::collect).
//!
//! Snapshots are plain data: once built they are never mutated by the core,
//! and exposition formats are rendered from them by downstream collaborators.

use crate::exemplar::Exemplar;
use crate::label::{Label, SharedString};

/// Descriptive metadata for a metric.
///
/// Name, help, and unit are validated by the collaborator that created the
/// metric; the core carries them through to snapshots untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricMetadata {
    /// The metric name.
    pub name: SharedString,
    /// Optional help text.
    pub help: Option<SharedString>,
    /// Optional unit, e.g. `seconds`.
    pub unit: Option<SharedString>,
}

/// A single estimated quantile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantileValue {
    /// The φ-quantile this value estimates.
    pub quantile: f64,
    /// The estimated value, or `NaN` when nothing has been observed in the
    /// current window.
    pub value: f64,
}

/// The state of one data point at collection time.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryDataPointSnapshot {
    /// Total number of observations since the data point was created.
    pub count: u64,
    /// Sum of all observed values.  May be infinite or `NaN` if infinities
    /// were observed.
    pub sum: f64,
    /// Estimated quantiles, in the order the targets were configured.
    /// Empty when the summary has no quantile targets.
    pub quantiles: Vec<QuantileValue>,
    /// The label set identifying this data point.
    pub labels: Vec<Label>,
    /// Exemplars sampled since the data point was created.  May be empty.
    pub exemplars: Vec<Exemplar>,
    /// Wall-clock time the data point was created, in milliseconds since the
    /// Unix epoch.
    pub created_timestamp_ms: i64,
    /// Scrape time, in milliseconds since the Unix epoch.  Left `None` by the
    /// core; the scraping collaborator fills it in.
    pub scrape_timestamp_ms: Option<i64>,
}

/// A complete snapshot of a summary metric.
///
/// Data points are ordered by their label values ascending, so that repeated
/// scrapes of an unchanged metric render identically.
#[derive(Clone, Debug, PartialEq)]
pub struct SummarySnapshot {
    /// The metric's metadata.
    pub metadata: MetricMetadata,
    /// One entry per label-value combination observed so far.
    pub data: Vec<SummaryDataPointSnapshot>,
}
