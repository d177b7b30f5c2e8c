use std::sync::Arc;

use crate::label::Label;

/// An auxiliary sample attached to a metric observation.
///
/// Exemplars carry the identifiers (typically a trace and span ID) of a
/// single concrete observation, so that a metrics backend can link an
/// aggregate back to an example event that contributed to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Identifying labels, e.g. `trace_id`/`span_id`.
    pub labels: Vec<Label>,
    /// The observed value the exemplar was taken from.
    pub value: f64,
    /// When the observation happened, in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

/// A sampling policy for exemplars.
///
/// The summary core invokes the sampler on every observation and includes
/// whatever `collect` returns in the emitted snapshot.  Which observations
/// are kept, and for how long, is entirely up to the implementation; samplers
/// encapsulate their own thread-safety.
pub trait ExemplarSampler: Send + Sync {
    /// Offers an observed value to the sampler.
    fn observe(&self, value: f64);

    /// Offers an observed value along with caller-provided exemplar labels.
    fn observe_with_labels(&self, value: f64, labels: &[Label]);

    /// Returns the exemplars to embed in the next snapshot.
    fn collect(&self) -> Vec<Exemplar>;
}

/// Creates a fresh sampler for each new data point of a metric.
pub type ExemplarSamplerFactory = Arc<dyn Fn() -> Box<dyn ExemplarSampler> + Send + Sync>;
