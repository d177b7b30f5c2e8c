use thiserror::Error;

/// Errors that could occur while building or using a summary metric.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SummaryError {
    /// No metric name was given to the builder.
    #[error("metric name must not be empty")]
    MissingName,

    /// A quantile target was outside the unit interval.
    #[error("quantile {0} is invalid; must be within 0.0..=1.0")]
    QuantileOutOfRange(f64),

    /// An allowed quantile error was outside the unit interval.
    #[error("allowed quantile error {0} is invalid; must be within 0.0..=1.0")]
    ErrorOutOfRange(f64),

    /// The sliding window was configured with a zero maximum age.
    #[error("max age must be greater than zero")]
    ZeroMaxAge,

    /// The sliding window was configured with zero age buckets.
    #[error("age bucket count must be greater than zero")]
    ZeroAgeBuckets,

    /// `quantile` is the dimension under which summaries report their values,
    /// and so cannot also be used as a user-supplied label name.
    #[error("\"quantile\" is a reserved label name for summary metrics")]
    ReservedLabelName,

    /// The number of label values given did not match the label schema.
    #[error("metric expects {expected} label value(s), but {actual} were given")]
    LabelCountMismatch {
        /// Number of label names the metric was built with.
        expected: usize,
        /// Number of label values given at the call site.
        actual: usize,
    },

    /// The label-less observation path was used on a metric with labels.
    #[error("metric has a label schema; observations must go through `with_label_values`")]
    LabelValuesRequired,
}
