//! Validated construction of summary metrics.

use std::sync::Arc;
use std::time::Duration;

use quanta::Clock;

use crate::ckms::QuantileTarget;
use crate::error::SummaryError;
use crate::exemplar::{ExemplarSampler, ExemplarSamplerFactory};
use crate::label::SharedString;
use crate::snapshot::MetricMetadata;
use crate::summary::Summary;

/// Windowing and exemplar configuration for summary metrics.
///
/// The process-wide defaults live in the [`Default`] impl; a collaborator
/// that loads configuration from files or the environment builds an explicit
/// value and hands it to [`SummaryBuilder::with_config`].
#[derive(Clone, Debug)]
pub struct SummaryConfig {
    /// How far back the quantile window reaches.  Default: 5 minutes.
    pub max_age: Duration,
    /// How many buckets the window rotates through.  Default: 5.
    pub age_buckets: u32,
    /// Whether data points invoke their exemplar sampler.  Default: true.
    pub exemplars_enabled: bool,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            max_age: Duration::from_secs(300),
            age_buckets: 5,
            exemplars_enabled: true,
        }
    }
}

/// Builder for [`Summary`] metrics.
///
/// ```
/// use windowed_summary::Summary;
///
/// # fn main() -> Result<(), windowed_summary::SummaryError> {
/// let summary = Summary::builder("request_duration_seconds")
///     .help("Duration of requests.")
///     .unit("seconds")
///     .label_names(["path"])
///     .quantile(0.5)?
///     .quantile_with_error(0.99, 0.001)?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SummaryBuilder {
    name: SharedString,
    help: Option<SharedString>,
    unit: Option<SharedString>,
    label_names: Vec<SharedString>,
    targets: Vec<QuantileTarget>,
    config: SummaryConfig,
    exemplar_factory: Option<ExemplarSamplerFactory>,
    clock: Clock,
}

impl SummaryBuilder {
    /// Creates a builder with the process-wide default configuration.
    pub fn new(name: impl Into<SharedString>) -> SummaryBuilder {
        SummaryBuilder::with_config(name, SummaryConfig::default())
    }

    /// Creates a builder from an explicit configuration value.
    pub fn with_config(
        name: impl Into<SharedString>,
        config: SummaryConfig,
    ) -> SummaryBuilder {
        SummaryBuilder {
            name: name.into(),
            help: None,
            unit: None,
            label_names: Vec::new(),
            targets: Vec::new(),
            config,
            exemplar_factory: None,
            clock: Clock::new(),
        }
    }

    /// Sets the metric's help text.
    pub fn help(mut self, help: impl Into<SharedString>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Sets the metric's unit.
    pub fn unit(mut self, unit: impl Into<SharedString>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the metric's label schema.  Order is preserved.
    pub fn label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SharedString>,
    {
        self.label_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a quantile target with a default allowed error, scaled to how
    /// close the target sits to the distribution's edge: 0.001 within the
    /// outer 1%, 0.005 within the outer 2%, 0.01 elsewhere.
    ///
    /// # Errors
    ///
    /// Fails if `quantile` is outside `0.0..=1.0`.
    pub fn quantile(self, quantile: f64) -> Result<Self, SummaryError> {
        self.quantile_with_error(quantile, default_error(quantile))
    }

    /// Adds a quantile target with an explicit allowed rank error.
    ///
    /// `(0.0, 0.0)` and `(1.0, 0.0)` request the exact minimum and maximum.
    ///
    /// # Errors
    ///
    /// Fails if either argument is outside `0.0..=1.0`.
    pub fn quantile_with_error(
        mut self,
        quantile: f64,
        error: f64,
    ) -> Result<Self, SummaryError> {
        self.targets.push(QuantileTarget::new(quantile, error)?);
        Ok(self)
    }

    /// Sets how far back the quantile window reaches.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.config.max_age = max_age;
        self
    }

    /// Sets how many buckets the quantile window rotates through.
    pub fn age_buckets(mut self, age_buckets: u32) -> Self {
        self.config.age_buckets = age_buckets;
        self
    }

    /// Enables or disables exemplar sampling.
    pub fn exemplars(mut self, enabled: bool) -> Self {
        self.config.exemplars_enabled = enabled;
        self
    }

    /// Supplies the exemplar sampling policy; `factory` is invoked once per
    /// data point.  Without a sampler, snapshots carry no exemplars.
    pub fn exemplar_sampler<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ExemplarSampler> + Send + Sync + 'static,
    {
        self.exemplar_factory = Some(Arc::new(factory));
        self
    }

    /// Overrides the clock the metric reads.  Tests pair this with
    /// [`quanta::Clock::mock`] to drive window rotation deterministically.
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the summary.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty, the window configuration is degenerate
    /// (zero max age or zero buckets), or the label schema uses the reserved
    /// name `quantile`.
    pub fn build(self) -> Result<Summary, SummaryError> {
        if self.name.is_empty() {
            return Err(SummaryError::MissingName);
        }
        if self.config.max_age.is_zero() {
            return Err(SummaryError::ZeroMaxAge);
        }
        if self.config.age_buckets == 0 {
            return Err(SummaryError::ZeroAgeBuckets);
        }
        if self.label_names.iter().any(|name| name == "quantile") {
            return Err(SummaryError::ReservedLabelName);
        }

        let metadata =
            MetricMetadata { name: self.name, help: self.help, unit: self.unit };
        let exemplar_factory =
            if self.config.exemplars_enabled { self.exemplar_factory } else { None };

        Ok(Summary::new(
            metadata,
            self.label_names,
            self.targets.into(),
            self.config.max_age,
            self.config.age_buckets,
            exemplar_factory,
            self.clock,
        ))
    }
}

// The default-error ladder: targets near the edges of the distribution get
// proportionally tighter rank errors, since an absolute error of 0.01 would
// swallow a p99 outright.
fn default_error(quantile: f64) -> f64 {
    if quantile <= 0.01 || quantile >= 0.99 {
        0.001
    } else if quantile <= 0.02 || quantile >= 0.98 {
        0.005
    } else {
        0.01
    }
}
