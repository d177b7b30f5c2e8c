//! The summary metric itself: a parent holding configuration and a map of
//! label-value tuples to data points, each data point aggregating count, sum,
//! and windowed quantile state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::buffer::ObservationBuffer;
use crate::builder::SummaryBuilder;
use crate::ckms::QuantileTarget;
use crate::error::SummaryError;
use crate::exemplar::{ExemplarSampler, ExemplarSamplerFactory};
use crate::label::{Label, SharedString};
use crate::snapshot::{
    MetricMetadata, QuantileValue, SummaryDataPointSnapshot, SummarySnapshot,
};
use crate::window::SlidingWindow;

/// The common surface of a stateful metric: identity plus collection.
///
/// Every metric family implements this against its own snapshot type; scrape
/// pipelines hold metrics behind it without caring which family they are.
pub trait MetricCore {
    /// The snapshot type this metric emits.
    type Snapshot;

    /// The metric's metadata.
    fn metadata(&self) -> &MetricMetadata;

    /// The metric's label schema, in declaration order.
    fn label_names(&self) -> &[SharedString];

    /// Collects the metric's current state into an immutable snapshot.
    fn collect(&self) -> Self::Snapshot;
}

/// The per-label-set aggregate of a summary metric.
///
/// Data points are handed out by [`Summary::with_label_values`] and are safe
/// to cache and share: observing is wait-free except for a short window
/// mutex, and never blocks on a concurrent collection.
pub struct SummaryDataPoint {
    // Completed observations.  Incremented last in the observe path, so a
    // reader that has seen a given count has also seen the sum and estimator
    // updates belonging to it.
    count: AtomicU64,
    // f64 bits; see `add_to_sum`.
    sum: AtomicU64,
    window: Option<Mutex<SlidingWindow>>,
    buffer: ObservationBuffer,
    targets: Arc<[QuantileTarget]>,
    exemplar_sampler: Option<Box<dyn ExemplarSampler>>,
    created_timestamp_ms: i64,
    clock: Clock,
}

impl SummaryDataPoint {
    pub(crate) fn new(
        targets: Arc<[QuantileTarget]>,
        max_age: Duration,
        age_buckets: u32,
        exemplar_sampler: Option<Box<dyn ExemplarSampler>>,
        clock: Clock,
    ) -> SummaryDataPoint {
        let window = if targets.is_empty() {
            None
        } else {
            Some(Mutex::new(SlidingWindow::new(
                targets.clone(),
                max_age,
                age_buckets,
                clock.clone(),
            )))
        };

        SummaryDataPoint {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0.0f64.to_bits()),
            window,
            buffer: ObservationBuffer::new(),
            targets,
            exemplar_sampler,
            created_timestamp_ms: unix_time_millis(),
            clock,
        }
    }

    /// Records an observation.  `NaN` values are silently dropped.
    pub fn observe(&self, value: f64) {
        if value.is_nan() {
            return;
        }
        if !self.buffer.append(value) {
            self.do_observe(value);
        }
        if let Some(sampler) = &self.exemplar_sampler {
            sampler.observe(value);
        }
    }

    /// Records an observation along with labels identifying it, for exemplar
    /// sampling.  `NaN` values are silently dropped.
    pub fn observe_with_exemplar(&self, value: f64, exemplar_labels: &[Label]) {
        if value.is_nan() {
            return;
        }
        if !self.buffer.append(value) {
            self.do_observe(value);
        }
        if let Some(sampler) = &self.exemplar_sampler {
            sampler.observe_with_labels(value, exemplar_labels);
        }
    }

    /// Starts a timer that observes the elapsed seconds when dropped, or when
    /// [`Timer::observe_duration`] is called.
    pub fn start_timer(&self) -> Timer<'_> {
        Timer { point: self, start: self.clock.now(), observed: false }
    }

    // The inline update path.  The ordering here is the synchronization edge
    // the whole data point hangs off of: sum first, estimator second, count
    // last with release semantics.
    fn do_observe(&self, value: f64) {
        self.add_to_sum(value);
        if let Some(window) = &self.window {
            window.lock().observe(value);
        }
        self.count.fetch_add(1, Ordering::Release);
    }

    fn add_to_sum(&self, value: f64) {
        let _ = self.sum.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some((f64::from_bits(bits) + value).to_bits())
        });
    }

    pub(crate) fn collect(&self, labels: Vec<Label>) -> SummaryDataPointSnapshot {
        self.buffer.run(
            |expected| self.count.load(Ordering::Acquire) >= expected,
            move || {
                let count = self.count.load(Ordering::Acquire);
                let sum = f64::from_bits(self.sum.load(Ordering::Acquire));
                let quantiles = match &self.window {
                    Some(window) => {
                        let mut window = window.lock();
                        let estimator = window.current();
                        self.targets
                            .iter()
                            .map(|target| QuantileValue {
                                quantile: target.quantile(),
                                value: estimator.get(target.quantile()),
                            })
                            .collect()
                    }
                    None => Vec::new(),
                };
                let exemplars = self
                    .exemplar_sampler
                    .as_ref()
                    .map(|sampler| sampler.collect())
                    .unwrap_or_default();

                SummaryDataPointSnapshot {
                    count,
                    sum,
                    quantiles,
                    labels,
                    exemplars,
                    created_timestamp_ms: self.created_timestamp_ms,
                    scrape_timestamp_ms: None,
                }
            },
            |value| self.do_observe(value),
        )
    }
}

impl fmt::Debug for SummaryDataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummaryDataPoint")
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("created_timestamp_ms", &self.created_timestamp_ms)
            .finish_non_exhaustive()
    }
}

/// Observes the wall-clock seconds a section of code took.
///
/// Returned by [`SummaryDataPoint::start_timer`]; records on drop unless
/// [`observe_duration`](Timer::observe_duration) was called first.
#[must_use = "this timer observes on drop; dropping it immediately records ~0 seconds"]
pub struct Timer<'a> {
    point: &'a SummaryDataPoint,
    start: Instant,
    observed: bool,
}

impl Timer<'_> {
    /// Stops the timer, observes the elapsed seconds, and returns them.
    pub fn observe_duration(mut self) -> f64 {
        self.observed = true;
        let seconds = (self.point.clock.now() - self.start).as_secs_f64();
        self.point.observe(seconds);
        seconds
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        if !self.observed {
            let seconds = (self.point.clock.now() - self.start).as_secs_f64();
            self.point.observe(seconds);
        }
    }
}

/// A Prometheus-style summary metric.
///
/// Tracks a running count and sum per label-value combination, plus
/// configurable φ-quantiles estimated over a sliding time window.  Built via
/// [`Summary::builder`]; collected via [`Summary::collect`], which yields an
/// immutable [`SummarySnapshot`] for an exposition layer to render.
pub struct Summary {
    metadata: MetricMetadata,
    label_names: Vec<SharedString>,
    targets: Arc<[QuantileTarget]>,
    max_age: Duration,
    age_buckets: u32,
    exemplar_factory: Option<ExemplarSamplerFactory>,
    points: RwLock<IndexMap<Vec<String>, Arc<SummaryDataPoint>>>,
    clock: Clock,
}

impl Summary {
    /// Returns a builder for a summary with the given name.
    pub fn builder(name: impl Into<SharedString>) -> SummaryBuilder {
        SummaryBuilder::new(name)
    }

    pub(crate) fn new(
        metadata: MetricMetadata,
        label_names: Vec<SharedString>,
        targets: Arc<[QuantileTarget]>,
        max_age: Duration,
        age_buckets: u32,
        exemplar_factory: Option<ExemplarSamplerFactory>,
        clock: Clock,
    ) -> Summary {
        let summary = Summary {
            metadata,
            label_names,
            targets,
            max_age,
            age_buckets,
            exemplar_factory,
            points: RwLock::new(IndexMap::new()),
            clock,
        };

        // A label-less summary has exactly one data point, created up front
        // so an unobserved metric still exposes a zero count.
        if summary.label_names.is_empty() {
            let point = summary.new_data_point();
            summary
                .points
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(Vec::new(), point);
        }

        summary
    }

    /// The metric's metadata.
    pub fn metadata(&self) -> &MetricMetadata {
        &self.metadata
    }

    /// The metric's label schema, in declaration order.
    pub fn label_names(&self) -> &[SharedString] {
        &self.label_names
    }

    /// Returns the data point for the given label values, creating it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Fails if the number of values doesn't match the label schema.
    pub fn with_label_values<S: AsRef<str>>(
        &self,
        values: &[S],
    ) -> Result<Arc<SummaryDataPoint>, SummaryError> {
        if values.len() != self.label_names.len() {
            return Err(SummaryError::LabelCountMismatch {
                expected: self.label_names.len(),
                actual: values.len(),
            });
        }
        let key: Vec<String> = values.iter().map(|value| value.as_ref().to_owned()).collect();

        {
            let points = self.points.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(point) = points.get(&key) {
                return Ok(Arc::clone(point));
            }
        }

        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        let point = points.entry(key).or_insert_with(|| self.new_data_point());
        Ok(Arc::clone(point))
    }

    /// Records an observation on the label-less fast path.
    ///
    /// # Errors
    ///
    /// Fails with [`SummaryError::LabelValuesRequired`] if the metric was
    /// built with labels.
    pub fn observe(&self, value: f64) -> Result<(), SummaryError> {
        self.no_labels()?.observe(value);
        Ok(())
    }

    /// Records an observation with exemplar labels on the label-less fast
    /// path.
    ///
    /// # Errors
    ///
    /// Fails with [`SummaryError::LabelValuesRequired`] if the metric was
    /// built with labels.
    pub fn observe_with_exemplar(
        &self,
        value: f64,
        exemplar_labels: &[Label],
    ) -> Result<(), SummaryError> {
        self.no_labels()?.observe_with_exemplar(value, exemplar_labels);
        Ok(())
    }

    /// Collects every data point into an immutable snapshot.
    ///
    /// Data points are ordered by label values ascending; quantiles within a
    /// data point follow the configured target order.
    pub fn collect(&self) -> SummarySnapshot {
        let mut entries: Vec<(Vec<String>, Arc<SummaryDataPoint>)> = {
            let points = self.points.read().unwrap_or_else(PoisonError::into_inner);
            points.iter().map(|(values, point)| (values.clone(), Arc::clone(point))).collect()
        };
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let data = entries
            .into_iter()
            .map(|(values, point)| {
                let labels = self
                    .label_names
                    .iter()
                    .cloned()
                    .zip(values)
                    .map(|(name, value)| Label::new(name, value))
                    .collect();
                point.collect(labels)
            })
            .collect();

        SummarySnapshot { metadata: self.metadata.clone(), data }
    }

    /// Removes the data point for the given label values, if present.
    ///
    /// Outstanding [`SummaryDataPoint`] handles keep working but are no
    /// longer collected.
    ///
    /// # Errors
    ///
    /// Fails if the number of values doesn't match the label schema.
    pub fn remove<S: AsRef<str>>(&self, values: &[S]) -> Result<(), SummaryError> {
        if values.len() != self.label_names.len() {
            return Err(SummaryError::LabelCountMismatch {
                expected: self.label_names.len(),
                actual: values.len(),
            });
        }
        let key: Vec<String> = values.iter().map(|value| value.as_ref().to_owned()).collect();

        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        points.swap_remove(&key);
        Ok(())
    }

    /// Removes every data point, resetting the metric.
    pub fn clear(&self) {
        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        points.clear();
        if self.label_names.is_empty() {
            points.insert(Vec::new(), self.new_data_point());
        }
    }

    fn no_labels(&self) -> Result<Arc<SummaryDataPoint>, SummaryError> {
        if !self.label_names.is_empty() {
            return Err(SummaryError::LabelValuesRequired);
        }
        self.with_label_values::<&str>(&[])
    }

    fn new_data_point(&self) -> Arc<SummaryDataPoint> {
        let sampler = self.exemplar_factory.as_ref().map(|factory| factory());
        Arc::new(SummaryDataPoint::new(
            self.targets.clone(),
            self.max_age,
            self.age_buckets,
            sampler,
            self.clock.clone(),
        ))
    }
}

impl MetricCore for Summary {
    type Snapshot = SummarySnapshot;

    fn metadata(&self) -> &MetricMetadata {
        Summary::metadata(self)
    }

    fn label_names(&self) -> &[SharedString] {
        Summary::label_names(self)
    }

    fn collect(&self) -> SummarySnapshot {
        Summary::collect(self)
    }
}

impl fmt::Debug for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summary")
            .field("name", &self.metadata.name)
            .field("label_names", &self.label_names)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

fn unix_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
