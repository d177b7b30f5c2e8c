//! End-to-end behavior of the summary metric through its public API.

use std::time::Duration;

use quanta::Clock;
use windowed_summary::{Summary, SummaryError};

#[test]
fn labeled_summary_with_quantiles() {
    let summary = Summary::builder("request_duration_seconds")
        .label_names(["path"])
        .quantile_with_error(0.5, 0.01)
        .unwrap()
        .quantile_with_error(0.95, 0.001)
        .unwrap()
        .build()
        .unwrap();

    let point = summary.with_label_values(&["/a"]).unwrap();
    for i in 1..=100 {
        point.observe(i as f64);
    }

    let snapshot = summary.collect();
    assert_eq!(snapshot.data.len(), 1);

    let data = &snapshot.data[0];
    assert_eq!(data.count, 100);
    assert_eq!(data.sum, 5050.0);
    assert_eq!(data.labels.len(), 1);
    assert_eq!(data.labels[0].key(), "path");
    assert_eq!(data.labels[0].value(), "/a");

    assert_eq!(data.quantiles[0].quantile, 0.5);
    assert!(
        (49.0..=52.0).contains(&data.quantiles[0].value),
        "median {}",
        data.quantiles[0].value
    );
    assert_eq!(data.quantiles[1].quantile, 0.95);
    assert!(
        (94.0..=96.0).contains(&data.quantiles[1].value),
        "p95 {}",
        data.quantiles[1].value
    );
}

#[test]
fn summary_without_quantiles_only_counts_and_sums() {
    let summary = Summary::builder("batch_size").build().unwrap();

    summary.observe(1.0).unwrap();
    summary.observe(2.0).unwrap();
    summary.observe(f64::NAN).unwrap();
    summary.observe(3.0).unwrap();

    let data = summary.collect().data;
    assert_eq!(data[0].count, 3);
    assert_eq!(data[0].sum, 6.0);
    assert!(data[0].quantiles.is_empty());
}

#[test]
fn exact_min_and_max_targets() {
    let summary = Summary::builder("queue_depth")
        .quantile_with_error(0.0, 0.0)
        .unwrap()
        .quantile_with_error(1.0, 0.0)
        .unwrap()
        .build()
        .unwrap();

    for value in [7.0, -3.0, 42.0, 0.0] {
        summary.observe(value).unwrap();
    }

    let data = summary.collect().data;
    assert_eq!(data[0].quantiles[0].value, -3.0);
    assert_eq!(data[0].quantiles[1].value, 42.0);
}

#[test]
fn window_expiry_forgets_old_quantiles_but_not_totals() {
    let (clock, mock) = Clock::mock();
    let summary = Summary::builder("request_duration_seconds")
        .quantile_with_error(0.5, 0.01)
        .unwrap()
        .clock(clock)
        .build()
        .unwrap();

    for i in 0..1000 {
        summary.observe(i as f64).unwrap();
    }

    // Past the whole 300s window: the quantile state has expired, while
    // count and sum cover the metric's full lifetime.
    mock.increment(Duration::from_secs(301));

    let data = summary.collect().data;
    assert_eq!(data[0].count, 1000);
    assert_eq!(data[0].sum, 499_500.0);
    assert!(data[0].quantiles[0].value.is_nan());
}

#[test]
fn label_less_path_fails_on_labeled_metric() {
    let summary =
        Summary::builder("request_duration_seconds").label_names(["m"]).build().unwrap();
    assert_eq!(summary.observe(1.0).unwrap_err(), SummaryError::LabelValuesRequired);
}

#[test]
fn degenerate_window_fails_to_build() {
    let result = Summary::builder("request_duration_seconds")
        .max_age(Duration::ZERO)
        .build();
    assert_eq!(result.unwrap_err(), SummaryError::ZeroMaxAge);
}

#[test]
fn quantiles_emit_in_configured_order() {
    let summary = Summary::builder("request_duration_seconds")
        .quantile_with_error(0.99, 0.001)
        .unwrap()
        .quantile_with_error(0.5, 0.01)
        .unwrap()
        .quantile_with_error(0.9, 0.01)
        .unwrap()
        .build()
        .unwrap();

    summary.observe(1.0).unwrap();

    let quantiles: Vec<f64> =
        summary.collect().data[0].quantiles.iter().map(|q| q.quantile).collect();
    assert_eq!(quantiles, vec![0.99, 0.5, 0.9]);
}
