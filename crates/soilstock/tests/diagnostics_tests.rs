//! Tests for cross-validation metrics and the diagnostics ledger.
//!
//! These tests verify the metric formulas behind every CV table row and
//! the ledger's append/render behaviour.
//!
//! ## Test Organization
//!
//! 1. **Metrics** - RMSE, MAE, mean error, R-squared
//! 2. **Ledger** - Event recording and rendering

use approx::assert_relative_eq;
use soilstock::prelude::*;

// ============================================================================
// Metrics Tests
// ============================================================================

/// Test metric formulas against hand-computed values.
#[test]
fn test_metrics_match_hand_computation() {
    let actual = [10.0, 20.0, 30.0, 40.0];
    let predicted = [12.0, 18.0, 33.0, 39.0];
    // errors: +2, -2, +3, -1
    let metrics = CvMetrics::compute(&actual, &predicted);

    assert_relative_eq!(metrics.rmse, (18.0_f64 / 4.0).sqrt(), epsilon = 1e-12);
    assert_relative_eq!(metrics.mae, 2.0, epsilon = 1e-12);
    assert_relative_eq!(metrics.mean_error, 0.5, epsilon = 1e-12);
    assert_eq!(metrics.n, 4);

    // R2 = 1 - 18 / 500
    assert_relative_eq!(metrics.r_squared, 1.0 - 18.0 / 500.0, epsilon = 1e-12);
}

/// Test that a perfect prediction scores R2 = 1 and zero errors.
#[test]
fn test_perfect_prediction() {
    let values = [5.0, 7.0, 9.0];
    let metrics = CvMetrics::compute(&values, &values);
    assert_eq!(metrics.rmse, 0.0);
    assert_eq!(metrics.mae, 0.0);
    assert_eq!(metrics.mean_error, 0.0);
    assert_eq!(metrics.r_squared, 1.0);
}

/// Test that empty inputs yield NaN metrics, not a panic.
#[test]
fn test_empty_metrics_are_nan() {
    let metrics = CvMetrics::compute(&[], &[]);
    assert!(metrics.rmse.is_nan());
    assert!(metrics.mae.is_nan());
    assert_eq!(metrics.n, 0);
}

/// Test that a constant actual series cannot fake a positive R2.
#[test]
fn test_constant_actuals_bound_r_squared() {
    let actual = [10.0, 10.0, 10.0];
    let predicted = [11.0, 9.0, 10.5];
    let metrics = CvMetrics::compute(&actual, &predicted);
    assert_eq!(metrics.r_squared, 0.0);
}

// ============================================================================
// Ledger Tests
// ============================================================================

/// Test event recording, filtering, and counting.
#[test]
fn test_ledger_records_events_in_order() {
    let mut ledger = RunDiagnostics::new();
    ledger.record(Stage::Kriging, "stratum=a depth=7.5", EventKind::Skipped, "n=2 < 5");
    ledger.record(
        Stage::Variogram,
        "stratum=b depth=7.5",
        EventKind::Fallback,
        "all variogram fits failed",
    );
    ledger.record(Stage::Harmonize, "core-9", EventKind::Degraded, "spline fit failed");

    assert_eq!(ledger.events.len(), 3);
    assert_eq!(ledger.skipped_count(), 1);
    assert_eq!(ledger.events_of(EventKind::Fallback).count(), 1);
    assert_eq!(ledger.events[0].unit, "stratum=a depth=7.5");
}

/// Test that the rendered ledger carries units and reasons verbatim.
#[test]
fn test_ledger_rendering_contains_reasons() {
    let mut ledger = RunDiagnostics::new();
    ledger.record(Stage::Kriging, "stratum=scrub depth=15", EventKind::Skipped, "n=2 < 5");

    let rendered = ledger.to_string();
    assert!(rendered.contains("skipped"), "{rendered}");
    assert!(rendered.contains("stratum=scrub depth=15"), "{rendered}");
    assert!(rendered.contains("n=2 < 5"), "{rendered}");
}

/// Test that an empty ledger renders without panicking.
#[test]
fn test_empty_ledger_renders() {
    let rendered = RunDiagnostics::new().to_string();
    assert!(rendered.contains("no events"), "{rendered}");
}
