//! Tests for the builder API and configuration validation.
//!
//! These tests verify that the fluent builder applies defaults, rejects
//! invalid parameters at `build()`, and catches duplicate configuration.
//!
//! ## Test Organization
//!
//! 1. **Defaults** - Sensible defaults for unset parameters
//! 2. **Parameter Validation** - Out-of-range rejection
//! 3. **Depth Configuration** - Standard depths and reporting intervals
//! 4. **Duplicates** - Double-set detection

use soilstock::prelude::*;

fn valid_builder() -> soilstock::prelude::SoilStock {
    SoilStock::new()
        .standard_depths(&[7.5, 22.5])
        .reporting_intervals(&[(0.0, 15.0), (15.0, 30.0)])
}

// ============================================================================
// Defaults Tests
// ============================================================================

/// Test that a minimal configuration builds with documented defaults.
#[test]
fn test_minimal_configuration_builds() {
    let pipeline = valid_builder().build().expect("valid configuration");
    let config = pipeline.config();
    assert_eq!(config.method, InterpolationMethod::Kriging);
    assert_eq!(config.confidence_level, 0.95);
    assert_eq!(config.bootstrap_iterations, 100);
    assert_eq!(config.cv_folds, 5);
    assert_eq!(config.min_samples_per_stratum, 5);
    assert_eq!(config.ensemble_trees, 500);
    assert_eq!(config.ensemble_min_node_size, 5);
    assert!(config.extrapolation_mask);
    assert_eq!(config.seed, 0);
}

/// Test that explicit settings override the defaults.
#[test]
fn test_explicit_settings_are_kept() {
    let pipeline = valid_builder()
        .method(InterpolationMethod::EnsembleRegression)
        .confidence_level(0.9)
        .cv_folds(10)
        .ensemble_trees(100)
        .seed(7)
        .build()
        .expect("valid configuration");
    let config = pipeline.config();
    assert_eq!(config.method, InterpolationMethod::EnsembleRegression);
    assert_eq!(config.confidence_level, 0.9);
    assert_eq!(config.cv_folds, 10);
    assert_eq!(config.ensemble_trees, 100);
    assert_eq!(config.seed, 7);
}

// ============================================================================
// Parameter Validation Tests
// ============================================================================

/// Test rejection of out-of-range confidence levels.
#[test]
fn test_invalid_confidence_is_rejected() {
    for level in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
        let result = valid_builder().confidence_level(level).build();
        assert!(
            matches!(result, Err(StockError::InvalidConfidence(_))),
            "confidence {level} should be rejected"
        );
    }
}

/// Test rejection of a zero bootstrap iteration count.
#[test]
fn test_zero_bootstrap_iterations_rejected() {
    let result = valid_builder().bootstrap_iterations(0).build();
    assert!(matches!(result, Err(StockError::InvalidIterations(0))));
}

/// Test rejection of fewer than two cross-validation folds.
#[test]
fn test_single_fold_rejected() {
    let result = valid_builder().cv_folds(1).build();
    assert!(matches!(result, Err(StockError::InvalidFolds(1))));
}

/// Test rejection of a zero tree count.
#[test]
fn test_zero_trees_rejected() {
    let result = valid_builder().ensemble_trees(0).build();
    assert!(matches!(result, Err(StockError::InvalidTreeCount(0))));
}

/// Test rejection of non-positive distances.
#[test]
fn test_invalid_variogram_distance_rejected() {
    let result = valid_builder().max_variogram_distance(-10.0).build();
    assert!(matches!(result, Err(StockError::InvalidDistance { .. })));
}

/// Test rejection of an invalid default bulk density.
#[test]
fn test_invalid_bulk_density_rejected() {
    let result = valid_builder().bulk_density_default(0.0).build();
    assert!(matches!(result, Err(StockError::InvalidBulkDensity(_))));
}

// ============================================================================
// Depth Configuration Tests
// ============================================================================

/// Test that standard depths are required.
#[test]
fn test_missing_standard_depths_rejected() {
    let result = SoilStock::new()
        .reporting_intervals(&[(0.0, 15.0)])
        .build();
    assert!(matches!(
        result,
        Err(StockError::MissingParameter {
            parameter: "standard_depths"
        })
    ));
}

/// Test that non-increasing depths are rejected.
#[test]
fn test_unsorted_depths_rejected() {
    let result = SoilStock::new()
        .standard_depths(&[15.0, 7.5])
        .reporting_intervals(&[(0.0, 30.0)])
        .build();
    assert!(matches!(result, Err(StockError::InvalidDepths(_))));
}

/// Test that overlapping reporting intervals are rejected.
#[test]
fn test_overlapping_intervals_rejected() {
    let result = SoilStock::new()
        .standard_depths(&[7.5, 22.5])
        .reporting_intervals(&[(0.0, 20.0), (15.0, 30.0)])
        .build();
    assert!(matches!(result, Err(StockError::InvalidIntervals(_))));
}

/// Test that an interval covering no standard depth is rejected.
#[test]
fn test_empty_interval_rejected() {
    let result = SoilStock::new()
        .standard_depths(&[7.5])
        .reporting_intervals(&[(0.0, 15.0), (30.0, 60.0)])
        .build();
    assert!(matches!(result, Err(StockError::InvalidIntervals(_))));
}

// ============================================================================
// Duplicates Tests
// ============================================================================

/// Test that setting a parameter twice fails at build time.
#[test]
fn test_duplicate_parameter_rejected() {
    let result = valid_builder().seed(1).seed(2).build();
    assert!(matches!(
        result,
        Err(StockError::DuplicateParameter { parameter: "seed" })
    ));
}

/// Test that error messages carry context.
#[test]
fn test_error_display_is_contextual() {
    let err = valid_builder().confidence_level(1.5).build().unwrap_err();
    let message = err.to_string();
    assert!(message.contains("1.5"), "message was: {message}");
}
