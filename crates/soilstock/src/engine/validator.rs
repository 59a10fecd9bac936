//! Configuration validation for stock estimation runs.
//!
//! ## Purpose
//!
//! This module validates the resolved pipeline configuration once, when the
//! builder's `build()` is called. Checks are ordered from cheap to
//! expensive and fail fast at the first violation.
//!
//! ## Design notes
//!
//! * **Fail-Fast**: validation stops at the first error encountered.
//! * **Once**: downstream stages trust the validated configuration and
//!   never re-check parameter bounds.
//!
//! ## Non-goals
//!
//! * This module does not validate survey data (see
//!   `primitives::records::SoilSurvey::new`).
//! * This module does not apply defaults (the builder does).

// Internal dependencies
use crate::engine::executor::StockConfig;
use crate::primitives::errors::StockError;

// ============================================================================
// Validator
// ============================================================================

/// Validation utility for run configuration.
///
/// All methods return `Result<(), StockError>` and fail fast upon
/// identifying the first violation.
pub struct Validator;

impl Validator {
    /// Validate a complete resolved configuration.
    pub fn validate(config: &StockConfig) -> Result<(), StockError> {
        Self::validate_confidence(config.confidence_level)?;
        Self::validate_iterations(config.bootstrap_iterations)?;
        Self::validate_folds(config.cv_folds)?;
        Self::validate_tree_count(config.ensemble_trees)?;
        Self::validate_node_size(config.ensemble_min_node_size)?;
        Self::validate_bulk_density(config.bulk_density_default)?;
        Self::validate_bounds(config.realistic_bounds)?;

        if let Some(distance) = config.max_variogram_distance {
            Self::validate_distance("max_variogram_distance", distance)?;
        }
        if let Some(width) = config.variogram_lag_width {
            Self::validate_distance("variogram_lag_width", width)?;
        }
        if let Some(size) = config.grid_cell_size {
            if !size.is_finite() || size <= 0.0 {
                return Err(StockError::InvalidCellSize(size));
            }
        }
        if config.min_samples_per_stratum < 2 {
            return Err(StockError::InvalidRecord(format!(
                "min_samples_per_stratum {} must be at least 2",
                config.min_samples_per_stratum
            )));
        }

        Self::validate_standard_depths(&config.standard_depths)?;
        Self::validate_reporting_intervals(&config.reporting_intervals, &config.standard_depths)
    }

    // ========================================================================
    // Scalar Parameters
    // ========================================================================

    /// Validate the confidence level for the conservative bound.
    pub fn validate_confidence(level: f64) -> Result<(), StockError> {
        if !level.is_finite() || level <= 0.0 || level >= 1.0 {
            return Err(StockError::InvalidConfidence(level));
        }
        Ok(())
    }

    /// Validate the bootstrap iteration count.
    pub fn validate_iterations(iterations: usize) -> Result<(), StockError> {
        const MAX_ITERATIONS: usize = 100_000;
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(StockError::InvalidIterations(iterations));
        }
        Ok(())
    }

    /// Validate the cross-validation fold count.
    pub fn validate_folds(folds: usize) -> Result<(), StockError> {
        if folds < 2 {
            return Err(StockError::InvalidFolds(folds));
        }
        Ok(())
    }

    /// Validate the ensemble tree count.
    pub fn validate_tree_count(trees: usize) -> Result<(), StockError> {
        if trees == 0 {
            return Err(StockError::InvalidTreeCount(trees));
        }
        Ok(())
    }

    /// Validate the minimum node size.
    pub fn validate_node_size(size: usize) -> Result<(), StockError> {
        if size == 0 {
            return Err(StockError::InvalidNodeSize(size));
        }
        Ok(())
    }

    /// Validate a positive, finite distance parameter.
    pub fn validate_distance(parameter: &'static str, value: f64) -> Result<(), StockError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(StockError::InvalidDistance {
                parameter,
                got: value,
            });
        }
        Ok(())
    }

    /// Validate the default bulk density.
    pub fn validate_bulk_density(bd: f64) -> Result<(), StockError> {
        if !bd.is_finite() || bd <= 0.0 {
            return Err(StockError::InvalidBulkDensity(bd));
        }
        Ok(())
    }

    /// Validate the realistic-concentration bounds.
    pub fn validate_bounds(bounds: (f64, f64)) -> Result<(), StockError> {
        let (min, max) = bounds;
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(StockError::InvalidBounds { min, max });
        }
        Ok(())
    }

    // ========================================================================
    // Depth Configuration
    // ========================================================================

    /// Validate the standard depths: finite, non-negative, strictly increasing.
    pub fn validate_standard_depths(depths: &[f64]) -> Result<(), StockError> {
        if depths.is_empty() {
            return Err(StockError::MissingParameter {
                parameter: "standard_depths",
            });
        }
        for &d in depths {
            if !d.is_finite() || d < 0.0 {
                return Err(StockError::InvalidDepths(format!(
                    "depth {d} is not a finite non-negative value"
                )));
            }
        }
        for pair in depths.windows(2) {
            if pair[1] <= pair[0] {
                return Err(StockError::InvalidDepths(format!(
                    "depths must be strictly increasing, got {} after {}",
                    pair[1], pair[0]
                )));
            }
        }
        Ok(())
    }

    /// Validate the reporting intervals: well-formed, non-overlapping, and
    /// each covering at least one standard depth.
    pub fn validate_reporting_intervals(
        intervals: &[(f64, f64)],
        depths: &[f64],
    ) -> Result<(), StockError> {
        if intervals.is_empty() {
            return Err(StockError::MissingParameter {
                parameter: "reporting_intervals",
            });
        }

        let mut sorted = intervals.to_vec();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        for &(top, bottom) in &sorted {
            if !top.is_finite() || !bottom.is_finite() || top < 0.0 || bottom <= top {
                return Err(StockError::InvalidIntervals(format!(
                    "interval ({top}, {bottom}) is malformed"
                )));
            }
            // Half-open membership: a depth belongs to [top, bottom)
            let covered = depths.iter().any(|&d| d >= top && d < bottom);
            if !covered {
                return Err(StockError::InvalidIntervals(format!(
                    "interval ({top}, {bottom}) covers no standard depth"
                )));
            }
        }

        for pair in sorted.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(StockError::InvalidIntervals(format!(
                    "intervals ({}, {}) and ({}, {}) overlap",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }

        Ok(())
    }
}
