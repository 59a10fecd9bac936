//! High-level API for soil stock estimation.
//!
//! ## Purpose
//!
//! This module provides the primary user-facing entry point: a fluent
//! builder for configuring a stock estimation run and producing a
//! validated [`Pipeline`].
//!
//! ## Design notes
//!
//! * **Ergonomic**: fluent builder with sensible defaults for every
//!   parameter except the depth configuration, which has no safe default.
//! * **Validated**: all parameters are checked once, in `build()`; the
//!   resulting `Pipeline` is immutable and reusable across surveys.
//! * **Explicit method**: the interpolator is a tagged variant chosen at
//!   configuration time, not a string dispatched per call.
//!
//! ### Configuration Flow
//!
//! 1. Create a builder via `SoilStock::new()`.
//! 2. Chain configuration methods (`.standard_depths()`, `.method()`, ...).
//! 3. Call `.build()` to validate and obtain a [`Pipeline`].
//! 4. Call `pipeline.run(&survey, inputs)`.
//!
//! ```rust
//! use soilstock::prelude::*;
//!
//! let pipeline = SoilStock::new()
//!     .method(InterpolationMethod::Kriging)
//!     .standard_depths(&[7.5, 22.5, 45.0])
//!     .reporting_intervals(&[(0.0, 15.0), (15.0, 60.0)])
//!     .confidence_level(0.95)
//!     .grid_cell_size(50.0)
//!     .seed(42)
//!     .build()?;
//! # Result::<(), StockError>::Ok(())
//! ```

// Internal dependencies
use crate::algorithms::kriging::DEFAULT_MAX_NEIGHBORS;
use crate::engine::executor::{InterpolationMethod, Pipeline, StockConfig};
use crate::engine::validator::Validator;
use crate::primitives::errors::StockError;

// ============================================================================
// Builder
// ============================================================================

/// Fluent builder for configuring a stock estimation pipeline.
#[derive(Debug, Clone, Default)]
pub struct StockBuilder {
    /// Interpolation method (default: kriging).
    pub method: Option<InterpolationMethod>,

    /// Confidence level for the conservative bound (default 0.95).
    pub confidence_level: Option<f64>,

    /// Bootstrap replicates per core (default 100).
    pub bootstrap_iterations: Option<usize>,

    /// Cross-validation fold count (default 5).
    pub cv_folds: Option<usize>,

    /// Hard cap on the variogram cutoff distance.
    pub max_variogram_distance: Option<f64>,

    /// Lag bin width for the empirical variogram.
    pub variogram_lag_width: Option<f64>,

    /// Minimum points per (stratum, depth) kriging unit (default 5).
    pub min_samples_per_stratum: Option<usize>,

    /// Ensemble tree count (default 500).
    pub ensemble_trees: Option<usize>,

    /// Ensemble minimum node size (default 5).
    pub ensemble_min_node_size: Option<usize>,

    /// Whether to compute the extrapolation-risk mask (default true).
    pub extrapolation_mask: Option<bool>,

    /// Standard depths to harmonize onto (required).
    pub standard_depths: Option<Vec<f64>>,

    /// Reporting depth intervals (required).
    pub reporting_intervals: Option<Vec<(f64, f64)>>,

    /// Run seed for reproducibility (default 0).
    pub seed: Option<u64>,

    /// Grid cell size in meters, for runs without raster inputs.
    pub grid_cell_size: Option<f64>,

    /// Allowed concentration increase with depth (default 5 g/kg).
    pub monotonic_tolerance: Option<f64>,

    /// Realistic concentration bounds (default [0, 1000] g/kg).
    pub realistic_bounds: Option<(f64, f64)>,

    /// Default bulk density where none was measured (default 1.3 g/cm^3).
    pub bulk_density_default: Option<f64>,

    /// Neighbour cap per kriging system (default 16).
    pub max_neighbors: Option<usize>,

    /// Tracks whether any parameter was set multiple times.
    #[doc(hidden)]
    pub duplicate_param: Option<&'static str>,
}

impl StockBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the interpolation method.
    pub fn method(mut self, method: InterpolationMethod) -> Self {
        if self.method.is_some() {
            self.duplicate_param = Some("method");
        }
        self.method = Some(method);
        self
    }

    /// Set the confidence level behind the conservative bound.
    pub fn confidence_level(mut self, level: f64) -> Self {
        if self.confidence_level.is_some() {
            self.duplicate_param = Some("confidence_level");
        }
        self.confidence_level = Some(level);
        self
    }

    /// Set the number of bootstrap replicates per core.
    pub fn bootstrap_iterations(mut self, iterations: usize) -> Self {
        if self.bootstrap_iterations.is_some() {
            self.duplicate_param = Some("bootstrap_iterations");
        }
        self.bootstrap_iterations = Some(iterations);
        self
    }

    /// Set the cross-validation fold count.
    pub fn cv_folds(mut self, folds: usize) -> Self {
        if self.cv_folds.is_some() {
            self.duplicate_param = Some("cv_folds");
        }
        self.cv_folds = Some(folds);
        self
    }

    /// Cap the variogram cutoff distance.
    pub fn max_variogram_distance(mut self, distance: f64) -> Self {
        if self.max_variogram_distance.is_some() {
            self.duplicate_param = Some("max_variogram_distance");
        }
        self.max_variogram_distance = Some(distance);
        self
    }

    /// Set the empirical variogram lag width.
    pub fn variogram_lag_width(mut self, width: f64) -> Self {
        if self.variogram_lag_width.is_some() {
            self.duplicate_param = Some("variogram_lag_width");
        }
        self.variogram_lag_width = Some(width);
        self
    }

    /// Set the minimum points per (stratum, depth) kriging unit.
    pub fn min_samples_per_stratum(mut self, min: usize) -> Self {
        if self.min_samples_per_stratum.is_some() {
            self.duplicate_param = Some("min_samples_per_stratum");
        }
        self.min_samples_per_stratum = Some(min);
        self
    }

    /// Set the ensemble tree count.
    pub fn ensemble_trees(mut self, trees: usize) -> Self {
        if self.ensemble_trees.is_some() {
            self.duplicate_param = Some("ensemble_trees");
        }
        self.ensemble_trees = Some(trees);
        self
    }

    /// Set the ensemble minimum node size.
    pub fn ensemble_min_node_size(mut self, size: usize) -> Self {
        if self.ensemble_min_node_size.is_some() {
            self.duplicate_param = Some("ensemble_min_node_size");
        }
        self.ensemble_min_node_size = Some(size);
        self
    }

    /// Enable or disable the extrapolation-risk mask.
    pub fn extrapolation_mask(mut self, enabled: bool) -> Self {
        if self.extrapolation_mask.is_some() {
            self.duplicate_param = Some("extrapolation_mask");
        }
        self.extrapolation_mask = Some(enabled);
        self
    }

    /// Set the standard depths to harmonize onto (required).
    pub fn standard_depths(mut self, depths: &[f64]) -> Self {
        if self.standard_depths.is_some() {
            self.duplicate_param = Some("standard_depths");
        }
        self.standard_depths = Some(depths.to_vec());
        self
    }

    /// Set the reporting depth intervals (required).
    pub fn reporting_intervals(mut self, intervals: &[(f64, f64)]) -> Self {
        if self.reporting_intervals.is_some() {
            self.duplicate_param = Some("reporting_intervals");
        }
        self.reporting_intervals = Some(intervals.to_vec());
        self
    }

    /// Set the run seed.
    pub fn seed(mut self, seed: u64) -> Self {
        if self.seed.is_some() {
            self.duplicate_param = Some("seed");
        }
        self.seed = Some(seed);
        self
    }

    /// Set the grid cell size (meters) for runs without raster inputs.
    pub fn grid_cell_size(mut self, size: f64) -> Self {
        if self.grid_cell_size.is_some() {
            self.duplicate_param = Some("grid_cell_size");
        }
        self.grid_cell_size = Some(size);
        self
    }

    /// Set the monotonicity tolerance for quality flagging.
    pub fn monotonic_tolerance(mut self, tolerance: f64) -> Self {
        if self.monotonic_tolerance.is_some() {
            self.duplicate_param = Some("monotonic_tolerance");
        }
        self.monotonic_tolerance = Some(tolerance);
        self
    }

    /// Set the realistic concentration bounds for quality flagging.
    pub fn realistic_bounds(mut self, min: f64, max: f64) -> Self {
        if self.realistic_bounds.is_some() {
            self.duplicate_param = Some("realistic_bounds");
        }
        self.realistic_bounds = Some((min, max));
        self
    }

    /// Set the default bulk density (g/cm^3).
    pub fn bulk_density_default(mut self, bd: f64) -> Self {
        if self.bulk_density_default.is_some() {
            self.duplicate_param = Some("bulk_density_default");
        }
        self.bulk_density_default = Some(bd);
        self
    }

    /// Set the neighbour cap per kriging system.
    pub fn max_neighbors(mut self, neighbors: usize) -> Self {
        if self.max_neighbors.is_some() {
            self.duplicate_param = Some("max_neighbors");
        }
        self.max_neighbors = Some(neighbors);
        self
    }

    // ========================================================================
    // Build
    // ========================================================================

    /// Validate the configuration and produce a reusable [`Pipeline`].
    pub fn build(self) -> Result<Pipeline, StockError> {
        if let Some(parameter) = self.duplicate_param {
            return Err(StockError::DuplicateParameter { parameter });
        }

        let config = StockConfig {
            method: self.method.unwrap_or(InterpolationMethod::Kriging),
            confidence_level: self.confidence_level.unwrap_or(0.95),
            bootstrap_iterations: self.bootstrap_iterations.unwrap_or(100),
            cv_folds: self.cv_folds.unwrap_or(5),
            max_variogram_distance: self.max_variogram_distance,
            variogram_lag_width: self.variogram_lag_width,
            min_samples_per_stratum: self.min_samples_per_stratum.unwrap_or(5),
            ensemble_trees: self.ensemble_trees.unwrap_or(500),
            ensemble_min_node_size: self.ensemble_min_node_size.unwrap_or(5),
            extrapolation_mask: self.extrapolation_mask.unwrap_or(true),
            standard_depths: self.standard_depths.unwrap_or_default(),
            reporting_intervals: self.reporting_intervals.unwrap_or_default(),
            seed: self.seed.unwrap_or(0),
            grid_cell_size: self.grid_cell_size,
            monotonic_tolerance: self.monotonic_tolerance.unwrap_or(5.0),
            realistic_bounds: self.realistic_bounds.unwrap_or((0.0, 1000.0)),
            bulk_density_default: self.bulk_density_default.unwrap_or(1.3),
            max_neighbors: self.max_neighbors.unwrap_or(DEFAULT_MAX_NEIGHBORS),
        };

        Validator::validate(&config)?;
        Ok(Pipeline::new(config))
    }
}
