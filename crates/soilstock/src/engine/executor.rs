//! Unified execution engine for stock estimation runs.
//!
//! ## Purpose
//!
//! This module orchestrates the four pipeline stages in strict dependency
//! order — harmonization, interpolation (kriging or ensemble regression),
//! stock integration, and stratum aggregation — wiring algorithm outcomes
//! into the diagnostics ledger and enforcing the propagation policy:
//! per-unit failures are recovered locally and ledgered, structural
//! failures abort the run.
//!
//! ## Design notes
//!
//! * **Tagged method**: the interpolator is selected once at configuration
//!   time via [`InterpolationMethod`]; there is no per-call dispatch.
//! * **Determinism**: every stochastic step derives its seed from the run
//!   seed and a stable unit identifier, so parallel (rayon) and sequential
//!   execution produce identical results.
//! * **Injected ledger**: stages receive the run's [`RunDiagnostics`]; no
//!   global mutable state. The `log` facade carries ambient progress
//!   messages only.
//! * **Grid geometry**: the covariate stack defines the prediction grid
//!   when present; otherwise the stratum mask; otherwise a grid derived
//!   from the survey extent and the configured cell size.
//!
//! ## Invariants
//!
//! * Stages run in dependency order; no derived entity is mutated after
//!   its stage completes.
//! * A skipped unit contributes nothing downstream and exactly one ledger
//!   entry.

// External dependencies
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

// Internal dependencies
use crate::algorithms::aggregate::aggregate_layer;
use crate::algorithms::extrapolation::extrapolation_mask;
use crate::algorithms::forest::{ForestConfig, RandomForest};
use crate::algorithms::harmonize::{harmonize_core, CoreHarmonization, HarmonizerConfig};
use crate::algorithms::kriging::{krige_at, krige_cells};
use crate::algorithms::stock::{integrate_interval, total_layer};
use crate::evaluation::cv::{kmeans_folds, random_folds};
use crate::engine::output::RunResult;
use crate::evaluation::diagnostics::{
    CvMetrics, CvRecord, EventKind, ImportanceRecord, RunDiagnostics, Stage, VariogramRecord,
};
use crate::math::variogram::{empirical_variogram, fit_best, heuristic_model, VariogramModel};
use crate::primitives::errors::StockError;
use crate::primitives::grid::{
    CovariateStack, GeoTransform, Grid, PredictionSurface, StratumMask,
};
use crate::primitives::records::{HarmonizedProfile, SoilSurvey};
use crate::primitives::seed;

// ============================================================================
// Configuration
// ============================================================================

/// Interpolation method, selected once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterpolationMethod {
    /// Per-(stratum, depth) variogram fitting and ordinary kriging.
    Kriging,
    /// Pooled per-depth random forest over environmental covariates.
    EnsembleRegression,
}

impl Display for InterpolationMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kriging => write!(f, "kriging"),
            Self::EnsembleRegression => write!(f, "ensemble regression"),
        }
    }
}

/// Resolved run configuration; produced by the builder, validated once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockConfig {
    /// Interpolation method.
    pub method: InterpolationMethod,
    /// Confidence level behind the conservative bound (e.g. 0.95).
    pub confidence_level: f64,
    /// Bootstrap replicates per core.
    pub bootstrap_iterations: usize,
    /// Cross-validation fold count.
    pub cv_folds: usize,
    /// Hard cap on the variogram cutoff distance.
    pub max_variogram_distance: Option<f64>,
    /// Lag bin width; derived from the cutoff when absent.
    pub variogram_lag_width: Option<f64>,
    /// Minimum spatial points per (stratum, depth) kriging unit.
    pub min_samples_per_stratum: usize,
    /// Ensemble tree count.
    pub ensemble_trees: usize,
    /// Ensemble minimum node size.
    pub ensemble_min_node_size: usize,
    /// Whether to compute the extrapolation-risk mask.
    pub extrapolation_mask: bool,
    /// Standard depths (cm, strictly increasing).
    pub standard_depths: Vec<f64>,
    /// Reporting depth intervals (cm).
    pub reporting_intervals: Vec<(f64, f64)>,
    /// Run seed.
    pub seed: u64,
    /// Grid cell size (m) when no raster input defines the geometry.
    pub grid_cell_size: Option<f64>,
    /// Allowed concentration increase with depth (g/kg).
    pub monotonic_tolerance: f64,
    /// Realistic concentration bounds (g/kg).
    pub realistic_bounds: (f64, f64),
    /// Default bulk density (g/cm^3) where none was measured.
    pub bulk_density_default: f64,
    /// Neighbour cap per kriging system.
    pub max_neighbors: usize,
}

/// Raster inputs supplied by the upstream collaborators.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunInputs<'a> {
    /// Co-registered environmental covariates (required for ensemble runs).
    pub covariates: Option<&'a CovariateStack>,
    /// Categorical stratum raster (required for per-stratum aggregation).
    pub strata: Option<&'a StratumMask>,
}

/// Fraction of the stratum extent added as a prediction buffer.
const BBOX_BUFFER_FRACTION: f64 = 0.1;

/// Default lag count when no lag width is configured.
const DEFAULT_LAG_COUNT: f64 = 15.0;

// ============================================================================
// Pipeline
// ============================================================================

/// A validated, ready-to-run pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: StockConfig,
}

/// One harmonized spatial point within a (stratum, depth) unit.
#[derive(Debug, Clone)]
struct PointSample {
    x: f64,
    y: f64,
    value: f64,
    stratum: String,
}

/// Prediction grid geometry for the run.
#[derive(Debug, Clone)]
struct GridGeometry {
    rows: usize,
    cols: usize,
    transform: GeoTransform,
    crs: String,
}

impl Pipeline {
    /// Wrap a validated configuration.
    pub(crate) fn new(config: StockConfig) -> Self {
        Self { config }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    /// Execute the full pipeline over a validated survey.
    ///
    /// Per-unit data problems are ledgered and recovered; structural
    /// problems (covariate mismatch, missing grid geometry) abort with an
    /// error naming the missing precondition.
    pub fn run(&self, survey: &SoilSurvey, inputs: RunInputs<'_>) -> Result<RunResult, StockError> {
        let config = &self.config;
        let mut diagnostics = RunDiagnostics::new();

        info!(
            "starting stock estimation run: method={}, {} cores, seed={}",
            config.method,
            survey.cores().len(),
            config.seed
        );

        // Stage 1: harmonization
        let profiles = self.harmonize_all(survey, &mut diagnostics);
        if profiles.is_empty() {
            return Err(StockError::EmptyInput);
        }

        // Grid geometry and input co-registration
        let geometry = self.resolve_geometry(survey, &inputs)?;

        // Stage 2: interpolation
        let surfaces = match config.method {
            InterpolationMethod::Kriging => {
                self.run_kriging(survey, &profiles, &inputs, &geometry, &mut diagnostics)
            }
            InterpolationMethod::EnsembleRegression => {
                self.run_ensemble(survey, &profiles, &inputs, &geometry, &mut diagnostics)?
            }
        };

        // Stage 3: stock integration
        let bulk_density = self.bulk_density_grid(survey, &inputs, &geometry, &mut diagnostics);
        let mut stock_layers = Vec::with_capacity(config.reporting_intervals.len());
        for &interval in &config.reporting_intervals {
            if let Some(layer) = integrate_interval(
                &surfaces,
                &config.standard_depths,
                interval,
                &bulk_density,
                config.confidence_level,
            ) {
                if layer.uncertainty_unavailable {
                    diagnostics.record(
                        Stage::Integration,
                        format!("interval {}-{} cm", interval.0, interval.1),
                        EventKind::MissingUncertainty,
                        "no variance surface available; conservative bound omitted",
                    );
                }
                stock_layers.push(layer);
            }
        }
        let profile_total = total_layer(&stock_layers, config.confidence_level);

        // Stage 4: aggregation
        let mut summaries = Vec::new();
        for layer in &stock_layers {
            summaries.extend(aggregate_layer(
                layer,
                inputs.strata,
                survey,
                config.confidence_level,
            )?);
        }
        if let Some(total) = &profile_total {
            summaries.extend(aggregate_layer(
                total,
                inputs.strata,
                survey,
                config.confidence_level,
            )?);
        }

        info!(
            "run complete: {} surfaces, {} stock layers, {} summary rows, {} ledger events",
            surfaces.len(),
            stock_layers.len(),
            summaries.len(),
            diagnostics.events.len()
        );

        Ok(RunResult {
            method: config.method,
            seed: config.seed,
            profiles,
            surfaces,
            stock_layers,
            profile_total,
            summaries,
            diagnostics,
        })
    }

    // ========================================================================
    // Stage 1: Harmonization
    // ========================================================================

    fn harmonize_all(
        &self,
        survey: &SoilSurvey,
        diagnostics: &mut RunDiagnostics,
    ) -> Vec<HarmonizedProfile> {
        let config = &self.config;
        let harmonizer = HarmonizerConfig {
            standard_depths: config.standard_depths.clone(),
            bootstrap_iterations: config.bootstrap_iterations,
            monotonic_tolerance: config.monotonic_tolerance,
            realistic_bounds: config.realistic_bounds,
        };

        // Independent per core; rayon order is restored by collect.
        let outcomes: Vec<(String, CoreHarmonization)> = survey
            .cores()
            .par_iter()
            .map(|core| {
                let samples = survey.samples_for(&core.id);
                let core_seed = seed::derive(
                    config.seed,
                    seed::salt_of(&format!("harmonize/{}", core.id)),
                );
                (
                    core.id.clone(),
                    harmonize_core(&core.id, &samples, &harmonizer, core_seed),
                )
            })
            .collect();

        let mut profiles = Vec::new();
        for (core_id, outcome) in outcomes {
            match outcome {
                CoreHarmonization::Done { rows, degraded } => {
                    if degraded {
                        diagnostics.record(
                            Stage::Harmonize,
                            core_id.clone(),
                            EventKind::Degraded,
                            "spline fit failed; piecewise-linear fallback used",
                        );
                    }
                    profiles.extend(rows);
                }
                CoreHarmonization::Skipped { reason } => {
                    warn!("core '{core_id}' skipped: {reason}");
                    diagnostics.record(Stage::Harmonize, core_id, EventKind::Skipped, reason);
                }
            }
        }
        profiles
    }

    // ========================================================================
    // Grid Geometry
    // ========================================================================

    fn resolve_geometry(
        &self,
        survey: &SoilSurvey,
        inputs: &RunInputs<'_>,
    ) -> Result<GridGeometry, StockError> {
        if let (Some(stack), Some(mask)) = (inputs.covariates, inputs.strata) {
            if stack.crs != mask.crs {
                return Err(StockError::CovariateMismatch(format!(
                    "covariate CRS '{}' differs from stratum mask CRS '{}'",
                    stack.crs, mask.crs
                )));
            }
            if stack.rows() != mask.rows()
                || stack.cols() != mask.cols()
                || stack.transform != mask.transform
            {
                return Err(StockError::CovariateMismatch(
                    "stratum mask geometry differs from the covariate stack".into(),
                ));
            }
        }

        if let Some(stack) = inputs.covariates {
            return Ok(GridGeometry {
                rows: stack.rows(),
                cols: stack.cols(),
                transform: stack.transform,
                crs: stack.crs.clone(),
            });
        }
        if let Some(mask) = inputs.strata {
            return Ok(GridGeometry {
                rows: mask.rows(),
                cols: mask.cols(),
                transform: mask.transform,
                crs: mask.crs.clone(),
            });
        }

        // Derive from the survey extent plus a buffer.
        let cell_size = self
            .config
            .grid_cell_size
            .ok_or(StockError::MissingParameter {
                parameter: "grid_cell_size",
            })?;

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for core in survey.cores() {
            min_x = min_x.min(core.x);
            max_x = max_x.max(core.x);
            min_y = min_y.min(core.y);
            max_y = max_y.max(core.y);
        }
        let buffer = ((max_x - min_x).max(max_y - min_y) * BBOX_BUFFER_FRACTION).max(cell_size);
        let origin_x = min_x - buffer;
        let origin_y = max_y + buffer;
        let cols = (((max_x + buffer) - origin_x) / cell_size).ceil().max(1.0) as usize;
        let rows = ((origin_y - (min_y - buffer)) / cell_size).ceil().max(1.0) as usize;

        Ok(GridGeometry {
            rows,
            cols,
            transform: GeoTransform::new(origin_x, origin_y, cell_size),
            crs: "survey".into(),
        })
    }

    // ========================================================================
    // Stage 2a: Geostatistical Interpolation
    // ========================================================================

    fn run_kriging(
        &self,
        survey: &SoilSurvey,
        profiles: &[HarmonizedProfile],
        inputs: &RunInputs<'_>,
        geometry: &GridGeometry,
        diagnostics: &mut RunDiagnostics,
    ) -> Vec<PredictionSurface> {
        let config = &self.config;
        let strata = survey.strata();
        let mut surfaces = Vec::with_capacity(config.standard_depths.len());

        for (di, &depth) in config.standard_depths.iter().enumerate() {
            let mut mean = Grid::filled_nodata(geometry.rows, geometry.cols, geometry.transform);
            let mut variance =
                Grid::filled_nodata(geometry.rows, geometry.cols, geometry.transform);

            for stratum in &strata {
                let unit = format!("stratum={stratum} depth={depth}");
                let points = unit_points(survey, profiles, stratum, depth);
                let n = points.len();

                if n < config.min_samples_per_stratum {
                    debug!("kriging unit {unit} skipped: n={n}");
                    diagnostics.record(
                        Stage::Kriging,
                        unit,
                        EventKind::Skipped,
                        format!("n={n} < {}", config.min_samples_per_stratum),
                    );
                    continue;
                }
                if n == config.min_samples_per_stratum {
                    diagnostics.record(
                        Stage::Kriging,
                        unit.clone(),
                        EventKind::Info,
                        format!("sample count at minimum threshold ({n}); low confidence"),
                    );
                }

                let coords: Vec<(f64, f64, f64)> =
                    points.iter().map(|p| (p.x, p.y, p.value)).collect();

                // Variogram cutoff: configured cap against a third of the
                // unit's spatial extent diagonal.
                let (min_x, min_y, max_x, max_y) = bbox(&coords);
                let diagonal =
                    ((max_x - min_x).powi(2) + (max_y - min_y).powi(2)).sqrt();
                let mut cutoff = diagonal / 3.0;
                if let Some(cap) = config.max_variogram_distance {
                    cutoff = cutoff.min(cap);
                }
                if cutoff <= 0.0 {
                    diagnostics.record(
                        Stage::Variogram,
                        unit,
                        EventKind::Skipped,
                        "degenerate spatial extent (all points coincident)",
                    );
                    continue;
                }
                let lag_width = config
                    .variogram_lag_width
                    .unwrap_or(cutoff / DEFAULT_LAG_COUNT);

                let Some(empirical) = empirical_variogram(&coords, lag_width, cutoff) else {
                    diagnostics.record(
                        Stage::Variogram,
                        unit,
                        EventKind::Skipped,
                        format!("no point pairs within the {cutoff:.1} m cutoff"),
                    );
                    continue;
                };

                // Ordered candidate strategies; the best converged fit wins.
                let (fitted, attempts) = fit_best(&empirical);
                let model = match fitted {
                    Some(model) => model,
                    None => {
                        let detail: Vec<String> = attempts
                            .iter()
                            .map(|(kind, outcome)| match outcome {
                                Ok(sse) => format!("{kind}: sse={sse:.4}"),
                                Err(reason) => format!("{kind}: {reason}"),
                            })
                            .collect();
                        diagnostics.record(
                            Stage::Variogram,
                            unit.clone(),
                            EventKind::Fallback,
                            format!(
                                "all variogram fits failed ({}); heuristic spherical parameters",
                                detail.join("; ")
                            ),
                        );
                        heuristic_model(&empirical)
                    }
                };
                diagnostics.variograms.push(VariogramRecord {
                    stratum: stratum.clone(),
                    depth,
                    model,
                });

                // Leave-k-out cross-validation on the unit.
                self.kriging_cv(&coords, &model, stratum, depth, di, diagnostics);

                // Predict the unit's cells into the depth mosaic.
                let cells = unit_cells(inputs.strata, geometry, stratum, &coords, &mean);
                let predicted = krige_cells(
                    &coords,
                    &model,
                    &cells,
                    &geometry.transform,
                    config.max_neighbors,
                );
                let mut idw_cells = 0usize;
                for cell in predicted {
                    if cell.mean.is_finite() {
                        mean.set(cell.row, cell.col, cell.mean);
                        if cell.variance.is_finite() {
                            variance.set(cell.row, cell.col, cell.variance);
                        } else {
                            idw_cells += 1;
                        }
                    }
                }
                if idw_cells > 0 {
                    diagnostics.record(
                        Stage::Kriging,
                        unit,
                        EventKind::Degraded,
                        format!(
                            "{idw_cells} cells fell back to inverse-distance weighting (singular system)"
                        ),
                    );
                }
            }

            surfaces.push(PredictionSurface {
                depth,
                mean,
                variance: Some(variance),
                extrapolation_mask: None,
                crs: geometry.crs.clone(),
            });
        }

        surfaces
    }

    /// Leave-k-out cross-validation of one kriging unit.
    fn kriging_cv(
        &self,
        coords: &[(f64, f64, f64)],
        model: &VariogramModel,
        stratum: &str,
        depth: f64,
        depth_index: usize,
        diagnostics: &mut RunDiagnostics,
    ) {
        let config = &self.config;
        let n = coords.len();
        if n < 2 * config.cv_folds {
            diagnostics.record(
                Stage::CrossValidation,
                format!("stratum={stratum} depth={depth}"),
                EventKind::Skipped,
                format!("n={n} < {} (2 x cv_folds)", 2 * config.cv_folds),
            );
            return;
        }

        let cv_seed = seed::derive(
            config.seed,
            seed::salt_of(&format!("kriging-cv/{stratum}/{depth_index}")),
        );
        let folds = random_folds(n, config.cv_folds, cv_seed);

        let mut actual = Vec::with_capacity(n);
        let mut predicted = Vec::with_capacity(n);
        for fold in 0..config.cv_folds {
            let train: Vec<(f64, f64, f64)> = coords
                .iter()
                .zip(folds.iter())
                .filter(|(_, &f)| f != fold)
                .map(|(&c, _)| c)
                .collect();
            if train.is_empty() {
                continue;
            }
            for (i, &(x, y, value)) in coords.iter().enumerate() {
                if folds[i] != fold {
                    continue;
                }
                let (mean, _) = krige_at(&train, model, x, y, config.max_neighbors);
                if mean.is_finite() {
                    actual.push(value);
                    predicted.push(mean);
                }
            }
        }

        let metrics = CvMetrics::compute(&actual, &predicted);
        diagnostics.cv_records.push(CvRecord {
            method: "kriging".into(),
            stratum: Some(stratum.to_string()),
            depth,
            metrics,
            model: Some(format!(
                "{}(nugget={:.3}, sill={:.3}, range={:.1})",
                model.kind, model.nugget, model.sill, model.range
            )),
            unreliable: false,
        });
    }

    // ========================================================================
    // Stage 2b: Ensemble-Regression Interpolation
    // ========================================================================

    fn run_ensemble(
        &self,
        survey: &SoilSurvey,
        profiles: &[HarmonizedProfile],
        inputs: &RunInputs<'_>,
        geometry: &GridGeometry,
        diagnostics: &mut RunDiagnostics,
    ) -> Result<Vec<PredictionSurface>, StockError> {
        let config = &self.config;
        let stack = inputs.covariates.ok_or_else(|| {
            StockError::CovariateMismatch(
                "ensemble regression requires a covariate stack".into(),
            )
        })?;
        let n_features = stack.len();
        let mut surfaces = Vec::with_capacity(config.standard_depths.len());

        for (di, &depth) in config.standard_depths.iter().enumerate() {
            let unit = format!("depth={depth}");

            // Covariate extraction at sample locations, dropping
            // incomplete rows.
            let pooled = pooled_points(survey, profiles, depth);
            let mut x = Vec::new();
            let mut y = Vec::new();
            let mut strata_of = Vec::new();
            let mut coords = Vec::new();
            let mut dropped = 0usize;
            for point in &pooled {
                match stack.extract(point.x, point.y) {
                    Some(features) => {
                        x.extend(features);
                        y.push(point.value);
                        strata_of.push(point.stratum.clone());
                        coords.push((point.x, point.y));
                    }
                    None => dropped += 1,
                }
            }

            if y.is_empty() {
                // Structural: any output would be meaningless.
                return Err(StockError::CovariateMismatch(format!(
                    "zero samples with complete covariates at depth {depth} cm \
                     ({dropped} dropped); survey and covariate stack do not align"
                )));
            }
            if dropped > 0 {
                diagnostics.record(
                    Stage::Ensemble,
                    unit.clone(),
                    EventKind::Info,
                    format!("{dropped} samples dropped for incomplete covariates"),
                );
            }

            // Spatial cross-validation with within-stratum fold assignment.
            let (folds, any_reduced) =
                self.spatial_folds(&coords, &strata_of, di, diagnostics, depth);
            self.ensemble_cv(&x, &y, &folds, n_features, depth, di, any_reduced, diagnostics);

            // Full model, out-of-bag error, and importances.
            let forest_config = ForestConfig {
                trees: config.ensemble_trees,
                min_node_size: config.ensemble_min_node_size,
                mtry: None,
                seed: seed::derive(config.seed, seed::salt_of(&format!("ensemble/{di}"))),
            };
            let forest = RandomForest::fit(&x, &y, n_features, &forest_config);

            if let Some(oob) = forest.oob_summary(&x, &y) {
                diagnostics.cv_records.push(CvRecord {
                    method: "ensemble-oob".into(),
                    stratum: None,
                    depth,
                    metrics: CvMetrics {
                        rmse: oob.rmse,
                        mae: f64::NAN,
                        mean_error: f64::NAN,
                        r_squared: oob.r_squared,
                        n: oob.n,
                    },
                    model: Some(format!(
                        "random forest ({} trees, min node {})",
                        config.ensemble_trees, config.ensemble_min_node_size
                    )),
                    unreliable: false,
                });
            }

            let importance_seed =
                seed::derive(config.seed, seed::salt_of(&format!("importance/{di}")));
            let importances = forest.permutation_importance(&x, &y, importance_seed);
            for (name, &value) in stack.names.iter().zip(importances.iter()) {
                diagnostics.importances.push(ImportanceRecord {
                    depth,
                    covariate: name.clone(),
                    importance: value,
                });
            }

            // Full-extent prediction with ensemble spread as variance.
            let (mean, variance) = predict_full_extent(&forest, stack, geometry);

            // Extrapolation-risk mask.
            let mask = if config.extrapolation_mask {
                let result = extrapolation_mask(&x, n_features, &importances, stack);
                diagnostics.record(
                    Stage::Ensemble,
                    unit,
                    EventKind::Info,
                    format!(
                        "extrapolation mask: {:.1}% of cells outside the area of applicability \
                         (threshold {:.3})",
                        result.flagged_fraction * 100.0,
                        result.threshold
                    ),
                );
                Some(result.mask)
            } else {
                None
            };

            surfaces.push(PredictionSurface {
                depth,
                mean,
                variance: Some(variance),
                extrapolation_mask: mask,
                crs: geometry.crs.clone(),
            });
        }

        Ok(surfaces)
    }

    /// Within-stratum k-means fold assignment; returns per-sample fold ids
    /// and whether any stratum's fold count was reduced.
    fn spatial_folds(
        &self,
        coords: &[(f64, f64)],
        strata_of: &[String],
        depth_index: usize,
        diagnostics: &mut RunDiagnostics,
        depth: f64,
    ) -> (Vec<usize>, bool) {
        let config = &self.config;
        let mut folds = vec![0usize; coords.len()];
        let mut any_reduced = false;

        let mut labels: Vec<String> = strata_of.to_vec();
        labels.sort();
        labels.dedup();

        for stratum in &labels {
            let members: Vec<usize> = (0..coords.len())
                .filter(|&i| strata_of[i] == *stratum)
                .collect();
            let n = members.len();
            let k = config.cv_folds.min(n).max(1);
            if k < config.cv_folds {
                any_reduced = true;
                diagnostics.record(
                    Stage::CrossValidation,
                    format!("stratum={stratum} depth={depth}"),
                    EventKind::Unreliable,
                    format!(
                        "fold count reduced to {k} (n={n} < {} folds)",
                        config.cv_folds
                    ),
                );
            }
            let member_coords: Vec<(f64, f64)> = members.iter().map(|&i| coords[i]).collect();
            let fold_seed = seed::derive(
                config.seed,
                seed::salt_of(&format!("folds/{stratum}/{depth_index}")),
            );
            let local = kmeans_folds(&member_coords, k, fold_seed);
            for (local_idx, &global_idx) in members.iter().enumerate() {
                folds[global_idx] = local[local_idx];
            }
        }

        (folds, any_reduced)
    }

    /// Held-out spatial cross-validation of the ensemble at one depth.
    #[allow(clippy::too_many_arguments)]
    fn ensemble_cv(
        &self,
        x: &[f64],
        y: &[f64],
        folds: &[usize],
        n_features: usize,
        depth: f64,
        depth_index: usize,
        unreliable: bool,
        diagnostics: &mut RunDiagnostics,
    ) {
        let config = &self.config;
        let mut actual = Vec::new();
        let mut predicted = Vec::new();

        for fold in 0..config.cv_folds {
            let train_idx: Vec<usize> = (0..y.len()).filter(|&i| folds[i] != fold).collect();
            let test_idx: Vec<usize> = (0..y.len()).filter(|&i| folds[i] == fold).collect();
            if train_idx.is_empty() || test_idx.is_empty() {
                continue;
            }

            let mut train_x = Vec::with_capacity(train_idx.len() * n_features);
            let mut train_y = Vec::with_capacity(train_idx.len());
            for &i in &train_idx {
                train_x.extend_from_slice(&x[i * n_features..(i + 1) * n_features]);
                train_y.push(y[i]);
            }

            let fold_config = ForestConfig {
                trees: config.ensemble_trees,
                min_node_size: config.ensemble_min_node_size,
                mtry: None,
                seed: seed::derive(
                    config.seed,
                    seed::salt_of(&format!("ensemble-cv/{depth_index}/{fold}")),
                ),
            };
            let forest = RandomForest::fit(&train_x, &train_y, n_features, &fold_config);

            for &i in &test_idx {
                actual.push(y[i]);
                predicted.push(forest.predict(&x[i * n_features..(i + 1) * n_features]));
            }
        }

        if actual.is_empty() {
            diagnostics.record(
                Stage::CrossValidation,
                format!("depth={depth}"),
                EventKind::Skipped,
                "no fold produced held-out predictions",
            );
            return;
        }

        let metrics = CvMetrics::compute(&actual, &predicted);
        diagnostics.cv_records.push(CvRecord {
            method: "ensemble".into(),
            stratum: None,
            depth,
            metrics,
            model: None,
            unreliable,
        });
    }

    // ========================================================================
    // Stage 3 Support: Bulk Density
    // ========================================================================

    /// Per-cell bulk density: measured stratum means where available,
    /// otherwise the configured default.
    fn bulk_density_grid(
        &self,
        survey: &SoilSurvey,
        inputs: &RunInputs<'_>,
        geometry: &GridGeometry,
        diagnostics: &mut RunDiagnostics,
    ) -> Grid {
        let config = &self.config;

        // Measured mean per stratum.
        let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
        for sample in survey.samples() {
            if let Some(bd) = sample.bulk_density {
                if let Some(core) = survey.core(&sample.core_id) {
                    let slot = sums.entry(core.stratum.clone()).or_insert((0.0, 0));
                    slot.0 += bd;
                    slot.1 += 1;
                }
            }
        }
        let stratum_bd: HashMap<String, f64> = sums
            .into_iter()
            .map(|(stratum, (sum, count))| (stratum, sum / count as f64))
            .collect();

        for stratum in survey.strata() {
            if !stratum_bd.contains_key(&stratum) {
                diagnostics.record(
                    Stage::Integration,
                    format!("stratum={stratum}"),
                    EventKind::Info,
                    format!(
                        "no measured bulk density; default {} g/cm3 applied",
                        config.bulk_density_default
                    ),
                );
            }
        }

        let global = if stratum_bd.is_empty() {
            config.bulk_density_default
        } else {
            stratum_bd.values().sum::<f64>() / stratum_bd.len() as f64
        };

        let mut grid = Grid::filled_nodata(geometry.rows, geometry.cols, geometry.transform);
        for row in 0..geometry.rows {
            for col in 0..geometry.cols {
                let bd = match inputs.strata {
                    Some(mask) => match mask.stratum_at(row, col) {
                        Some(stratum) => *stratum_bd
                            .get(stratum)
                            .unwrap_or(&config.bulk_density_default),
                        None => global,
                    },
                    None => global,
                };
                grid.set(row, col, bd);
            }
        }
        grid
    }
}

// ============================================================================
// Unit Assembly Helpers
// ============================================================================

/// Harmonized points of one (stratum, depth) unit.
fn unit_points(
    survey: &SoilSurvey,
    profiles: &[HarmonizedProfile],
    stratum: &str,
    depth: f64,
) -> Vec<PointSample> {
    profiles
        .iter()
        .filter(|p| p.standard_depth == depth)
        .filter_map(|p| {
            survey.core(&p.core_id).and_then(|core| {
                if core.stratum == stratum {
                    Some(PointSample {
                        x: core.x,
                        y: core.y,
                        value: p.concentration_mean,
                        stratum: core.stratum.clone(),
                    })
                } else {
                    None
                }
            })
        })
        .collect()
}

/// Harmonized points of one depth, pooled across strata.
fn pooled_points(
    survey: &SoilSurvey,
    profiles: &[HarmonizedProfile],
    depth: f64,
) -> Vec<PointSample> {
    profiles
        .iter()
        .filter(|p| p.standard_depth == depth)
        .filter_map(|p| {
            survey.core(&p.core_id).map(|core| PointSample {
                x: core.x,
                y: core.y,
                value: p.concentration_mean,
                stratum: core.stratum.clone(),
            })
        })
        .collect()
}

/// Bounding box of unit points.
fn bbox(points: &[(f64, f64, f64)]) -> (f64, f64, f64, f64) {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for &(x, y, _) in points {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    (min_x, min_y, max_x, max_y)
}

/// Target cells of one kriging unit.
///
/// With a stratum mask, the unit owns exactly its labelled cells. Without
/// one, it owns the still-undefined cells inside its buffered bounding box
/// (strata are processed in sorted order, so the first writer wins and the
/// mosaic stays deterministic).
fn unit_cells(
    mask: Option<&StratumMask>,
    geometry: &GridGeometry,
    stratum: &str,
    points: &[(f64, f64, f64)],
    current_mean: &Grid,
) -> Vec<(usize, usize)> {
    match mask {
        Some(mask) => {
            let mut cells = Vec::new();
            for row in 0..geometry.rows {
                for col in 0..geometry.cols {
                    if mask.stratum_at(row, col) == Some(stratum) {
                        cells.push((row, col));
                    }
                }
            }
            cells
        }
        None => {
            let (min_x, min_y, max_x, max_y) = bbox(points);
            let buffer =
                ((max_x - min_x).max(max_y - min_y) * BBOX_BUFFER_FRACTION).max(geometry.transform.cell_size);
            let mut cells = Vec::new();
            for row in 0..geometry.rows {
                for col in 0..geometry.cols {
                    let (x, y) = geometry.transform.cell_center(row, col);
                    if x >= min_x - buffer
                        && x <= max_x + buffer
                        && y >= min_y - buffer
                        && y <= max_y + buffer
                        && !current_mean.get(row, col).is_finite()
                    {
                        cells.push((row, col));
                    }
                }
            }
            cells
        }
    }
}

/// Predict the full covariate extent with the trained forest.
fn predict_full_extent(
    forest: &RandomForest,
    stack: &CovariateStack,
    geometry: &GridGeometry,
) -> (Grid, Grid) {
    let rows = geometry.rows;
    let cols = geometry.cols;

    // Row-parallel prediction with deterministic assembly.
    let predicted: Vec<Vec<Option<(f64, f64)>>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            (0..cols)
                .map(|col| {
                    stack
                        .extract_cell(row, col)
                        .map(|features| forest.predict_spread(&features))
                })
                .collect()
        })
        .collect();

    let mut mean = Grid::filled_nodata(rows, cols, geometry.transform);
    let mut variance = Grid::filled_nodata(rows, cols, geometry.transform);
    for (row, row_values) in predicted.into_iter().enumerate() {
        for (col, cell) in row_values.into_iter().enumerate() {
            if let Some((m, v)) = cell {
                mean.set(row, col, m);
                variance.set(row, col, v);
            }
        }
    }
    (mean, variance)
}
