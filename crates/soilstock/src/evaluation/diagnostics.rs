//! Run diagnostics: the ledger of skips, fallbacks, and fit quality.
//!
//! ## Purpose
//!
//! This module defines [`RunDiagnostics`], the explicit diagnostics ledger
//! injected into every pipeline stage, plus the flat metric records the
//! downstream reporting collaborator consumes: cross-validation rows,
//! variogram fits, and variable importances.
//!
//! ## Design notes
//!
//! * **Injected, not global**: stages receive `&mut RunDiagnostics`; there
//!   is no process-wide mutable diagnostic state. The `log` facade carries
//!   only ambient trace messages.
//! * **Nothing silent**: every skipped unit, fallback, and degradation is
//!   recorded with a reason string; a run's ledger is the audit trail for
//!   its outputs.
//! * **Flat tables**: records are plain serializable rows so reporting can
//!   render them without touching pipeline types.
//!
//! ## Invariants
//!
//! * Events are append-only and preserve recording order.
//! * Metric values are finite or NaN (NaN marks "not computable"), never
//!   fabricated.

// External dependencies
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// Internal dependencies
use crate::math::variogram::VariogramModel;

// ============================================================================
// Events
// ============================================================================

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Depth-profile harmonization.
    Harmonize,
    /// Variogram estimation and fitting.
    Variogram,
    /// Ordinary kriging prediction.
    Kriging,
    /// Ensemble-regression training and prediction.
    Ensemble,
    /// Cross-validation.
    CrossValidation,
    /// Stock integration.
    Integration,
    /// Stratum aggregation.
    Aggregation,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Harmonize => "harmonize",
            Self::Variogram => "variogram",
            Self::Kriging => "kriging",
            Self::Ensemble => "ensemble",
            Self::CrossValidation => "cross-validation",
            Self::Integration => "integration",
            Self::Aggregation => "aggregation",
        };
        write!(f, "{name}")
    }
}

/// What happened to the unit the event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// The unit was skipped entirely and excluded downstream.
    Skipped,
    /// A documented fallback replaced the primary strategy.
    Fallback,
    /// Output was produced in degraded form.
    Degraded,
    /// Output exists but its quality metrics are not trustworthy.
    Unreliable,
    /// A variance input was missing; conservative output was omitted.
    MissingUncertainty,
    /// Informational note.
    Info,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Skipped => "skipped",
            Self::Fallback => "fallback",
            Self::Degraded => "degraded",
            Self::Unreliable => "unreliable",
            Self::MissingUncertainty => "missing-uncertainty",
            Self::Info => "info",
        };
        write!(f, "{name}")
    }
}

/// One ledger entry: what happened, where, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    /// Stage the event occurred in.
    pub stage: Stage,
    /// Unit the event concerns (e.g. a core id or "stratum=A depth=15").
    pub unit: String,
    /// Event category.
    pub kind: EventKind,
    /// Human-readable reason string.
    pub reason: String,
}

// ============================================================================
// Metric Records
// ============================================================================

/// Held-out prediction quality metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvMetrics {
    /// Root mean squared error.
    pub rmse: f64,
    /// Mean absolute error.
    pub mae: f64,
    /// Mean error (bias): mean(predicted - actual).
    pub mean_error: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
    /// Number of held-out predictions behind the metrics.
    pub n: usize,
}

impl CvMetrics {
    /// Compute metrics from paired actual/predicted values.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return Self {
                rmse: f64::NAN,
                mae: f64::NAN,
                mean_error: f64::NAN,
                r_squared: f64::NAN,
                n: 0,
            };
        }
        let n_f = n as f64;

        let mut ss_res = 0.0;
        let mut abs_sum = 0.0;
        let mut bias_sum = 0.0;
        let mut actual_sum = 0.0;
        for i in 0..n {
            let err = predicted[i] - actual[i];
            ss_res += err * err;
            abs_sum += err.abs();
            bias_sum += err;
            actual_sum += actual[i];
        }

        let mean_actual = actual_sum / n_f;
        let ss_tot: f64 = actual[..n]
            .iter()
            .map(|&a| (a - mean_actual) * (a - mean_actual))
            .sum();

        let r_squared = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };

        Self {
            rmse: (ss_res / n_f).sqrt(),
            mae: abs_sum / n_f,
            mean_error: bias_sum / n_f,
            r_squared,
            n,
        }
    }
}

/// One cross-validation table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvRecord {
    /// Interpolation method the row belongs to ("kriging" or "ensemble").
    pub method: String,
    /// Stratum the unit belongs to; `None` for pooled ensemble rows.
    pub stratum: Option<String>,
    /// Standard depth of the unit (cm).
    pub depth: f64,
    /// Held-out metrics.
    pub metrics: CvMetrics,
    /// Model description (e.g. "spherical(nugget=.., sill=.., range=..)").
    pub model: Option<String>,
    /// True when fold reduction made the metrics unreliable.
    pub unreliable: bool,
}

/// Fitted variogram row for the diagnostics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariogramRecord {
    /// Stratum of the modeling unit.
    pub stratum: String,
    /// Standard depth of the modeling unit (cm).
    pub depth: f64,
    /// The fitted (or heuristic) model.
    pub model: VariogramModel,
}

/// Permutation importance of one covariate at one depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceRecord {
    /// Standard depth (cm).
    pub depth: f64,
    /// Covariate name.
    pub covariate: String,
    /// Increase in out-of-bag MSE after permuting the covariate.
    pub importance: f64,
}

// ============================================================================
// Ledger
// ============================================================================

/// The run's diagnostics ledger, injected into every stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Skip/fallback/degradation events in recording order.
    pub events: Vec<DiagnosticEvent>,
    /// Cross-validation rows.
    pub cv_records: Vec<CvRecord>,
    /// Fitted variogram rows.
    pub variograms: Vec<VariogramRecord>,
    /// Variable importance rows.
    pub importances: Vec<ImportanceRecord>,
}

impl RunDiagnostics {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event.
    pub fn record(
        &mut self,
        stage: Stage,
        unit: impl Into<String>,
        kind: EventKind,
        reason: impl Into<String>,
    ) {
        self.events.push(DiagnosticEvent {
            stage,
            unit: unit.into(),
            kind,
            reason: reason.into(),
        });
    }

    /// Events of a given kind.
    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &DiagnosticEvent> {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    /// Number of skipped units across all stages.
    pub fn skipped_count(&self) -> usize {
        self.events_of(EventKind::Skipped).count()
    }
}

impl Display for RunDiagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run Diagnostics:")?;

        if self.events.is_empty() {
            writeln!(f, "  (no events)")?;
        } else {
            for event in &self.events {
                writeln!(
                    f,
                    "  [{:<18}] {:<20} {}: {}",
                    event.stage.to_string(),
                    event.kind.to_string(),
                    event.unit,
                    event.reason
                )?;
            }
        }

        if !self.cv_records.is_empty() {
            writeln!(f)?;
            writeln!(f, "Cross-Validation:")?;
            writeln!(
                f,
                "  {:<10} {:<12} {:>7} {:>10} {:>10} {:>10} {:>8} {:>6}",
                "method", "stratum", "depth", "RMSE", "MAE", "ME", "R2", "n"
            )?;
            for row in &self.cv_records {
                writeln!(
                    f,
                    "  {:<10} {:<12} {:>7.1} {:>10.4} {:>10.4} {:>10.4} {:>8.4} {:>6}{}",
                    row.method,
                    row.stratum.as_deref().unwrap_or("-"),
                    row.depth,
                    row.metrics.rmse,
                    row.metrics.mae,
                    row.metrics.mean_error,
                    row.metrics.r_squared,
                    row.metrics.n,
                    if row.unreliable { "  (unreliable)" } else { "" },
                )?;
            }
        }

        if !self.variograms.is_empty() {
            writeln!(f)?;
            writeln!(f, "Variogram Models:")?;
            for row in &self.variograms {
                writeln!(
                    f,
                    "  {:<12} depth {:>5.1}: {} nugget={:.4} sill={:.4} range={:.1}{}",
                    row.stratum,
                    row.depth,
                    row.model.kind,
                    row.model.nugget,
                    row.model.sill,
                    row.model.range,
                    if row.model.heuristic { " (heuristic)" } else { "" },
                )?;
            }
        }

        if !self.importances.is_empty() {
            writeln!(f)?;
            writeln!(f, "Variable Importance:")?;
            for row in &self.importances {
                writeln!(
                    f,
                    "  depth {:>5.1}: {:<24} {:.6}",
                    row.depth, row.covariate, row.importance
                )?;
            }
        }

        Ok(())
    }
}
