//! Output types for stock estimation runs.
//!
//! ## Purpose
//!
//! This module defines [`RunResult`], the complete output of one pipeline
//! run: harmonized profiles, prediction surfaces, stock layers, the
//! terminal summary table, and the diagnostics ledger.
//!
//! ## Design notes
//!
//! * **Strict derivation chain**: surfaces, layers, and summaries are all
//!   derived wholesale during the run and never mutated afterward.
//! * **Optional outputs**: the profile total and conservative columns exist
//!   only when their inputs did; absence is meaningful (see the
//!   `missing-uncertainty` ledger events).
//! * **Ergonomics**: `Display` renders the run the way an analyst reads it:
//!   counts first, then the summary table, then diagnostics.
//!
//! ## Non-goals
//!
//! * This module does not write rasters or tables to disk (reporting is a
//!   downstream collaborator).

// External dependencies
use std::fmt::{Display, Formatter};

// Internal dependencies
use crate::engine::executor::InterpolationMethod;
use crate::evaluation::diagnostics::RunDiagnostics;
use crate::primitives::grid::{PredictionSurface, StockLayer};
use crate::primitives::records::{HarmonizedProfile, StratumSummary};

// ============================================================================
// Result Structure
// ============================================================================

/// Complete output of one stock estimation run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Interpolation method the run used.
    pub method: InterpolationMethod,

    /// Run seed (for reproduction).
    pub seed: u64,

    /// Harmonized profile rows, one per (core, standard depth).
    pub profiles: Vec<HarmonizedProfile>,

    /// One concentration surface per standard depth.
    pub surfaces: Vec<PredictionSurface>,

    /// One stock layer per reporting interval.
    pub stock_layers: Vec<StockLayer>,

    /// Full-profile total stock layer.
    pub profile_total: Option<StockLayer>,

    /// Terminal summary rows: per (stratum, interval) plus "ALL" rows.
    pub summaries: Vec<StratumSummary>,

    /// The run's diagnostics ledger.
    pub diagnostics: RunDiagnostics,
}

impl RunResult {
    /// Summary rows for one stratum label.
    pub fn summaries_for(&self, stratum: &str) -> Vec<&StratumSummary> {
        self.summaries
            .iter()
            .filter(|s| s.stratum == stratum)
            .collect()
    }

    /// True when any stage degraded to mean-only output.
    pub fn has_missing_uncertainty(&self) -> bool {
        self.stock_layers.iter().any(|l| l.uncertainty_unavailable)
    }
}

// ============================================================================
// Display Implementation
// ============================================================================

impl Display for RunResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Stock Estimation Run:")?;
        writeln!(f, "  Method:     {}", self.method)?;
        writeln!(f, "  Seed:       {}", self.seed)?;
        writeln!(f, "  Profiles:   {} rows", self.profiles.len())?;
        writeln!(f, "  Surfaces:   {}", self.surfaces.len())?;
        writeln!(f, "  Intervals:  {}", self.stock_layers.len())?;
        if self.has_missing_uncertainty() {
            writeln!(f, "  Note:       conservative bounds partially unavailable")?;
        }
        writeln!(f)?;

        if !self.summaries.is_empty() {
            writeln!(f, "Stratum Summaries:")?;
            writeln!(
                f,
                "  {:<12} {:>12} {:>10} {:>10} {:>10} {:>10} {:>12} {:>12} {:>6}",
                "stratum",
                "interval",
                "area_ha",
                "mean",
                "se",
                "conserv",
                "total_t",
                "cons_total",
                "n"
            )?;
            for row in &self.summaries {
                writeln!(
                    f,
                    "  {:<12} {:>4.0}-{:>4.0} cm {:>10.2} {:>10.2} {:>10} {:>10} {:>12.1} {:>12} {:>6}",
                    row.stratum,
                    row.interval.0,
                    row.interval.1,
                    row.area_ha,
                    row.mean_stock,
                    row.se_stock
                        .map(|v| format!("{v:.2}"))
                        .unwrap_or_else(|| "-".into()),
                    row.conservative_stock
                        .map(|v| format!("{v:.2}"))
                        .unwrap_or_else(|| "-".into()),
                    row.total_stock,
                    row.conservative_total
                        .map(|v| format!("{v:.1}"))
                        .unwrap_or_else(|| "-".into()),
                    row.n_samples,
                )?;
            }
            writeln!(f)?;
        }

        write!(f, "{}", self.diagnostics)
    }
}
