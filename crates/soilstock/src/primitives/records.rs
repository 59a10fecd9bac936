//! Typed survey records and the validated survey boundary.
//!
//! ## Purpose
//!
//! This module defines the typed records consumed and produced by the
//! pipeline — cores, depth samples, harmonized profiles, and terminal
//! stratum summaries — together with [`SoilSurvey`], the single validation
//! boundary through which field data enters the core.
//!
//! ## Design notes
//!
//! * **Validate once**: `SoilSurvey::new` performs all record-level checks;
//!   downstream code never re-validates and is fully typed.
//! * **Immutability**: cores and samples are never mutated after ingestion;
//!   derived records are recomputed wholesale, never edited.
//! * **Identity**: a core's identity is its `id`; depth samples reference
//!   cores by id and are kept sorted by depth within each core.
//!
//! ## Invariants
//!
//! * Depth intervals within a core are non-overlapping and increasing.
//! * All coordinates and measured values are finite.
//! * `HarmonizedProfile::concentration_se >= 0`.
//!
//! ## Non-goals
//!
//! * This module does not read files or parse external formats (ingestion
//!   is an upstream collaborator).
//! * This module does not hold raster data (see `primitives::grid`).

// External dependencies
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Internal dependencies
use crate::primitives::errors::StockError;

// ============================================================================
// Input Records
// ============================================================================

/// A sampling location. Immutable once ingested; identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Core {
    /// Unique core identifier.
    pub id: String,
    /// X coordinate (easting or longitude) in the survey CRS.
    pub x: f64,
    /// Y coordinate (northing or latitude) in the survey CRS.
    pub y: f64,
    /// Stratum label (ecosystem or management zone).
    pub stratum: String,
    /// Optional project scenario tag (e.g. "baseline").
    pub scenario: Option<String>,
}

/// One measured depth interval of a core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSample {
    /// Identifier of the parent core.
    pub core_id: String,
    /// Top of the sampled interval (cm, measured downward from the surface).
    pub depth_top: f64,
    /// Bottom of the sampled interval (cm).
    pub depth_bottom: f64,
    /// Measured concentration over the interval (g/kg).
    pub concentration: f64,
    /// Measured bulk density (g/cm^3), when available.
    pub bulk_density: Option<f64>,
}

impl DepthSample {
    /// Midpoint of the sampled interval (cm).
    pub fn midpoint(&self) -> f64 {
        (self.depth_top + self.depth_bottom) / 2.0
    }

    /// Thickness of the sampled interval (cm).
    pub fn thickness(&self) -> f64 {
        self.depth_bottom - self.depth_top
    }
}

// ============================================================================
// Derived Records
// ============================================================================

/// Quality flags attached to a harmonized profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QualityFlags {
    /// Profile does not increase with depth beyond the configured tolerance.
    pub monotonic: bool,
    /// Value lies within the configured realistic bounds.
    pub realistic: bool,
    /// Spline fitting failed; the row comes from the piecewise-linear fallback.
    pub degraded_fit: bool,
}

/// One harmonized row: a core's concentration resampled at a standard depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizedProfile {
    /// Identifier of the parent core.
    pub core_id: String,
    /// Standard depth this row was evaluated at (cm).
    pub standard_depth: f64,
    /// Harmonized concentration estimate (g/kg).
    pub concentration_mean: f64,
    /// Bootstrap standard error of the estimate (g/kg). Always >= 0.
    pub concentration_se: f64,
    /// Quality flags for this row.
    pub flags: QualityFlags,
}

/// Terminal reporting row: stock statistics for one (stratum, interval).
///
/// One row per stratum and reporting interval, plus an aggregate row with
/// stratum label `"ALL"`. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StratumSummary {
    /// Stratum label, or `"ALL"` for the aggregate row.
    pub stratum: String,
    /// Reporting depth interval (cm): (top, bottom).
    pub interval: (f64, f64),
    /// Stratum area (ha).
    pub area_ha: f64,
    /// Area-weighted mean stock (t/ha).
    pub mean_stock: f64,
    /// Standard error of the stratum mean stock (t/ha), when available.
    pub se_stock: Option<f64>,
    /// Conservative (lower-bound) stock (t/ha), when uncertainty is available.
    pub conservative_stock: Option<f64>,
    /// Total stock over the stratum area (t).
    pub total_stock: f64,
    /// Conservative total stock (t), when uncertainty is available.
    pub conservative_total: Option<f64>,
    /// Number of sampled cores in the stratum.
    pub n_samples: usize,
}

// ============================================================================
// Survey Boundary
// ============================================================================

/// A validated field survey: cores plus their depth samples.
///
/// Construction is the validation boundary: every record-level check runs
/// exactly once in [`SoilSurvey::new`], and downstream code relies on the
/// invariants established here.
#[derive(Debug, Clone)]
pub struct SoilSurvey {
    cores: Vec<Core>,
    samples: Vec<DepthSample>,
    /// Sample indices per core id, sorted by `depth_top`.
    by_core: HashMap<String, Vec<usize>>,
}

impl SoilSurvey {
    /// Validate and assemble a survey from ingested records.
    pub fn new(cores: Vec<Core>, samples: Vec<DepthSample>) -> Result<Self, StockError> {
        // Check 1: non-empty inputs
        if cores.is_empty() || samples.is_empty() {
            return Err(StockError::EmptyInput);
        }

        // Check 2: core records well-formed, ids unique
        let mut by_core: HashMap<String, Vec<usize>> = HashMap::new();
        for core in &cores {
            if core.id.is_empty() {
                return Err(StockError::InvalidRecord("core with empty id".into()));
            }
            if core.stratum.is_empty() {
                return Err(StockError::InvalidRecord(format!(
                    "core '{}' has an empty stratum label",
                    core.id
                )));
            }
            if !core.x.is_finite() || !core.y.is_finite() {
                return Err(StockError::InvalidRecord(format!(
                    "core '{}' has non-finite coordinates ({}, {})",
                    core.id, core.x, core.y
                )));
            }
            if by_core.insert(core.id.clone(), Vec::new()).is_some() {
                return Err(StockError::InvalidRecord(format!(
                    "duplicate core id '{}'",
                    core.id
                )));
            }
        }

        // Check 3: sample records well-formed and attached to known cores
        for (i, s) in samples.iter().enumerate() {
            let slot = by_core.get_mut(&s.core_id).ok_or_else(|| {
                StockError::InvalidRecord(format!(
                    "depth sample references unknown core '{}'",
                    s.core_id
                ))
            })?;
            if !s.depth_top.is_finite() || !s.depth_bottom.is_finite() || s.depth_top < 0.0 {
                return Err(StockError::InvalidRecord(format!(
                    "core '{}': invalid depth interval [{}, {}]",
                    s.core_id, s.depth_top, s.depth_bottom
                )));
            }
            if s.depth_bottom <= s.depth_top {
                return Err(StockError::InvalidRecord(format!(
                    "core '{}': depth_bottom {} must exceed depth_top {}",
                    s.core_id, s.depth_bottom, s.depth_top
                )));
            }
            if !s.concentration.is_finite() || s.concentration < 0.0 {
                return Err(StockError::InvalidRecord(format!(
                    "core '{}': invalid concentration {}",
                    s.core_id, s.concentration
                )));
            }
            if let Some(bd) = s.bulk_density {
                if !bd.is_finite() || bd <= 0.0 {
                    return Err(StockError::InvalidRecord(format!(
                        "core '{}': invalid bulk density {}",
                        s.core_id, bd
                    )));
                }
            }
            slot.push(i);
        }

        // Check 4: within each core, intervals sorted, non-overlapping, increasing
        for (core_id, indices) in by_core.iter_mut() {
            indices.sort_by(|&a, &b| {
                samples[a]
                    .depth_top
                    .partial_cmp(&samples[b].depth_top)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for pair in indices.windows(2) {
                let upper = &samples[pair[0]];
                let lower = &samples[pair[1]];
                if lower.depth_top < upper.depth_bottom {
                    return Err(StockError::InvalidRecord(format!(
                        "core '{core_id}': overlapping depth intervals [{}, {}] and [{}, {}]",
                        upper.depth_top, upper.depth_bottom, lower.depth_top, lower.depth_bottom
                    )));
                }
            }
        }

        Ok(Self {
            cores,
            samples,
            by_core,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// All cores, in ingestion order.
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// All depth samples, in ingestion order.
    pub fn samples(&self) -> &[DepthSample] {
        &self.samples
    }

    /// A core's depth samples, sorted by `depth_top`.
    pub fn samples_for(&self, core_id: &str) -> Vec<&DepthSample> {
        self.by_core
            .get(core_id)
            .map(|idx| idx.iter().map(|&i| &self.samples[i]).collect())
            .unwrap_or_default()
    }

    /// Look up a core by id.
    pub fn core(&self, core_id: &str) -> Option<&Core> {
        self.cores.iter().find(|c| c.id == core_id)
    }

    /// Distinct stratum labels, sorted.
    pub fn strata(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.cores.iter().map(|c| c.stratum.clone()).collect();
        labels.sort();
        labels.dedup();
        labels
    }

    /// Number of cores in a stratum.
    pub fn cores_in_stratum(&self, stratum: &str) -> usize {
        self.cores.iter().filter(|c| c.stratum == stratum).count()
    }
}
