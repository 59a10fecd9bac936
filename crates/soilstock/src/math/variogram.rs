//! Empirical semivariograms and variogram model fitting.
//!
//! ## Purpose
//!
//! This module estimates spatial autocorrelation for one (stratum, depth)
//! unit: it bins squared pairwise differences into an empirical
//! semivariogram, fits candidate bounded models (spherical, exponential,
//! gaussian) by weighted grid search, and exposes the heuristic fallback
//! used when no candidate converges.
//!
//! ## Design notes
//!
//! * **Ordered strategies**: each candidate kind is fitted independently and
//!   returns success or a failure reason; the best-fitting success wins and
//!   every attempt is reported to the caller for the diagnostics ledger.
//! * **Weighting**: the fit minimizes pair-count-weighted sum of squared
//!   errors, so well-populated lags dominate.
//! * **Practical ranges**: exponential and gaussian models use the
//!   practical-range convention (reaching ~95% of the sill at `range`).
//!
//! ## Invariants
//!
//! * `evaluate(0) == 0` (the nugget applies only for h > 0).
//! * `nugget <= sill` for every fitted or heuristic model.
//! * `evaluate` is non-decreasing in h for all three kinds.

// External dependencies
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

// ============================================================================
// Model Kinds
// ============================================================================

/// Bounded variogram model families considered during fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariogramKind {
    /// Bounded correlation reaching the sill exactly at the range.
    Spherical,
    /// Asymptotic approach to the sill (practical range).
    Exponential,
    /// Very smooth near-origin behaviour (practical range).
    Gaussian,
}

impl VariogramKind {
    /// All candidate kinds, in fitting order.
    pub const CANDIDATES: [VariogramKind; 3] = [
        VariogramKind::Spherical,
        VariogramKind::Exponential,
        VariogramKind::Gaussian,
    ];
}

impl Display for VariogramKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spherical => write!(f, "spherical"),
            Self::Exponential => write!(f, "exponential"),
            Self::Gaussian => write!(f, "gaussian"),
        }
    }
}

// ============================================================================
// Fitted Model
// ============================================================================

/// A fitted (or fallback) variogram model for one modeling unit.
///
/// Fit once per (stratum, depth) and read-only afterward; the kriging
/// predictor reuses it for every cell of that unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariogramModel {
    /// Model family.
    pub kind: VariogramKind,
    /// Semivariance at vanishing separation (h -> 0+).
    pub nugget: f64,
    /// Total sill (nugget + partial sill).
    pub sill: f64,
    /// Range (or practical range) in CRS distance units.
    pub range: f64,
    /// Pair-count-weighted sum of squared fitting errors.
    pub fit_sse: f64,
    /// True when the model came from the heuristic fallback rather than a
    /// converged fit.
    pub heuristic: bool,
}

impl VariogramModel {
    /// Semivariance at separation distance `h`.
    pub fn evaluate(&self, h: f64) -> f64 {
        if h <= 0.0 {
            return 0.0;
        }
        let psill = self.sill - self.nugget;
        match self.kind {
            VariogramKind::Spherical => {
                if h >= self.range {
                    self.sill
                } else {
                    let r = h / self.range;
                    self.nugget + psill * (1.5 * r - 0.5 * r * r * r)
                }
            }
            VariogramKind::Exponential => {
                self.nugget + psill * (1.0 - (-3.0 * h / self.range).exp())
            }
            VariogramKind::Gaussian => {
                let r = h / self.range;
                self.nugget + psill * (1.0 - (-3.0 * r * r).exp())
            }
        }
    }
}

// ============================================================================
// Empirical Variogram
// ============================================================================

/// Distance-binned empirical semivariogram.
#[derive(Debug, Clone, PartialEq)]
pub struct EmpiricalVariogram {
    /// Lag bin centers (non-empty bins only).
    pub lags: Vec<f64>,
    /// Mean semivariance per bin.
    pub semivariances: Vec<f64>,
    /// Number of point pairs per bin.
    pub pair_counts: Vec<usize>,
    /// Largest pair distance considered.
    pub max_distance: f64,
}

/// Compute the empirical semivariogram of `(x, y, value)` points.
///
/// Pairs separated by more than `cutoff` are ignored. Returns `None` when
/// fewer than two points or no pairs fall inside the cutoff.
pub fn empirical_variogram(
    points: &[(f64, f64, f64)],
    lag_width: f64,
    cutoff: f64,
) -> Option<EmpiricalVariogram> {
    let n = points.len();
    if n < 2 || lag_width <= 0.0 || cutoff <= 0.0 {
        return None;
    }

    let n_bins = (cutoff / lag_width).ceil() as usize;
    let mut sums = vec![0.0_f64; n_bins];
    let mut counts = vec![0usize; n_bins];
    let mut max_distance = 0.0_f64;

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = points[i].0 - points[j].0;
            let dy = points[i].1 - points[j].1;
            let h = (dx * dx + dy * dy).sqrt();
            if h <= 0.0 || h > cutoff {
                continue;
            }
            let bin = ((h / lag_width) as usize).min(n_bins - 1);
            let dv = points[i].2 - points[j].2;
            sums[bin] += 0.5 * dv * dv;
            counts[bin] += 1;
            if h > max_distance {
                max_distance = h;
            }
        }
    }

    let mut lags = Vec::new();
    let mut semivariances = Vec::new();
    let mut pair_counts = Vec::new();
    for bin in 0..n_bins {
        if counts[bin] > 0 {
            lags.push((bin as f64 + 0.5) * lag_width);
            semivariances.push(sums[bin] / counts[bin] as f64);
            pair_counts.push(counts[bin]);
        }
    }

    if lags.is_empty() {
        return None;
    }

    Some(EmpiricalVariogram {
        lags,
        semivariances,
        pair_counts,
        max_distance,
    })
}

// ============================================================================
// Model Fitting
// ============================================================================

/// Minimum number of non-empty lag bins required for a parametric fit.
const MIN_FIT_BINS: usize = 3;

/// Fit one candidate kind by pair-count-weighted parameter grid search.
///
/// Returns the failure reason when the empirical variogram cannot support a
/// fit (too few bins, or no spatial variance to model).
pub fn fit_kind(emp: &EmpiricalVariogram, kind: VariogramKind) -> Result<VariogramModel, String> {
    if emp.lags.len() < MIN_FIT_BINS {
        return Err(format!(
            "{} non-empty lag bins, need at least {MIN_FIT_BINS}",
            emp.lags.len()
        ));
    }

    let max_semi = emp
        .semivariances
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if !(max_semi.is_finite() && max_semi > 0.0) {
        return Err("no spatial variance to model".into());
    }
    let max_lag = emp.lags[emp.lags.len() - 1];

    const NUGGET_FRACTIONS: [f64; 6] = [0.0, 0.05, 0.1, 0.2, 0.3, 0.5];
    const SILL_FRACTIONS: [f64; 7] = [0.6, 0.8, 0.9, 1.0, 1.05, 1.1, 1.2];
    const RANGE_STEPS: usize = 12;

    let mut best: Option<VariogramModel> = None;

    for &nf in &NUGGET_FRACTIONS {
        for &sf in &SILL_FRACTIONS {
            let nugget = nf * max_semi;
            let sill = sf * max_semi;
            if sill <= nugget {
                continue;
            }
            for step in 1..=RANGE_STEPS {
                let range = max_lag * 1.2 * step as f64 / RANGE_STEPS as f64;
                let candidate = VariogramModel {
                    kind,
                    nugget,
                    sill,
                    range,
                    fit_sse: 0.0,
                    heuristic: false,
                };
                let sse = weighted_sse(emp, &candidate);
                if !sse.is_finite() {
                    continue;
                }
                if best.as_ref().map_or(true, |b| sse < b.fit_sse) {
                    best = Some(VariogramModel {
                        fit_sse: sse,
                        ..candidate
                    });
                }
            }
        }
    }

    best.ok_or_else(|| "no parameter combination produced a finite fit".into())
}

/// Fit all candidate kinds and select the lowest weighted SSE.
///
/// Returns the winning model (if any candidate converged) plus every
/// attempt's outcome for the diagnostics ledger.
pub fn fit_best(
    emp: &EmpiricalVariogram,
) -> (Option<VariogramModel>, Vec<(VariogramKind, Result<f64, String>)>) {
    let mut attempts = Vec::with_capacity(VariogramKind::CANDIDATES.len());
    let mut best: Option<VariogramModel> = None;

    for kind in VariogramKind::CANDIDATES {
        match fit_kind(emp, kind) {
            Ok(model) => {
                attempts.push((kind, Ok(model.fit_sse)));
                if best.as_ref().map_or(true, |b| model.fit_sse < b.fit_sse) {
                    best = Some(model);
                }
            }
            Err(reason) => attempts.push((kind, Err(reason))),
        }
    }

    (best, attempts)
}

/// Heuristic spherical fallback used when every candidate fails.
///
/// Parameters follow the documented convention: sill = 0.8 x max empirical
/// semivariance, range = 1/3 max distance, nugget = 0.1 x max semivariance.
pub fn heuristic_model(emp: &EmpiricalVariogram) -> VariogramModel {
    let max_semi = emp
        .semivariances
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max)
        .max(f64::MIN_POSITIVE);
    VariogramModel {
        kind: VariogramKind::Spherical,
        nugget: 0.1 * max_semi,
        sill: 0.8 * max_semi,
        range: (emp.max_distance / 3.0).max(f64::MIN_POSITIVE),
        fit_sse: f64::NAN,
        heuristic: true,
    }
}

fn weighted_sse(emp: &EmpiricalVariogram, model: &VariogramModel) -> f64 {
    emp.lags
        .iter()
        .zip(emp.semivariances.iter())
        .zip(emp.pair_counts.iter())
        .map(|((&lag, &semi), &count)| {
            let err = model.evaluate(lag) - semi;
            count as f64 * err * err
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_points(n: usize) -> Vec<(f64, f64, f64)> {
        // Deterministic pseudo-random field with spatial trend
        let mut points = Vec::with_capacity(n);
        let mut state = 42u64;
        for _ in 0..n {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = (state >> 33) as f64 / (1u64 << 31) as f64 * 100.0;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let y = (state >> 33) as f64 / (1u64 << 31) as f64 * 100.0;
            let value = 0.4 * x + 0.2 * y + ((x + y) / 25.0).sin() * 5.0;
            points.push((x, y, value));
        }
        points
    }

    #[test]
    fn semivariance_is_zero_at_origin() {
        let model = VariogramModel {
            kind: VariogramKind::Spherical,
            nugget: 1.0,
            sill: 5.0,
            range: 50.0,
            fit_sse: 0.0,
            heuristic: false,
        };
        assert_eq!(model.evaluate(0.0), 0.0);
        assert!(model.evaluate(1e-9) > 0.0);
        assert!((model.evaluate(50.0) - 5.0).abs() < 1e-12);
        assert!((model.evaluate(80.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn all_kinds_are_monotonic() {
        for kind in VariogramKind::CANDIDATES {
            let model = VariogramModel {
                kind,
                nugget: 0.5,
                sill: 4.0,
                range: 30.0,
                fit_sse: 0.0,
                heuristic: false,
            };
            let mut prev = 0.0;
            for step in 1..=60 {
                let gamma = model.evaluate(step as f64);
                assert!(gamma >= prev - 1e-12, "{kind} not monotone at h={step}");
                prev = gamma;
            }
        }
    }

    #[test]
    fn empirical_variogram_bins_pairs() {
        let points = synthetic_points(40);
        let emp = empirical_variogram(&points, 10.0, 80.0).unwrap();
        assert!(!emp.lags.is_empty());
        assert_eq!(emp.lags.len(), emp.semivariances.len());
        assert_eq!(emp.lags.len(), emp.pair_counts.len());
        assert!(emp.semivariances.iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn fit_best_converges_on_structured_field() {
        let points = synthetic_points(60);
        let emp = empirical_variogram(&points, 8.0, 90.0).unwrap();
        let (best, attempts) = fit_best(&emp);
        let model = best.expect("structured field should fit");
        assert!(!model.heuristic);
        assert!(model.sill >= model.nugget);
        assert_eq!(attempts.len(), 3);
    }

    #[test]
    fn too_few_bins_reports_reason() {
        let points = vec![(0.0, 0.0, 1.0), (1.0, 0.0, 2.0)];
        let emp = empirical_variogram(&points, 5.0, 10.0).unwrap();
        let result = fit_kind(&emp, VariogramKind::Spherical);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("lag bins"));
    }

    #[test]
    fn heuristic_model_is_flagged() {
        let points = vec![(0.0, 0.0, 1.0), (10.0, 0.0, 2.0), (0.0, 10.0, 3.0)];
        let emp = empirical_variogram(&points, 5.0, 20.0).unwrap();
        let model = heuristic_model(&emp);
        assert!(model.heuristic);
        assert!(model.nugget <= model.sill);
        assert!(model.range > 0.0);
    }
}
