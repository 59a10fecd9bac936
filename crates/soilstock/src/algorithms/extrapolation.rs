//! Extrapolation-risk mask (area of applicability).
//!
//! ## Purpose
//!
//! Ensemble predictions are only trustworthy where the covariate values
//! resemble the training distribution. This module computes a per-cell
//! dissimilarity index — the importance-weighted, standardized distance to
//! the nearest training sample, normalized by the mean pairwise training
//! distance — and flags cells whose index exceeds a data-derived threshold
//! as outside the area of reliable prediction.
//!
//! ## Design notes
//!
//! * **Standardization**: features are centered and scaled by the training
//!   mean and standard deviation before distances are measured.
//! * **Weights**: permutation importances weight the feature axes; when no
//!   importance is positive the axes are weighted equally.
//! * **Threshold**: Q3 + 1.5 x IQR of the training samples' own
//!   leave-one-out dissimilarities, so the cutoff adapts to the data.
//!
//! ## Invariants
//!
//! * Cells with missing covariates are never flagged (they are nodata in
//!   the prediction anyway).
//! * A cell coinciding with a training sample has dissimilarity 0.

// External dependencies
use ndarray::Array2;
use rayon::prelude::*;

// Internal dependencies
use crate::primitives::grid::CovariateStack;

// ============================================================================
// Result
// ============================================================================

/// The computed extrapolation mask and its threshold.
#[derive(Debug, Clone)]
pub struct ExtrapolationMask {
    /// True where the cell is outside the area of reliable prediction.
    pub mask: Array2<bool>,
    /// Dissimilarity threshold the mask was cut at.
    pub threshold: f64,
    /// Fraction of defined cells flagged.
    pub flagged_fraction: f64,
}

// ============================================================================
// Computation
// ============================================================================

/// Compute the extrapolation mask for one depth's trained ensemble.
///
/// `train` holds the row-major training covariate matrix; `importances`
/// weight the feature axes (non-positive importances fall back to equal
/// weights).
pub fn extrapolation_mask(
    train: &[f64],
    n_features: usize,
    importances: &[f64],
    stack: &CovariateStack,
) -> ExtrapolationMask {
    let n = train.len() / n_features;
    let rows = stack.rows();
    let cols = stack.cols();

    // Standardization parameters from the training distribution
    let mut means = vec![0.0_f64; n_features];
    let mut sds = vec![0.0_f64; n_features];
    for f in 0..n_features {
        let mut sum = 0.0;
        for i in 0..n {
            sum += train[i * n_features + f];
        }
        let mean = sum / n as f64;
        let mut sq = 0.0;
        for i in 0..n {
            let d = train[i * n_features + f] - mean;
            sq += d * d;
        }
        means[f] = mean;
        sds[f] = (sq / n as f64).sqrt().max(1e-12);
    }

    // Importance weights, normalized to sum 1
    let positive_sum: f64 = importances.iter().filter(|&&v| v > 0.0).sum();
    let weights: Vec<f64> = if positive_sum > 0.0 {
        importances
            .iter()
            .map(|&v| v.max(0.0) / positive_sum)
            .collect()
    } else {
        vec![1.0 / n_features as f64; n_features]
    };

    // Standardized, weighted training matrix
    let scaled: Vec<f64> = (0..n)
        .flat_map(|i| {
            let weights = &weights;
            let means = &means;
            let sds = &sds;
            (0..n_features).map(move |f| {
                weights[f].sqrt() * (train[i * n_features + f] - means[f]) / sds[f]
            })
        })
        .collect();

    // Mean pairwise training distance normalizes the index
    let mut pair_sum = 0.0;
    let mut pair_count = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            pair_sum += distance(&scaled, n_features, i, j);
            pair_count += 1;
        }
    }
    let mean_pairwise = if pair_count > 0 {
        (pair_sum / pair_count as f64).max(1e-12)
    } else {
        1.0
    };

    // Leave-one-out dissimilarities of the training points set the threshold
    let mut train_di: Vec<f64> = (0..n)
        .map(|i| {
            let mut min_d = f64::INFINITY;
            for j in 0..n {
                if j != i {
                    min_d = min_d.min(distance(&scaled, n_features, i, j));
                }
            }
            if min_d.is_finite() {
                min_d / mean_pairwise
            } else {
                0.0
            }
        })
        .collect();
    train_di.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = outlier_threshold(&train_di);

    // Per-cell dissimilarity over the prediction grid
    let flags: Vec<bool> = (0..rows)
        .into_par_iter()
        .flat_map_iter(|row| {
            let scaled = &scaled;
            let weights = &weights;
            let means = &means;
            let sds = &sds;
            (0..cols).map(move |col| {
                let Some(values) = stack.extract_cell(row, col) else {
                    return false;
                };
                let cell: Vec<f64> = (0..n_features)
                    .map(|f| weights[f].sqrt() * (values[f] - means[f]) / sds[f])
                    .collect();
                let mut min_d = f64::INFINITY;
                for i in 0..n {
                    let mut sq = 0.0;
                    for f in 0..n_features {
                        let d = cell[f] - scaled[i * n_features + f];
                        sq += d * d;
                    }
                    min_d = min_d.min(sq.sqrt());
                }
                min_d / mean_pairwise > threshold
            })
        })
        .collect();

    let mask = Array2::from_shape_vec((rows, cols), flags)
        .unwrap_or_else(|_| Array2::from_elem((rows, cols), false));

    let defined = (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .filter(|&(r, c)| stack.extract_cell(r, c).is_some())
        .count();
    let flagged = mask.iter().filter(|&&v| v).count();
    let flagged_fraction = if defined > 0 {
        flagged as f64 / defined as f64
    } else {
        0.0
    };

    ExtrapolationMask {
        mask,
        threshold,
        flagged_fraction,
    }
}

/// Euclidean distance between two rows of a flat matrix.
fn distance(data: &[f64], n_features: usize, i: usize, j: usize) -> f64 {
    let mut sq = 0.0;
    for f in 0..n_features {
        let d = data[i * n_features + f] - data[j * n_features + f];
        sq += d * d;
    }
    sq.sqrt()
}

/// Tukey upper fence over sorted values: Q3 + 1.5 x IQR.
fn outlier_threshold(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return f64::INFINITY;
    }
    let q1 = quantile(sorted, 0.25);
    let q3 = quantile(sorted, 0.75);
    q3 + 1.5 * (q3 - q1)
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}
