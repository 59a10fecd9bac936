//! Ordinary kriging prediction with estimation variance.
//!
//! ## Purpose
//!
//! This module predicts a (stratum, depth) unit's concentration surface
//! from its harmonized point values and fitted variogram model. Ordinary
//! kriging gives the best linear unbiased prediction plus a per-cell
//! estimation variance, which downstream stages propagate into the
//! conservative stock bound.
//!
//! The kriging system for the k selected neighbours:
//!
//! ```text
//! [g(x1,x1) ... g(x1,xk) 1] [w1]   [g(x1,x0)]
//! [   ...       ...      .] [..] = [   ...   ]
//! [g(xk,x1) ... g(xk,xk) 1] [wk]   [g(xk,x0)]
//! [   1     ...    1     0] [mu]   [    1    ]
//! ```
//!
//! where `g` is the fitted semivariance and `mu` the Lagrange multiplier
//! enforcing unbiasedness (sum of weights = 1).
//!
//! ## Design notes
//!
//! * **Neighbour subsetting**: each target uses its nearest
//!   `max_neighbors` points; the full-system cost never depends on grid
//!   size.
//! * **Degenerate targets**: a target within snap distance of a sample
//!   returns that sample's value with zero variance.
//! * **Singular systems**: fall back to inverse-distance weighting for the
//!   mean with undefined (NaN) variance at that cell; the engine counts
//!   these cells for the ledger.
//! * **Parallelism**: grid cells are independent; prediction runs on the
//!   rayon pool with deterministic output ordering.
//!
//! ## Invariants
//!
//! * Reported variance is >= 0 at every defined cell (clamped after the
//!   Lagrange form, which can go marginally negative in round-off).

// External dependencies
use rayon::prelude::*;

// Internal dependencies
use crate::math::linalg::solve_dense;
use crate::math::variogram::VariogramModel;
use crate::primitives::grid::GeoTransform;

// ============================================================================
// Parameters
// ============================================================================

/// Distance below which a target snaps to a sample value.
const SNAP_DISTANCE: f64 = 1e-9;

/// Default neighbour cap per kriging system.
pub const DEFAULT_MAX_NEIGHBORS: usize = 16;

/// One predicted cell: grid position, mean, and variance (NaN when the
/// system was singular and the IDW fallback produced the mean).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KrigedCell {
    /// Grid row.
    pub row: usize,
    /// Grid column.
    pub col: usize,
    /// Predicted mean.
    pub mean: f64,
    /// Estimation variance; NaN marks an IDW-fallback cell.
    pub variance: f64,
}

// ============================================================================
// Prediction
// ============================================================================

/// Predict mean and variance at one target location.
///
/// Returns `(mean, variance)`; variance is NaN when the kriging system was
/// singular and the inverse-distance fallback supplied the mean, and the
/// whole result is `(NaN, NaN)` when no sample is usable.
pub fn krige_at(
    points: &[(f64, f64, f64)],
    model: &VariogramModel,
    x0: f64,
    y0: f64,
    max_neighbors: usize,
) -> (f64, f64) {
    let n = points.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }

    // Nearest neighbours by squared distance
    let mut dists: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let dx = p.0 - x0;
            let dy = p.1 - y0;
            (i, (dx * dx + dy * dy).sqrt())
        })
        .collect();
    dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let k = dists.len().min(max_neighbors.max(1));
    let neighbors = &dists[..k];

    // Exact hit on a sample
    if neighbors[0].1 < SNAP_DISTANCE {
        return (points[neighbors[0].0].2, 0.0);
    }

    // Assemble the (k + 1) x (k + 1) Lagrange system
    let m = k + 1;
    let mut mat = vec![0.0_f64; m * m];
    let mut rhs = vec![0.0_f64; m];

    for i in 0..k {
        let pi = &points[neighbors[i].0];
        for j in (i + 1)..k {
            let pj = &points[neighbors[j].0];
            let dx = pi.0 - pj.0;
            let dy = pi.1 - pj.1;
            let gamma = model.evaluate((dx * dx + dy * dy).sqrt());
            mat[i * m + j] = gamma;
            mat[j * m + i] = gamma;
        }
        mat[i * m + k] = 1.0;
        mat[k * m + i] = 1.0;
        rhs[i] = model.evaluate(neighbors[i].1);
    }
    rhs[k] = 1.0;

    match solve_dense(m, &mut mat, &mut rhs) {
        Ok(weights) => {
            let mut mean = 0.0;
            for i in 0..k {
                mean += weights[i] * points[neighbors[i].0].2;
            }
            // sigma^2 = sum w_i g(x_i, x0) + mu
            let mut variance = weights[k];
            for i in 0..k {
                variance += weights[i] * model.evaluate(neighbors[i].1);
            }
            (mean, variance.max(0.0))
        }
        Err(_) => {
            // Inverse-distance fallback; variance is unknowable here.
            let mut sum_w = 0.0;
            let mut sum_wz = 0.0;
            for &(idx, dist) in neighbors {
                let w = 1.0 / (dist * dist);
                sum_w += w;
                sum_wz += w * points[idx].2;
            }
            if sum_w > 0.0 {
                (sum_wz / sum_w, f64::NAN)
            } else {
                (f64::NAN, f64::NAN)
            }
        }
    }
}

/// Predict a set of grid cells in parallel.
///
/// `cells` lists the (row, col) targets; predictions are returned in the
/// same order, so parallel and sequential execution are indistinguishable.
pub fn krige_cells(
    points: &[(f64, f64, f64)],
    model: &VariogramModel,
    cells: &[(usize, usize)],
    transform: &GeoTransform,
    max_neighbors: usize,
) -> Vec<KrigedCell> {
    cells
        .par_iter()
        .map(|&(row, col)| {
            let (x, y) = transform.cell_center(row, col);
            let (mean, variance) = krige_at(points, model, x, y, max_neighbors);
            KrigedCell {
                row,
                col,
                mean,
                variance,
            }
        })
        .collect()
}
