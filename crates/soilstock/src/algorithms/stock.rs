//! Carbon stock integration: concentration surfaces to areal stock.
//!
//! ## Purpose
//!
//! This module converts depth-indexed concentration surfaces into areal
//! stock layers for each reporting depth interval, propagates variance
//! through the vertical sum, and computes the conservative lower bound used
//! in regulatory reporting.
//!
//! Per layer and cell:
//!
//! ```text
//! stock = (concentration / 1000) * bulk_density * thickness * 100
//! ```
//!
//! with concentration in g/kg, bulk density in g/cm^3, thickness in cm, and
//! stock in t/ha.
//!
//! ## Design notes
//!
//! * **Layer boundaries**: the standard depths inside an interval partition
//!   it at the midpoints between consecutive depths, so each surface
//!   represents one contiguous slab.
//! * **Independence**: interval variance is the sum of per-layer variances.
//!   Depth layers are treated as uncorrelated; this is a documented
//!   simplification whose revision would change the regulatory meaning of
//!   the conservative bound.
//! * **Missing variance**: a member surface without variance degrades the
//!   whole layer to mean-only output with `uncertainty_unavailable` set;
//!   the conservative grid is omitted, never fabricated.
//! * **Totals**: profile totals sum means and variances across intervals
//!   and recompute the conservative bound from the summed mean and SE —
//!   summing per-interval conservative values would double-count the
//!   safety margin.
//!
//! ## Invariants
//!
//! * `conservative <= mean` and `conservative >= 0` wherever defined.
//! * A cell is defined in the output iff it is defined in every member
//!   surface and the bulk density grid.

// Internal dependencies
use crate::math::normal::z_score;
use crate::primitives::grid::{Grid, PredictionSurface, StockLayer};

// ============================================================================
// Unit Constants
// ============================================================================

/// Concentration divisor: g/kg to mass fraction.
const MASS_DENOMINATOR: f64 = 1000.0;

/// Scale from (fraction x g/cm^3 x cm) to t/ha.
const UNIT_SCALE: f64 = 100.0;

// ============================================================================
// Layer Thickness
// ============================================================================

/// Thickness each member depth represents inside a reporting interval.
///
/// Member depths partition the interval at midpoints between consecutive
/// depths; the first slab starts at the interval top, the last ends at the
/// interval bottom. Returns `(surface_index, thickness_cm)` per member.
pub fn layer_thicknesses(depths: &[f64], interval: (f64, f64)) -> Vec<(usize, f64)> {
    let (top, bottom) = interval;
    let members: Vec<(usize, f64)> = depths
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d >= top && d < bottom)
        .map(|(i, &d)| (i, d))
        .collect();

    if members.is_empty() {
        return Vec::new();
    }

    let m = members.len();
    (0..m)
        .map(|k| {
            let upper = if k == 0 {
                top
            } else {
                (members[k - 1].1 + members[k].1) / 2.0
            };
            let lower = if k == m - 1 {
                bottom
            } else {
                (members[k].1 + members[k + 1].1) / 2.0
            };
            (members[k].0, lower - upper)
        })
        .collect()
}

// ============================================================================
// Integration
// ============================================================================

/// Integrate one reporting interval from its member surfaces.
///
/// `surfaces` holds one surface per standard depth (parallel to `depths`);
/// `bulk_density` is the per-cell bulk density grid. Returns `None` when no
/// standard depth falls inside the interval (the validator rejects such
/// configurations up front).
pub fn integrate_interval(
    surfaces: &[PredictionSurface],
    depths: &[f64],
    interval: (f64, f64),
    bulk_density: &Grid,
    confidence_level: f64,
) -> Option<StockLayer> {
    let members = layer_thicknesses(depths, interval);
    if members.is_empty() {
        return None;
    }

    let template = &surfaces[members[0].0].mean;
    let (rows, cols) = (template.rows(), template.cols());
    let transform = template.transform;

    let uncertainty_unavailable = members
        .iter()
        .any(|&(idx, _)| surfaces[idx].variance.is_none());

    let mut mean = Grid::filled_nodata(rows, cols, transform);
    let mut variance = Grid::filled_nodata(rows, cols, transform);

    for row in 0..rows {
        for col in 0..cols {
            let bd = bulk_density.get(row, col);
            if !bd.is_finite() {
                continue;
            }

            let mut stock_sum = 0.0;
            let mut var_sum = 0.0;
            let mut defined = true;
            let mut var_defined = !uncertainty_unavailable;

            for &(idx, thickness) in &members {
                let surface = &surfaces[idx];
                let conc = surface.mean.get(row, col);
                if !conc.is_finite() {
                    defined = false;
                    break;
                }
                // t/ha contributed by this slab
                let factor = bd * thickness * UNIT_SCALE / MASS_DENOMINATOR;
                stock_sum += conc * factor;

                if var_defined {
                    match &surface.variance {
                        Some(var_grid) => {
                            let v = var_grid.get(row, col);
                            if v.is_finite() {
                                var_sum += factor * factor * v;
                            } else {
                                var_defined = false;
                            }
                        }
                        None => var_defined = false,
                    }
                }
            }

            if defined {
                mean.set(row, col, stock_sum);
                if var_defined {
                    variance.set(row, col, var_sum);
                }
            }
        }
    }

    let (se, conservative) = if uncertainty_unavailable {
        (None, None)
    } else {
        let z = z_score(confidence_level);
        let se = variance.map_defined(f64::sqrt);
        let mut conservative = Grid::filled_nodata(rows, cols, transform);
        for row in 0..rows {
            for col in 0..cols {
                let m = mean.get(row, col);
                let s = se.get(row, col);
                if m.is_finite() && s.is_finite() {
                    conservative.set(row, col, (m - z * s).max(0.0));
                }
            }
        }
        (Some(se), Some(conservative))
    };

    Some(StockLayer {
        interval,
        mean,
        se,
        conservative,
        uncertainty_unavailable,
    })
}

/// Sum interval layers into the full-profile total layer.
///
/// Means and variances sum linearly; the conservative bound is recomputed
/// from the summed mean and SE rather than summed from per-interval
/// conservative values.
pub fn total_layer(layers: &[StockLayer], confidence_level: f64) -> Option<StockLayer> {
    if layers.is_empty() {
        return None;
    }

    let top = layers
        .iter()
        .map(|l| l.interval.0)
        .fold(f64::INFINITY, f64::min);
    let bottom = layers
        .iter()
        .map(|l| l.interval.1)
        .fold(f64::NEG_INFINITY, f64::max);

    let template = &layers[0].mean;
    let (rows, cols) = (template.rows(), template.cols());
    let transform = template.transform;

    let uncertainty_unavailable = layers.iter().any(|l| l.uncertainty_unavailable);

    let mut mean = Grid::filled_nodata(rows, cols, transform);
    let mut variance = Grid::filled_nodata(rows, cols, transform);

    for row in 0..rows {
        for col in 0..cols {
            let mut sum = 0.0;
            let mut var_sum = 0.0;
            let mut defined = true;
            let mut var_defined = !uncertainty_unavailable;

            for layer in layers {
                let m = layer.mean.get(row, col);
                if !m.is_finite() {
                    defined = false;
                    break;
                }
                sum += m;
                if var_defined {
                    match &layer.se {
                        Some(se_grid) => {
                            let s = se_grid.get(row, col);
                            if s.is_finite() {
                                var_sum += s * s;
                            } else {
                                var_defined = false;
                            }
                        }
                        None => var_defined = false,
                    }
                }
            }

            if defined {
                mean.set(row, col, sum);
                if var_defined {
                    variance.set(row, col, var_sum);
                }
            }
        }
    }

    let (se, conservative) = if uncertainty_unavailable {
        (None, None)
    } else {
        let z = z_score(confidence_level);
        let se = variance.map_defined(f64::sqrt);
        let mut conservative = Grid::filled_nodata(rows, cols, transform);
        for row in 0..rows {
            for col in 0..cols {
                let m = mean.get(row, col);
                let s = se.get(row, col);
                if m.is_finite() && s.is_finite() {
                    conservative.set(row, col, (m - z * s).max(0.0));
                }
            }
        }
        (Some(se), Some(conservative))
    };

    Some(StockLayer {
        interval: (top, bottom),
        mean,
        se,
        conservative,
        uncertainty_unavailable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::grid::GeoTransform;

    fn surface(depth: f64, value: f64, variance: Option<f64>) -> PredictionSurface {
        let transform = GeoTransform::new(0.0, 20.0, 10.0);
        let mut mean = Grid::filled_nodata(2, 2, transform);
        for r in 0..2 {
            for c in 0..2 {
                mean.set(r, c, value);
            }
        }
        let variance = variance.map(|v| {
            let mut grid = Grid::filled_nodata(2, 2, transform);
            for r in 0..2 {
                for c in 0..2 {
                    grid.set(r, c, v);
                }
            }
            grid
        });
        PredictionSurface {
            depth,
            mean,
            variance,
            extrapolation_mask: None,
            crs: "EPSG:32633".into(),
        }
    }

    fn unit_bulk_density() -> Grid {
        let transform = GeoTransform::new(0.0, 20.0, 10.0);
        let mut grid = Grid::filled_nodata(2, 2, transform);
        for r in 0..2 {
            for c in 0..2 {
                grid.set(r, c, 1.0);
            }
        }
        grid
    }

    #[test]
    fn single_depth_scenario_matches_hand_arithmetic() {
        // 50 g/kg over 0-15 cm at bulk density 1.0 => 75 t/ha
        let surfaces = vec![surface(7.5, 50.0, Some(4.0))];
        let layer = integrate_interval(&surfaces, &[7.5], (0.0, 15.0), &unit_bulk_density(), 0.95)
            .unwrap();
        assert!((layer.mean.get(0, 0) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn conservative_bound_uses_z_score() {
        // Engineered so interval stock has mean 100, se 10:
        // factor = 1.0 * 10 cm * 0.1 = 1.0, conc 100 g/kg, var 100
        let surfaces = vec![surface(5.0, 100.0, Some(100.0))];
        let layer = integrate_interval(&surfaces, &[5.0], (0.0, 10.0), &unit_bulk_density(), 0.95)
            .unwrap();
        assert!((layer.mean.get(0, 0) - 100.0).abs() < 1e-9);
        let conservative = layer.conservative.as_ref().unwrap().get(0, 0);
        assert!((conservative - 80.4).abs() < 1e-6, "{conservative}");
    }

    #[test]
    fn conservative_never_exceeds_mean_and_is_nonnegative() {
        let surfaces = vec![surface(5.0, 2.0, Some(400.0))];
        let layer = integrate_interval(&surfaces, &[5.0], (0.0, 10.0), &unit_bulk_density(), 0.95)
            .unwrap();
        let mean = layer.mean.get(0, 0);
        let conservative = layer.conservative.as_ref().unwrap().get(0, 0);
        assert!(conservative <= mean);
        assert!(conservative >= 0.0);
        // Huge variance floors at zero
        assert_eq!(conservative, 0.0);
    }

    #[test]
    fn missing_variance_degrades_to_mean_only() {
        let surfaces = vec![surface(5.0, 50.0, None), surface(15.0, 30.0, Some(1.0))];
        let layer = integrate_interval(
            &surfaces,
            &[5.0, 15.0],
            (0.0, 20.0),
            &unit_bulk_density(),
            0.95,
        )
        .unwrap();
        assert!(layer.uncertainty_unavailable);
        assert!(layer.se.is_none());
        assert!(layer.conservative.is_none());
        assert!(layer.mean.get(0, 0).is_finite());
    }

    #[test]
    fn variances_sum_across_member_depths() {
        // Two 10 cm slabs, each factor 1.0, variances 9 and 16 => se 5
        let surfaces = vec![surface(5.0, 10.0, Some(9.0)), surface(15.0, 10.0, Some(16.0))];
        let layer = integrate_interval(
            &surfaces,
            &[5.0, 15.0],
            (0.0, 20.0),
            &unit_bulk_density(),
            0.95,
        )
        .unwrap();
        let se = layer.se.as_ref().unwrap().get(0, 0);
        assert!((se - 5.0).abs() < 1e-9, "se = {se}");
    }

    #[test]
    fn total_recomputes_conservative_from_summed_se() {
        let surfaces = vec![surface(5.0, 100.0, Some(100.0)), surface(15.0, 100.0, Some(100.0))];
        let layer_a =
            integrate_interval(&surfaces, &[5.0, 15.0], (0.0, 10.0), &unit_bulk_density(), 0.95)
                .unwrap();
        let layer_b =
            integrate_interval(&surfaces, &[5.0, 15.0], (10.0, 20.0), &unit_bulk_density(), 0.95)
                .unwrap();
        let total = total_layer(&[layer_a.clone(), layer_b.clone()], 0.95).unwrap();

        let total_mean = total.mean.get(0, 0);
        assert!((total_mean - 200.0).abs() < 1e-9);

        // Conservative from summed variance (se = sqrt(200) ~ 14.142),
        // strictly greater than the sum of per-interval conservatives.
        let total_cons = total.conservative.as_ref().unwrap().get(0, 0);
        let summed_cons = layer_a.conservative.as_ref().unwrap().get(0, 0)
            + layer_b.conservative.as_ref().unwrap().get(0, 0);
        assert!(total_cons > summed_cons);
        assert!((total_cons - (200.0 - 1.96 * 200.0_f64.sqrt())).abs() < 1e-6);
    }
}
