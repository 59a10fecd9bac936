//! Stratum aggregation: stock rasters to summary rows.
//!
//! ## Purpose
//!
//! This module reduces pixel-level stock layers to the terminal reporting
//! table: one [`StratumSummary`] row per (stratum, reporting interval),
//! plus an `"ALL"` row aggregating across strata. It is also the last
//! place the conservative-bound invariants are enforced.
//!
//! ## Design notes
//!
//! * **Area**: stratum area is defined cell count x cell area; cell size is
//!   taken to be in meters, so area is reported in hectares.
//! * **Stratum SE**: the standard error of the stratum mean stock is
//!   sqrt(sum of pixel variances) / n under the pixel-independence
//!   assumption shared with the vertical integration.
//! * **Conservative**: recomputed per row from the stratum mean and SE,
//!   never averaged from pixel-level conservative values.
//! * **No mask**: without a stratum mask only the `"ALL"` row is emitted,
//!   computed over every defined cell.
//!
//! ## Invariants
//!
//! * `conservative_stock <= mean_stock` and `conservative_total <=
//!   total_stock` for every emitted row; a violation is an internal error,
//!   not something to clamp away.
//! * Strata with no defined cells produce no row.

// Internal dependencies
use crate::math::normal::z_score;
use crate::primitives::errors::StockError;
use crate::primitives::grid::{StockLayer, StratumMask};
use crate::primitives::records::{SoilSurvey, StratumSummary};

/// Label of the cross-strata aggregate row.
pub const ALL_STRATA: &str = "ALL";

/// Tolerance for the final conservative-bound invariant check.
const INVARIANT_EPS: f64 = 1e-9;

// ============================================================================
// Accumulation
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct CellAccumulator {
    n_cells: usize,
    sum_mean: f64,
    sum_variance: f64,
    variance_defined: bool,
}

impl CellAccumulator {
    fn new(with_variance: bool) -> Self {
        Self {
            variance_defined: with_variance,
            ..Self::default()
        }
    }

    fn push(&mut self, mean: f64, variance: Option<f64>) {
        self.n_cells += 1;
        self.sum_mean += mean;
        match variance {
            Some(v) if v.is_finite() => self.sum_variance += v,
            _ => self.variance_defined = false,
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Reduce one stock layer to its per-stratum and `"ALL"` summary rows.
///
/// `cell_size` is the layer's cell edge length in meters. Returns rows in
/// stratum order with `"ALL"` last.
pub fn aggregate_layer(
    layer: &StockLayer,
    mask: Option<&StratumMask>,
    survey: &SoilSurvey,
    confidence_level: f64,
) -> Result<Vec<StratumSummary>, StockError> {
    let rows = layer.mean.rows();
    let cols = layer.mean.cols();
    let cell_size = layer.mean.transform.cell_size;
    let cell_area_ha = cell_size * cell_size / 10_000.0;
    let with_variance = !layer.uncertainty_unavailable;

    // Accumulate per stratum plus the ALL bucket.
    let labels: Vec<String> = match mask {
        Some(m) => m.labels.clone(),
        None => Vec::new(),
    };
    let mut per_stratum: Vec<CellAccumulator> =
        vec![CellAccumulator::new(with_variance); labels.len()];
    let mut all = CellAccumulator::new(with_variance);

    for row in 0..rows {
        for col in 0..cols {
            let mean = layer.mean.get(row, col);
            if !mean.is_finite() {
                continue;
            }
            let variance = layer
                .se
                .as_ref()
                .map(|se| {
                    let s = se.get(row, col);
                    s * s
                })
                .filter(|v| v.is_finite());

            all.push(mean, variance);

            if let Some(m) = mask {
                let idx = *m.index.get((row, col)).unwrap_or(&-1);
                if idx >= 0 {
                    per_stratum[idx as usize].push(mean, variance);
                }
            }
        }
    }

    let z = z_score(confidence_level);
    let mut summaries = Vec::new();

    for (label, acc) in labels.iter().zip(per_stratum.iter()) {
        if acc.n_cells == 0 {
            continue;
        }
        summaries.push(summarize(
            label,
            layer.interval,
            acc,
            cell_area_ha,
            survey.cores_in_stratum(label),
            z,
        )?);
    }

    if all.n_cells > 0 {
        summaries.push(summarize(
            ALL_STRATA,
            layer.interval,
            &all,
            cell_area_ha,
            survey.cores().len(),
            z,
        )?);
    }

    Ok(summaries)
}

/// Build one summary row and enforce the conservative-bound invariants.
fn summarize(
    stratum: &str,
    interval: (f64, f64),
    acc: &CellAccumulator,
    cell_area_ha: f64,
    n_samples: usize,
    z: f64,
) -> Result<StratumSummary, StockError> {
    let n = acc.n_cells as f64;
    let area_ha = n * cell_area_ha;
    let mean_stock = acc.sum_mean / n;

    let (se_stock, conservative_stock, conservative_total) = if acc.variance_defined {
        // SE of the stratum mean under pixel independence
        let se = acc.sum_variance.sqrt() / n;
        let conservative = (mean_stock - z * se).max(0.0);
        (Some(se), Some(conservative), Some(conservative * area_ha))
    } else {
        (None, None, None)
    };

    let total_stock = mean_stock * area_ha;

    if let Some(cons) = conservative_stock {
        if cons > mean_stock + INVARIANT_EPS {
            return Err(StockError::InvariantViolation(format!(
                "stratum '{stratum}': conservative {cons} exceeds mean {mean_stock}"
            )));
        }
    }
    if let (Some(cons_total), total) = (conservative_total, total_stock) {
        if cons_total > total + INVARIANT_EPS {
            return Err(StockError::InvariantViolation(format!(
                "stratum '{stratum}': conservative total {cons_total} exceeds total {total}"
            )));
        }
    }

    Ok(StratumSummary {
        stratum: stratum.to_string(),
        interval,
        area_ha,
        mean_stock,
        se_stock,
        conservative_stock,
        total_stock,
        conservative_total,
        n_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::grid::{GeoTransform, Grid};
    use crate::primitives::records::{Core, DepthSample};
    use ndarray::Array2;

    fn survey() -> SoilSurvey {
        let cores = vec![
            Core {
                id: "a".into(),
                x: 5.0,
                y: 5.0,
                stratum: "forest".into(),
                scenario: None,
            },
            Core {
                id: "b".into(),
                x: 15.0,
                y: 5.0,
                stratum: "meadow".into(),
                scenario: None,
            },
        ];
        let samples = vec![
            DepthSample {
                core_id: "a".into(),
                depth_top: 0.0,
                depth_bottom: 15.0,
                concentration: 40.0,
                bulk_density: None,
            },
            DepthSample {
                core_id: "b".into(),
                depth_top: 0.0,
                depth_bottom: 15.0,
                concentration: 20.0,
                bulk_density: None,
            },
        ];
        SoilSurvey::new(cores, samples).unwrap()
    }

    fn layer_with(mean_left: f64, mean_right: f64, variance: Option<f64>) -> StockLayer {
        // 2 x 2 grid, 100 m cells: left column and right column differ
        let transform = GeoTransform::new(0.0, 200.0, 100.0);
        let mut mean = Grid::filled_nodata(2, 2, transform);
        mean.set(0, 0, mean_left);
        mean.set(1, 0, mean_left);
        mean.set(0, 1, mean_right);
        mean.set(1, 1, mean_right);
        let se = variance.map(|v| {
            let mut g = Grid::filled_nodata(2, 2, transform);
            for r in 0..2 {
                for c in 0..2 {
                    g.set(r, c, v.sqrt());
                }
            }
            g
        });
        StockLayer {
            interval: (0.0, 15.0),
            mean,
            se: se.clone(),
            conservative: se.clone(),
            uncertainty_unavailable: variance.is_none(),
        }
    }

    fn two_strata_mask() -> StratumMask {
        // Left column forest, right column meadow
        let index = Array2::from_shape_fn((2, 2), |(_, c)| if c == 0 { 0 } else { 1 });
        StratumMask::new(
            vec!["forest".into(), "meadow".into()],
            index,
            GeoTransform::new(0.0, 200.0, 100.0),
            "EPSG:32633".into(),
        )
        .unwrap()
    }

    #[test]
    fn emits_one_row_per_stratum_plus_all() {
        let layer = layer_with(60.0, 30.0, Some(25.0));
        let rows = aggregate_layer(&layer, Some(&two_strata_mask()), &survey(), 0.95).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].stratum, "forest");
        assert_eq!(rows[1].stratum, "meadow");
        assert_eq!(rows[2].stratum, ALL_STRATA);

        // 2 cells of 1 ha each per stratum
        assert!((rows[0].area_ha - 2.0).abs() < 1e-12);
        assert!((rows[0].mean_stock - 60.0).abs() < 1e-12);
        assert!((rows[2].mean_stock - 45.0).abs() < 1e-12);
        assert_eq!(rows[0].n_samples, 1);
        assert_eq!(rows[2].n_samples, 2);
    }

    #[test]
    fn conservative_is_bounded_by_mean_everywhere() {
        let layer = layer_with(60.0, 30.0, Some(100.0));
        let rows = aggregate_layer(&layer, Some(&two_strata_mask()), &survey(), 0.95).unwrap();
        for row in rows {
            let cons = row.conservative_stock.unwrap();
            assert!(cons <= row.mean_stock);
            assert!(cons >= 0.0);
            assert!(row.conservative_total.unwrap() <= row.total_stock + 1e-9);
        }
    }

    #[test]
    fn missing_uncertainty_omits_conservative_columns() {
        let layer = layer_with(60.0, 30.0, None);
        let rows = aggregate_layer(&layer, Some(&two_strata_mask()), &survey(), 0.95).unwrap();
        for row in rows {
            assert!(row.se_stock.is_none());
            assert!(row.conservative_stock.is_none());
            assert!(row.conservative_total.is_none());
        }
    }

    #[test]
    fn without_mask_only_all_row_is_emitted() {
        let layer = layer_with(60.0, 30.0, Some(25.0));
        let rows = aggregate_layer(&layer, None, &survey(), 0.95).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stratum, ALL_STRATA);
    }
}
