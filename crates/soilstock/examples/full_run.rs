//! soilstock End-to-End Examples
//!
//! This example demonstrates the full estimation pipeline on synthetic
//! survey data:
//! - Geostatistical interpolation (variogram + ordinary kriging)
//! - Ensemble regression with a covariate stack and extrapolation mask
//! - Conservative stock reporting per stratum

use ndarray::Array2;
use soilstock::prelude::*;

fn main() -> Result<(), StockError> {
    println!("{}", "=".repeat(80));
    println!("soilstock Pipeline Examples");
    println!("{}", "=".repeat(80));
    println!();

    example_1_kriging()?;
    example_2_ensemble()?;

    Ok(())
}

/// Synthetic survey: a grid of cores whose concentration follows a gentle
/// east-west trend, sampled over two depth intervals.
fn synthetic_survey() -> Result<SoilSurvey, StockError> {
    let mut cores = Vec::new();
    let mut samples = Vec::new();
    let mut i = 0usize;
    for row in 0..5 {
        for col in 0..5 {
            // Jitter breaks the regular grid so lag bins are populated.
            let x = 20.0 + col as f64 * 40.0 + (i % 7) as f64 * 2.1;
            let y = 20.0 + row as f64 * 40.0 + (i % 5) as f64 * 2.7;
            let id = format!("core-{i}");
            let stratum = if x < 100.0 { "forest" } else { "grassland" };
            let surface = 55.0 - 0.12 * x + 0.03 * y;
            cores.push(Core {
                id: id.clone(),
                x,
                y,
                stratum: stratum.into(),
                scenario: Some("baseline".into()),
            });
            samples.push(DepthSample {
                core_id: id.clone(),
                depth_top: 0.0,
                depth_bottom: 15.0,
                concentration: surface,
                bulk_density: Some(1.1),
            });
            samples.push(DepthSample {
                core_id: id,
                depth_top: 15.0,
                depth_bottom: 45.0,
                concentration: surface * 0.55,
                bulk_density: None,
            });
            i += 1;
        }
    }
    SoilSurvey::new(cores, samples)
}

/// Example 1: Geostatistical Interpolation
/// Fits a variogram per (stratum, depth) and krige each unit.
fn example_1_kriging() -> Result<(), StockError> {
    println!("Example 1: Variogram Fitting + Ordinary Kriging");
    println!("{}", "-".repeat(80));

    let survey = synthetic_survey()?;

    let pipeline = SoilStock::new()
        .method(InterpolationMethod::Kriging)
        .standard_depths(&[7.5, 30.0])
        .reporting_intervals(&[(0.0, 15.0), (15.0, 45.0)])
        .bootstrap_iterations(50)
        .cv_folds(3)
        .grid_cell_size(20.0)
        .seed(42)
        .build()?;

    let result = pipeline.run(&survey, RunInputs::default())?;
    println!("{result}");

    println!();
    Ok(())
}

/// Example 2: Ensemble Regression
/// Trains a random forest per depth against a covariate stack and reports
/// the extrapolation mask coverage.
fn example_2_ensemble() -> Result<(), StockError> {
    println!("Example 2: Random Forest + Extrapolation Mask");
    println!("{}", "-".repeat(80));

    let survey = synthetic_survey()?;

    // 20 x 20 covariate stack at 10 m: elevation and a moisture index.
    let elevation = Array2::from_shape_fn((20, 20), |(_, c)| 200.0 + 3.0 * c as f64);
    let moisture = Array2::from_shape_fn((20, 20), |(r, _)| 0.1 + 0.04 * r as f64);
    let stack = CovariateStack::new(
        vec!["elevation".into(), "moisture".into()],
        vec![elevation, moisture],
        GeoTransform::new(0.0, 200.0, 10.0),
        "EPSG:32633".into(),
    )?;

    let pipeline = SoilStock::new()
        .method(InterpolationMethod::EnsembleRegression)
        .standard_depths(&[7.5, 30.0])
        .reporting_intervals(&[(0.0, 15.0), (15.0, 45.0)])
        .bootstrap_iterations(50)
        .cv_folds(3)
        .ensemble_trees(150)
        .seed(42)
        .build()?;

    let inputs = RunInputs {
        covariates: Some(&stack),
        strata: None,
    };
    let result = pipeline.run(&survey, inputs)?;
    println!("{result}");

    for surface in &result.surfaces {
        if let Some(mask) = &surface.extrapolation_mask {
            let flagged = mask.iter().filter(|&&v| v).count();
            println!(
                "depth {:>5.1} cm: {} of {} cells outside the area of applicability",
                surface.depth,
                flagged,
                mask.len()
            );
        }
    }

    println!();
    Ok(())
}
