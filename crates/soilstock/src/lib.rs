//! # soilstock — Soil Organic Carbon Stock Estimation
//!
//! A batch pipeline that turns sparse soil-core measurements and dense
//! environmental raster covariates into spatially-resolved, depth-integrated
//! carbon stock estimates with regulatory-grade conservative bounds.
//!
//! ## What it does
//!
//! Four tightly-coupled stages run in strict dependency order:
//!
//! 1. **Depth harmonization** — each core's irregular depth intervals are
//!    resampled onto standard depths with a mass-preserving equal-area
//!    spline; a seeded bootstrap quantifies the resampling uncertainty.
//! 2. **Spatial interpolation** — either per-(stratum, depth) variogram
//!    fitting with ordinary kriging (mean + variance surfaces), or a pooled
//!    per-depth random forest over environmental covariates with spatial
//!    cross-validation and an extrapolation-risk mask.
//! 3. **Stock integration** — concentration surfaces combine with bulk
//!    density and layer thickness into areal stock per reporting interval;
//!    variances propagate vertically and a conservative lower bound is
//!    derived from the configured confidence level.
//! 4. **Stratum aggregation** — pixel-level stock reduces to one summary
//!    row per (stratum, interval) plus an `"ALL"` aggregate row.
//!
//! ## Quick Start
//!
//! ```rust
//! use soilstock::prelude::*;
//!
//! // Validated survey records come from the upstream ingestion layer.
//! let cores = vec![
//!     Core { id: "c1".into(), x: 10.0, y: 50.0, stratum: "forest".into(), scenario: None },
//!     Core { id: "c2".into(), x: 25.0, y: 50.0, stratum: "forest".into(), scenario: None },
//!     Core { id: "c3".into(), x: 45.0, y: 50.0, stratum: "forest".into(), scenario: None },
//!     Core { id: "c4".into(), x: 70.0, y: 50.0, stratum: "forest".into(), scenario: None },
//!     Core { id: "c5".into(), x: 100.0, y: 50.0, stratum: "forest".into(), scenario: None },
//! ];
//! let mut samples = Vec::new();
//! for (i, core) in cores.iter().enumerate() {
//!     samples.push(DepthSample {
//!         core_id: core.id.clone(),
//!         depth_top: 0.0,
//!         depth_bottom: 15.0,
//!         concentration: 40.0 + i as f64 * 2.0,
//!         bulk_density: Some(1.1),
//!     });
//!     samples.push(DepthSample {
//!         core_id: core.id.clone(),
//!         depth_top: 15.0,
//!         depth_bottom: 40.0,
//!         concentration: 22.0 + i as f64,
//!         bulk_density: None,
//!     });
//! }
//! let survey = SoilSurvey::new(cores, samples)?;
//!
//! let pipeline = SoilStock::new()
//!     .method(InterpolationMethod::Kriging)
//!     .standard_depths(&[7.5, 25.0])
//!     .reporting_intervals(&[(0.0, 15.0), (15.0, 40.0)])
//!     .bootstrap_iterations(25)
//!     .grid_cell_size(10.0)
//!     .seed(42)
//!     .build()?;
//!
//! let result = pipeline.run(&survey, RunInputs::default())?;
//! println!("{result}");
//! # Result::<(), StockError>::Ok(())
//! ```
//!
//! ## Error handling
//!
//! `build()` and `run()` return `Result<_, StockError>`. Per-unit data
//! problems (a stratum with too few samples, a failed variogram fit) never
//! abort the run — they are recovered locally and recorded in the run's
//! diagnostics ledger with a reason string. Structural problems (invalid
//! configuration, malformed survey records, a covariate stack that yields
//! zero usable rows) fail fast with a contextual error.
//!
//! ## Reproducibility
//!
//! Every stochastic step — bootstrap resampling, fold assignment, bagging —
//! derives its RNG seed from the run seed and a stable unit identifier, so
//! identical inputs produce identical outputs across runs and across
//! parallel/sequential execution.

// Layer 1: Primitives - errors, records, grids.
mod primitives;

// Layer 2: Math - pure mathematical building blocks.
mod math;

// Layer 3: Algorithms - harmonization, interpolation, integration.
mod algorithms;

// Layer 4: Evaluation - cross-validation and diagnostics.
mod evaluation;

// Layer 5: Engine - orchestration and execution control.
mod engine;

// High-level fluent API.
mod api;

// Standard prelude for stock estimation runs.
pub mod prelude {
    pub use crate::api::StockBuilder as SoilStock;
    pub use crate::engine::executor::{InterpolationMethod, Pipeline, RunInputs, StockConfig};
    pub use crate::engine::output::RunResult;
    pub use crate::evaluation::diagnostics::{
        CvMetrics, CvRecord, DiagnosticEvent, EventKind, ImportanceRecord, RunDiagnostics, Stage,
        VariogramRecord,
    };
    pub use crate::math::variogram::{VariogramKind, VariogramModel};
    pub use crate::primitives::errors::StockError;
    pub use crate::primitives::grid::{
        CovariateStack, GeoTransform, Grid, PredictionSurface, StockLayer, StratumMask,
    };
    pub use crate::primitives::records::{
        Core, DepthSample, HarmonizedProfile, QualityFlags, SoilSurvey, StratumSummary,
    };
}

// Internal modules for development and testing.
//
// This module re-exports internal modules for development and testing
// purposes. It is only available with the `dev` feature enabled.
#[cfg(feature = "dev")]
pub mod internals {
    pub mod primitives {
        pub use crate::primitives::*;
    }
    pub mod math {
        pub use crate::math::*;
    }
    pub mod algorithms {
        pub use crate::algorithms::*;
    }
    pub mod evaluation {
        pub use crate::evaluation::*;
    }
    pub mod engine {
        pub use crate::engine::*;
    }
    pub mod api {
        pub use crate::api::*;
    }
}
