//! Layer 3: Algorithms
//!
//! # Purpose
//!
//! This layer implements the numerical core of the pipeline:
//! - Depth-profile harmonization with bootstrap uncertainty
//! - Ordinary kriging prediction with estimation variance
//! - The regression random forest and its extrapolation-risk mask
//! - Stock integration and stratum aggregation
//!
//! Algorithms are pure with respect to the run lifecycle: they return
//! structured outcomes (including skip reasons and fit attempts) and leave
//! ledger recording to the engine.
//!
//! # Architecture
//!
//! ```text
//! Layer 6: API
//!   ↓
//! Layer 5: Engine
//!   ↓
//! Layer 4: Evaluation
//!   ↓
//! Layer 3: Algorithms ← You are here
//!   ↓
//! Layer 2: Math
//!   ↓
//! Layer 1: Primitives
//! ```

/// Stratum aggregation to summary rows.
pub mod aggregate;

/// Extrapolation-risk mask (area of applicability).
pub mod extrapolation;

/// Regression random forest.
pub mod forest;

/// Depth-profile harmonization.
pub mod harmonize;

/// Ordinary kriging prediction.
pub mod kriging;

/// Carbon stock integration.
pub mod stock;
