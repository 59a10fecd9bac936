//! Layer 2: Math
//!
//! # Purpose
//!
//! This layer provides the pure mathematical building blocks used by the
//! pipeline algorithms:
//! - Dense linear system solving (kriging and spline systems)
//! - Standard-normal quantiles (conservative bounds)
//! - The mass-preserving equal-area spline (depth harmonization)
//! - Variogram models and empirical variogram estimation
//!
//! Nothing in this layer knows about surveys, grids, or the run lifecycle.
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
//! Layer 3: Algorithms
//!   ↓
//! Layer 2: Math ← You are here
//!   ↓
//! Layer 1: Primitives
//! ```

/// Dense linear system solving for small statistical systems.
pub mod linalg;

/// Standard-normal quantiles.
pub mod normal;

/// Mass-preserving (equal-area) quadratic splines.
pub mod spline;

/// Empirical semivariograms and variogram model fitting.
pub mod variogram;
