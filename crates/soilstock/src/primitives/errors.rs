//! Error types for soil stock estimation.
//!
//! ## Purpose
//!
//! This module defines error conditions that can occur during a stock
//! estimation run, including survey validation, parameter constraints, and
//! structural input mismatches.
//!
//! ## Design notes
//!
//! * **Contextual**: Errors include relevant values (e.g., actual vs. expected counts).
//! * **Deferred**: Builder misconfiguration is caught and stored until `build()`.
//! * **Severity split**: Per-unit data problems are *not* errors — they are
//!   recorded in the run diagnostics ledger and the run continues. Only
//!   structural problems (bad configuration, malformed survey, covariate
//!   mismatch) surface here.
//!
//! ## Key concepts
//!
//! 1. **Survey validation**: Empty surveys, malformed depth intervals, unknown core ids.
//! 2. **Parameter validation**: Invalid confidence, folds, depths, or intervals.
//! 3. **Structural failures**: Covariate extraction yielding zero usable rows.
//!
//! ## Invariants
//!
//! * All variants provide sufficient context for diagnosis.
//! * Error messages are consistent in tone and formatting.
//!
//! ## Non-goals
//!
//! * This module does not perform the validation logic itself.
//! * This module does not represent recoverable per-unit skips (see
//!   `evaluation::diagnostics`).

// External dependencies
use std::error::Error;
use std::fmt::{Display, Formatter, Result};

// ============================================================================
// Error Type
// ============================================================================

/// Error type for soil stock estimation operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StockError {
    /// The survey contains no cores or no depth samples.
    EmptyInput,

    /// A survey record failed boundary validation.
    InvalidRecord(String),

    /// Confidence level must be strictly between 0 and 1.
    InvalidConfidence(f64),

    /// Bootstrap iteration count must be in [1, 100_000].
    InvalidIterations(usize),

    /// Cross-validation requires at least 2 folds.
    InvalidFolds(usize),

    /// Ensemble tree count must be at least 1.
    InvalidTreeCount(usize),

    /// Minimum node size must be at least 1.
    InvalidNodeSize(usize),

    /// Grid cell size must be positive and finite.
    InvalidCellSize(f64),

    /// Variogram distance parameters must be positive and finite.
    InvalidDistance {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// The value provided.
        got: f64,
    },

    /// Standard depths must be positive, finite, and strictly increasing.
    InvalidDepths(String),

    /// Reporting intervals must be well-formed, non-overlapping, and each
    /// must cover at least one standard depth.
    InvalidIntervals(String),

    /// Bulk density must be positive and finite.
    InvalidBulkDensity(f64),

    /// Realistic-concentration bounds must satisfy min < max.
    InvalidBounds {
        /// Lower bound provided.
        min: f64,
        /// Upper bound provided.
        max: f64,
    },

    /// A required parameter was never supplied to the builder.
    MissingParameter {
        /// Name of the missing parameter.
        parameter: &'static str,
    },

    /// Parameter was set multiple times in the builder.
    DuplicateParameter {
        /// Name of the parameter that was set multiple times.
        parameter: &'static str,
    },

    /// Structural covariate failure: zero usable extraction rows, or an
    /// incompatible coordinate reference system / extent. Fatal for the run.
    CovariateMismatch(String),

    /// A dense linear system could not be solved.
    SingularSystem(String),

    /// A terminal output violated a hard invariant (e.g. conservative > mean).
    InvariantViolation(String),
}

// ============================================================================
// Display Implementation
// ============================================================================

impl Display for StockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Self::EmptyInput => write!(f, "Survey contains no usable cores or samples"),
            Self::InvalidRecord(msg) => write!(f, "Invalid survey record: {msg}"),
            Self::InvalidConfidence(level) => {
                write!(f, "Invalid confidence level: {level} (must be > 0 and < 1)")
            }
            Self::InvalidIterations(n) => {
                write!(f, "Invalid bootstrap iterations: {n} (must be in [1, 100000])")
            }
            Self::InvalidFolds(k) => write!(f, "Invalid cv_folds: {k} (must be at least 2)"),
            Self::InvalidTreeCount(n) => {
                write!(f, "Invalid ensemble tree count: {n} (must be at least 1)")
            }
            Self::InvalidNodeSize(n) => {
                write!(f, "Invalid minimum node size: {n} (must be at least 1)")
            }
            Self::InvalidCellSize(s) => {
                write!(f, "Invalid grid cell size: {s} (must be positive and finite)")
            }
            Self::InvalidDistance { parameter, got } => {
                write!(f, "Invalid {parameter}: {got} (must be positive and finite)")
            }
            Self::InvalidDepths(msg) => write!(f, "Invalid standard depths: {msg}"),
            Self::InvalidIntervals(msg) => write!(f, "Invalid reporting intervals: {msg}"),
            Self::InvalidBulkDensity(bd) => {
                write!(f, "Invalid bulk density: {bd} (must be positive and finite)")
            }
            Self::InvalidBounds { min, max } => {
                write!(f, "Invalid realistic bounds: [{min}, {max}] (must satisfy min < max)")
            }
            Self::MissingParameter { parameter } => {
                write!(f, "Required parameter '{parameter}' was never set")
            }
            Self::DuplicateParameter { parameter } => {
                write!(
                    f,
                    "Parameter '{parameter}' was set multiple times. Each parameter can only be configured once."
                )
            }
            Self::CovariateMismatch(msg) => write!(f, "Covariate mismatch: {msg}"),
            Self::SingularSystem(msg) => write!(f, "Singular linear system: {msg}"),
            Self::InvariantViolation(msg) => write!(f, "Invariant violation: {msg}"),
        }
    }
}

// ============================================================================
// Standard Error Trait
// ============================================================================

impl Error for StockError {}
