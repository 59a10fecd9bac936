//! Layer 4: Evaluation
//!
//! # Purpose
//!
//! This layer provides the machinery that judges and audits the pipeline's
//! outputs:
//! - Cross-validation fold assignment (random and spatial)
//! - The run diagnostics ledger and flat metric records
//!
//! # Architecture
//!
//! ```text
//! Layer 6: API
//!   ↓
//! Layer 5: Engine
//!   ↓
//! Layer 4: Evaluation ← You are here
//!   ↓
//! Layer 3: Algorithms
//!   ↓
//! Layer 2: Math
//!   ↓
//! Layer 1: Primitives
//! ```

/// Cross-validation fold assignment.
pub mod cv;

/// Run diagnostics ledger and metric records.
pub mod diagnostics;
