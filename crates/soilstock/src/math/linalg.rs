//! Dense linear system solving for small statistical systems.
//!
//! ## Purpose
//!
//! This module provides Gaussian elimination with partial pivoting for the
//! small dense systems the crate assembles: kriging systems (typically
//! 5-20 unknowns plus the Lagrange row) and equal-area spline systems
//! (3 unknowns per depth interval).
//!
//! ## Design notes
//!
//! * **Row-major**: matrices are flat `&mut [T]` slices of length n*n.
//! * **In-place**: the matrix and right-hand side are consumed as scratch.
//! * **Generics**: solving is generic over `Float` like the rest of the
//!   math layer.
//!
//! ## Invariants
//!
//! * A pivot magnitude below the singularity threshold aborts the solve;
//!   callers decide whether that is a fallback or an error.

// External dependencies
use num_traits::Float;

// Internal dependencies
use crate::primitives::errors::StockError;

/// Pivot magnitude below which the system is treated as singular.
const SINGULARITY_EPS: f64 = 1e-12;

/// Solve `A x = b` in place using Gaussian elimination with partial pivoting.
///
/// `mat` is the row-major n*n matrix; both `mat` and `rhs` are overwritten.
///
/// # Errors
///
/// Returns [`StockError::SingularSystem`] when a pivot column has no entry
/// above the singularity threshold.
pub fn solve_dense<T: Float>(n: usize, mat: &mut [T], rhs: &mut [T]) -> Result<Vec<T>, StockError> {
    debug_assert_eq!(mat.len(), n * n);
    debug_assert_eq!(rhs.len(), n);

    let eps = T::from(SINGULARITY_EPS).unwrap_or_else(T::epsilon);

    // Forward elimination
    for col in 0..n {
        // Partial pivoting: find the largest entry in this column
        let mut max_val = mat[col * n + col].abs();
        let mut max_row = col;
        for row in (col + 1)..n {
            let val = mat[row * n + col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < eps {
            return Err(StockError::SingularSystem(format!(
                "pivot {} below threshold in {}x{} system",
                col, n, n
            )));
        }

        if max_row != col {
            for j in 0..n {
                mat.swap(col * n + j, max_row * n + j);
            }
            rhs.swap(col, max_row);
        }

        let pivot = mat[col * n + col];
        for row in (col + 1)..n {
            let factor = mat[row * n + col] / pivot;
            mat[row * n + col] = T::zero();
            for j in (col + 1)..n {
                mat[row * n + j] = mat[row * n + j] - factor * mat[col * n + j];
            }
            rhs[row] = rhs[row] - factor * rhs[col];
        }
    }

    // Back substitution
    let mut x = vec![T::zero(); n];
    for col in (0..n).rev() {
        let mut sum = rhs[col];
        for j in (col + 1)..n {
            sum = sum - mat[col * n + j] * x[j];
        }
        x[col] = sum / mat[col * n + col];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_small_system() {
        // [2 1; 1 3] x = [5; 7] => x = [1.6, 1.8]
        let mut mat = vec![2.0, 1.0, 1.0, 3.0];
        let mut rhs = vec![5.0, 7.0];
        let x = solve_dense(2, &mut mat, &mut rhs).unwrap();
        assert!((x[0] - 1.6).abs() < 1e-12);
        assert!((x[1] - 1.8).abs() < 1e-12);
    }

    #[test]
    fn rejects_singular_system() {
        let mut mat = vec![1.0, 2.0, 2.0, 4.0];
        let mut rhs = vec![1.0, 2.0];
        assert!(solve_dense(2, &mut mat, &mut rhs).is_err());
    }

    #[test]
    fn pivoting_handles_zero_leading_entry() {
        // Leading zero requires a row swap
        let mut mat = vec![0.0, 1.0, 1.0, 0.0];
        let mut rhs = vec![3.0, 4.0];
        let x = solve_dense(2, &mut mat, &mut rhs).unwrap();
        assert!((x[0] - 4.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }
}
