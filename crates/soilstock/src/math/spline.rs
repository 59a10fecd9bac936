//! Mass-preserving (equal-area) quadratic spline over depth intervals.
//!
//! ## Purpose
//!
//! Soil cores report one concentration per sampled depth interval, not per
//! point. Resampling onto standard depths therefore needs a continuous
//! profile whose *integral* over each sampled interval reproduces the
//! reported value — the equal-area property — rather than a curve through
//! point observations.
//!
//! ## Design notes
//!
//! * **Per-segment quadratics**: each interval carries `f(z) = a + b z + c z^2`
//!   in the local coordinate `z = depth - segment_top`.
//! * **Constraints**: one equal-area equation per segment, value and slope
//!   continuity at interior boundaries, zero slope at both profile ends.
//!   That is exactly 3n equations for 3n unknowns; the system is solved by
//!   `math::linalg`.
//! * **Gaps**: non-contiguous intervals are extended to the gap midpoints
//!   before fitting; the equal-area constraint then applies to the extended
//!   segment.
//! * **Extrapolation**: constant beyond the shallowest and deepest
//!   boundaries.
//!
//! ## Invariants
//!
//! * For contiguous input intervals, `mean_over(top_i, bottom_i)` equals the
//!   observed value up to solver round-off.
//! * Segment boundaries are strictly increasing.

// External dependencies
use num_traits::Float;

// Internal dependencies
use crate::math::linalg::solve_dense;
use crate::primitives::errors::StockError;

// ============================================================================
// Equal-Area Spline
// ============================================================================

/// A fitted equal-area quadratic spline over contiguous depth segments.
#[derive(Debug, Clone)]
pub struct EqualAreaSpline<T> {
    /// Segment boundaries, length n + 1, strictly increasing.
    boundaries: Vec<T>,
    /// Per-segment coefficients (a, b, c) for `a + b z + c z^2`.
    coeffs: Vec<[T; 3]>,
}

impl<T: Float> EqualAreaSpline<T> {
    /// Fit the spline to `(depth_top, depth_bottom, mean_value)` intervals.
    ///
    /// Intervals must be sorted by `depth_top` and non-overlapping (the
    /// survey boundary guarantees this for core samples).
    ///
    /// # Errors
    ///
    /// Returns [`StockError::SingularSystem`] when the constraint system
    /// cannot be solved; callers fall back to piecewise-linear
    /// interpolation.
    pub fn fit(intervals: &[(T, T, T)]) -> Result<Self, StockError> {
        let n = intervals.len();
        if n == 0 {
            return Err(StockError::SingularSystem(
                "equal-area spline requires at least one interval".into(),
            ));
        }

        let two = T::from(2.0).unwrap();
        let three = T::from(3.0).unwrap();

        // Close gaps: extend neighbouring segments to the gap midpoint.
        let mut boundaries = Vec::with_capacity(n + 1);
        boundaries.push(intervals[0].0);
        for i in 1..n {
            let prev_bottom = intervals[i - 1].1;
            let top = intervals[i].0;
            if top > prev_bottom {
                boundaries.push((prev_bottom + top) / two);
            } else {
                boundaries.push(top);
            }
        }
        boundaries.push(intervals[n - 1].1);

        // Assemble the 3n x 3n constraint system. Unknown ordering is
        // [a_0, b_0, c_0, a_1, b_1, c_1, ...].
        let dim = 3 * n;
        let mut mat = vec![T::zero(); dim * dim];
        let mut rhs = vec![T::zero(); dim];
        let mut row = 0usize;

        let widths: Vec<T> = (0..n).map(|i| boundaries[i + 1] - boundaries[i]).collect();

        // Equal-area equations (divided by the width for conditioning):
        // a_i + b_i h/2 + c_i h^2/3 = m_i
        for (i, &(_, _, mean)) in intervals.iter().enumerate() {
            let h = widths[i];
            mat[row * dim + 3 * i] = T::one();
            mat[row * dim + 3 * i + 1] = h / two;
            mat[row * dim + 3 * i + 2] = h * h / three;
            rhs[row] = mean;
            row += 1;
        }

        // Interior continuity of value and slope
        for i in 0..n - 1 {
            let h = widths[i];
            // a_i + b_i h + c_i h^2 - a_{i+1} = 0
            mat[row * dim + 3 * i] = T::one();
            mat[row * dim + 3 * i + 1] = h;
            mat[row * dim + 3 * i + 2] = h * h;
            mat[row * dim + 3 * (i + 1)] = -T::one();
            row += 1;
            // b_i + 2 c_i h - b_{i+1} = 0
            mat[row * dim + 3 * i + 1] = T::one();
            mat[row * dim + 3 * i + 2] = two * h;
            mat[row * dim + 3 * (i + 1) + 1] = -T::one();
            row += 1;
        }

        // Zero slope at the top and bottom of the profile
        mat[row * dim + 1] = T::one();
        row += 1;
        let last = n - 1;
        let h_last = widths[last];
        mat[row * dim + 3 * last + 1] = T::one();
        mat[row * dim + 3 * last + 2] = two * h_last;

        let solution = solve_dense(dim, &mut mat, &mut rhs)?;
        let coeffs = (0..n)
            .map(|i| [solution[3 * i], solution[3 * i + 1], solution[3 * i + 2]])
            .collect();

        Ok(Self { boundaries, coeffs })
    }

    /// Evaluate the profile at a depth, constant beyond the profile ends.
    pub fn evaluate(&self, depth: T) -> T {
        let n = self.coeffs.len();
        let top = self.boundaries[0];
        let bottom = self.boundaries[n];

        if depth <= top {
            return self.coeffs[0][0];
        }
        if depth >= bottom {
            let z = self.boundaries[n] - self.boundaries[n - 1];
            return self.segment_value(n - 1, z);
        }

        // Linear scan is fine: profiles have a handful of segments.
        let mut seg = n - 1;
        for i in 0..n {
            if depth < self.boundaries[i + 1] {
                seg = i;
                break;
            }
        }
        self.segment_value(seg, depth - self.boundaries[seg])
    }

    /// Mean of the profile over `[from, to]`, constant-extended outside.
    pub fn mean_over(&self, from: T, to: T) -> T {
        if to <= from {
            return self.evaluate(from);
        }
        self.integral(from, to) / (to - from)
    }

    /// Integral of the profile over `[from, to]`, constant-extended outside.
    pub fn integral(&self, from: T, to: T) -> T {
        let n = self.coeffs.len();
        let top = self.boundaries[0];
        let bottom = self.boundaries[n];
        let mut total = T::zero();

        // Constant extension above the profile
        if from < top {
            let upper = if to < top { to } else { top };
            total = total + self.coeffs[0][0] * (upper - from);
        }
        // Constant extension below the profile
        if to > bottom {
            let lower = if from > bottom { from } else { bottom };
            total = total + self.evaluate(bottom) * (to - lower);
        }

        // In-domain portion, segment by segment
        let lo = if from > top { from } else { top };
        let hi = if to < bottom { to } else { bottom };
        if hi > lo {
            for i in 0..n {
                let seg_lo = self.boundaries[i];
                let seg_hi = self.boundaries[i + 1];
                let a = if lo > seg_lo { lo } else { seg_lo };
                let b = if hi < seg_hi { hi } else { seg_hi };
                if b > a {
                    total = total
                        + self.segment_antiderivative(i, b - seg_lo)
                        - self.segment_antiderivative(i, a - seg_lo);
                }
            }
        }

        total
    }

    fn segment_value(&self, seg: usize, z: T) -> T {
        let [a, b, c] = self.coeffs[seg];
        a + b * z + c * z * z
    }

    fn segment_antiderivative(&self, seg: usize, z: T) -> T {
        let [a, b, c] = self.coeffs[seg];
        let two = T::from(2.0).unwrap();
        let three = T::from(3.0).unwrap();
        a * z + b * z * z / two + c * z * z * z / three
    }
}

// ============================================================================
// Piecewise-Linear Fallback
// ============================================================================

/// Linear interpolation through `(x, y)` points with constant extrapolation.
///
/// Used as the degraded-fit fallback when the spline system is singular.
/// Points must be sorted by `x`.
pub fn linear_interpolate<T: Float>(xs: &[T], ys: &[T], x: T) -> T {
    let n = xs.len();
    if n == 0 {
        return T::zero();
    }
    if n == 1 || x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }

    let mut left = 0;
    let mut right = n - 1;
    while right - left > 1 {
        let mid = (left + right) / 2;
        if xs[mid] <= x {
            left = mid;
        } else {
            right = mid;
        }
    }

    let denom = xs[right] - xs[left];
    if denom <= T::zero() {
        return (ys[left] + ys[right]) / T::from(2.0).unwrap();
    }
    let alpha = (x - xs[left]) / denom;
    ys[left] + alpha * (ys[right] - ys[left])
}
