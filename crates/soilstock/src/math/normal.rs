//! Standard-normal quantiles for conservative bounds.
//!
//! The conservative stock bound subtracts `z(confidence) * se` from the
//! mean, so the only distributional machinery the crate needs is the
//! inverse standard-normal CDF. Common confidence levels use fast paths;
//! everything else goes through Acklam's rational approximation
//! (relative error < 1.15e-9 over the open unit interval).

// ============================================================================
// Z-Score
// ============================================================================

/// Critical value (z-score) for a two-sided confidence level.
///
/// `z = Phi^-1((1 + level) / 2)` where `Phi^-1` is the inverse standard
/// normal CDF. The caller validates `0 < level < 1`.
pub fn z_score(confidence_level: f64) -> f64 {
    // Fast paths for the usual regulatory levels
    if (confidence_level - 0.99).abs() < 1e-6 {
        return 2.576;
    }
    if (confidence_level - 0.95).abs() < 1e-6 {
        return 1.960;
    }
    if (confidence_level - 0.90).abs() < 1e-6 {
        return 1.645;
    }

    acklam_inverse_cdf((1.0 + confidence_level) / 2.0)
}

/// Rational approximation of the inverse standard normal CDF.
fn acklam_inverse_cdf(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }

    // Coefficients for central region
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239e0,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];

    // Coefficients for tail regions
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838e0,
        -2.549_732_539_343_734e0,
        4.374_664_141_464_968e0,
        2.938_163_982_698_783e0,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996e0,
        3.754_408_661_907_416e0,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 0.97575;

    if p < P_LOW {
        // Lower tail
        let q = (-2.0 * p.ln()).sqrt();
        let num = ((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5];
        let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0;
        num / den
    } else if p > P_HIGH {
        // Upper tail
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        let num = ((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5];
        let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0;
        -(num / den)
    } else {
        // Central region
        let q = p - 0.5;
        let r = q * q;
        let num = (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q;
        let den = ((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0;
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_paths_match_tables() {
        assert!((z_score(0.95) - 1.960).abs() < 1e-9);
        assert!((z_score(0.99) - 2.576).abs() < 1e-9);
        assert!((z_score(0.90) - 1.645).abs() < 1e-9);
    }

    #[test]
    fn acklam_agrees_with_fast_paths() {
        // Slightly off the fast-path tolerance so Acklam is exercised
        let z = z_score(0.9500100);
        assert!((z - 1.96).abs() < 1e-3, "z = {z}");
    }

    #[test]
    fn median_is_zero() {
        assert!(acklam_inverse_cdf(0.5).abs() < 1e-12);
    }

    #[test]
    fn tails_are_symmetric() {
        let lo = acklam_inverse_cdf(0.01);
        let hi = acklam_inverse_cdf(0.99);
        assert!((lo + hi).abs() < 1e-9);
    }
}
