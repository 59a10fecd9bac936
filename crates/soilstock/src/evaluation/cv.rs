//! Cross-validation fold assignment.
//!
//! ## Purpose
//!
//! This module builds the two fold layouts the interpolators validate
//! against: random leave-k-out folds for kriging units, and spatially
//! clustered folds (k-means on coordinates) for the ensemble interpolator,
//! computed within each stratum so fold proportions respect stratification.
//!
//! ## Design notes
//!
//! * **Determinism**: every shuffle and every k-means initialization is
//!   driven by a caller-supplied seed, so parallel and sequential runs
//!   produce identical folds.
//! * **Spatial folds**: clustering coordinates (rather than shuffling)
//!   keeps held-out samples spatially separated from training samples,
//!   which is what makes the metrics honest for spatial prediction.
//! * **Fold reduction**: callers shrink the fold count for small strata;
//!   this module only requires `1 <= k <= n`.
//!
//! ## Invariants
//!
//! * Every sample is assigned exactly one fold id in `0..k`.
//! * No fold is empty.

// External dependencies
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Random Folds
// ============================================================================

/// Assign `n` samples to `k` random, near-equal-size folds.
///
/// Used for leave-k-out validation of kriging units. `k` is clamped to
/// `[1, n]`.
pub fn random_folds(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let k = k.clamp(1, n.max(1));
    let mut indices: Vec<usize> = (0..n).collect();

    // Fisher-Yates shuffle
    let mut rng = StdRng::seed_from_u64(seed);
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        indices.swap(i, j);
    }

    let mut folds = vec![0usize; n];
    for (pos, &idx) in indices.iter().enumerate() {
        folds[idx] = pos % k;
    }
    folds
}

// ============================================================================
// Spatial Folds
// ============================================================================

/// Number of Lloyd iterations for fold clustering.
const KMEANS_ITERATIONS: usize = 25;

/// Cluster sample coordinates into `k` spatial folds via k-means.
///
/// Returns one fold id per sample. `k` is clamped to `[1, n]`; with
/// `k == 1` every sample lands in fold 0 (the caller flags such a unit's
/// metrics as unreliable).
pub fn kmeans_folds(coords: &[(f64, f64)], k: usize, seed: u64) -> Vec<usize> {
    let n = coords.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.clamp(1, n);
    if k == 1 {
        return vec![0; n];
    }

    let mut rng = StdRng::seed_from_u64(seed);

    // Initialize centroids from k distinct samples
    let mut chosen: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        chosen.swap(i, j);
    }
    let mut centroids: Vec<(f64, f64)> = chosen[..k].iter().map(|&i| coords[i]).collect();

    let mut assignment = vec![0usize; n];
    for _ in 0..KMEANS_ITERATIONS {
        // Assignment step
        let mut changed = false;
        for (i, &(x, y)) in coords.iter().enumerate() {
            let mut best = 0usize;
            let mut best_d = f64::INFINITY;
            for (c, &(cx, cy)) in centroids.iter().enumerate() {
                let d = (x - cx) * (x - cx) + (y - cy) * (y - cy);
                if d < best_d {
                    best_d = d;
                    best = c;
                }
            }
            if assignment[i] != best {
                assignment[i] = best;
                changed = true;
            }
        }

        // Update step
        let mut sums = vec![(0.0_f64, 0.0_f64, 0usize); k];
        for (i, &(x, y)) in coords.iter().enumerate() {
            let slot = &mut sums[assignment[i]];
            slot.0 += x;
            slot.1 += y;
            slot.2 += 1;
        }
        for (c, &(sx, sy, count)) in sums.iter().enumerate() {
            if count > 0 {
                centroids[c] = (sx / count as f64, sy / count as f64);
            } else {
                // Re-seed an empty cluster from the sample farthest from
                // its centroid.
                let far = farthest_sample(coords, &centroids, &assignment);
                centroids[c] = coords[far];
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    // No fold may end up empty: steal the farthest sample for each.
    let mut counts = vec![0usize; k];
    for &a in &assignment {
        counts[a] += 1;
    }
    for fold in 0..k {
        if counts[fold] == 0 {
            let donor = farthest_sample(coords, &centroids, &assignment);
            if counts[assignment[donor]] > 1 {
                counts[assignment[donor]] -= 1;
                assignment[donor] = fold;
                counts[fold] += 1;
            }
        }
    }

    assignment
}

/// Index of the sample farthest from its assigned centroid.
fn farthest_sample(
    coords: &[(f64, f64)],
    centroids: &[(f64, f64)],
    assignment: &[usize],
) -> usize {
    let mut far = 0usize;
    let mut far_d = -1.0_f64;
    for (i, &(x, y)) in coords.iter().enumerate() {
        let (cx, cy) = centroids[assignment[i]];
        let d = (x - cx) * (x - cx) + (y - cy) * (y - cy);
        if d > far_d {
            far_d = d;
            far = i;
        }
    }
    far
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_folds_cover_all_samples() {
        let folds = random_folds(17, 5, 7);
        assert_eq!(folds.len(), 17);
        for fold in 0..5 {
            assert!(folds.iter().any(|&f| f == fold), "fold {fold} empty");
        }
    }

    #[test]
    fn random_folds_are_deterministic() {
        assert_eq!(random_folds(20, 4, 99), random_folds(20, 4, 99));
        assert_ne!(random_folds(20, 4, 99), random_folds(20, 4, 100));
    }

    #[test]
    fn kmeans_separates_two_clusters() {
        let mut coords = Vec::new();
        for i in 0..10 {
            coords.push((i as f64 * 0.1, 0.0));
        }
        for i in 0..10 {
            coords.push((100.0 + i as f64 * 0.1, 0.0));
        }
        let folds = kmeans_folds(&coords, 2, 3);
        // Each spatial cluster must be a single fold
        let left = folds[0];
        assert!(folds[..10].iter().all(|&f| f == left));
        assert!(folds[10..].iter().all(|&f| f != left));
    }

    #[test]
    fn kmeans_single_fold_assigns_everything_to_zero() {
        let coords = vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)];
        assert_eq!(kmeans_folds(&coords, 1, 0), vec![0, 0, 0]);
    }

    #[test]
    fn kmeans_clamps_fold_count_to_samples() {
        let coords = vec![(0.0, 0.0), (5.0, 5.0)];
        let folds = kmeans_folds(&coords, 10, 0);
        assert_eq!(folds.len(), 2);
        assert!(folds.iter().all(|&f| f < 2));
    }
}
