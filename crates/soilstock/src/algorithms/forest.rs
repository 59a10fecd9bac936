//! Regression random forest over environmental covariates.
//!
//! ## Purpose
//!
//! This module trains the ensemble-regression interpolator: a bagged forest
//! of variance-reduction regression trees mapping covariate vectors to
//! concentrations. It exposes per-tree prediction spread (the ensemble's
//! variance surrogate), out-of-bag error, and permutation-based variable
//! importance.
//!
//! ## Design notes
//!
//! * **Array-based trees**: nodes live in a flat vector with child indices,
//!   so prediction is a tight loop with no pointer chasing.
//! * **Flat features**: sample rows are stored row-major in one `&[f64]`
//!   with an explicit feature count, avoiding per-row allocations during
//!   split search.
//! * **Determinism**: each tree derives its own RNG seed from the forest
//!   seed and tree index, so parallel and sequential training produce
//!   identical forests.
//! * **Split search**: at each node a random feature subset of size `mtry`
//!   (default sqrt of the feature count) is scanned; candidate thresholds
//!   are midpoints between consecutive distinct values.
//!
//! ## Invariants
//!
//! * Every leaf holds the mean of its training targets.
//! * A sample is out-of-bag for a tree iff it was never drawn into that
//!   tree's bootstrap bag.
//! * `predict` equals the mean of the per-tree predictions.

// External dependencies
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

// Internal dependencies
use crate::primitives::seed;

// ============================================================================
// Configuration
// ============================================================================

/// Random forest training settings.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    /// Number of trees.
    pub trees: usize,
    /// Minimum samples in a node eligible for splitting.
    pub min_node_size: usize,
    /// Features tried per split; `None` uses sqrt(feature count).
    pub mtry: Option<usize>,
    /// Forest seed; per-tree seeds are derived from it.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 500,
            min_node_size: 5,
            mtry: None,
            seed: 0,
        }
    }
}

/// Out-of-bag error summary of a trained forest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OobSummary {
    /// Out-of-bag mean squared error.
    pub mse: f64,
    /// Out-of-bag root mean squared error.
    pub rmse: f64,
    /// Out-of-bag coefficient of determination.
    pub r_squared: f64,
    /// Samples with at least one out-of-bag prediction.
    pub n: usize,
}

// ============================================================================
// Regression Tree
// ============================================================================

/// One tree node; `feature < 0` marks a leaf.
#[derive(Debug, Clone, Copy)]
struct Node {
    feature: i32,
    threshold: f64,
    left: u32,
    right: u32,
    value: f64,
}

/// A grown regression tree with array-based nodes.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Predict the target for one covariate row.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            if node.feature < 0 {
                return node.value;
            }
            idx = if row[node.feature as usize] <= node.threshold {
                node.left as usize
            } else {
                node.right as usize
            };
        }
    }

    fn grow(
        x: &[f64],
        y: &[f64],
        n_features: usize,
        indices: &[usize],
        min_node_size: usize,
        mtry: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build_node(x, y, n_features, indices, min_node_size, mtry, rng);
        tree
    }

    /// Recursively build a node over `indices`, returning its index.
    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &mut self,
        x: &[f64],
        y: &[f64],
        n_features: usize,
        indices: &[usize],
        min_node_size: usize,
        mtry: usize,
        rng: &mut StdRng,
    ) -> u32 {
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let mean = sum / n as f64;

        let make_leaf = |tree: &mut Self| -> u32 {
            let id = tree.nodes.len() as u32;
            tree.nodes.push(Node {
                feature: -1,
                threshold: 0.0,
                left: 0,
                right: 0,
                value: mean,
            });
            id
        };

        if n < 2 * min_node_size.max(1) {
            return make_leaf(self);
        }

        let sq_sum: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
        let parent_sse = sq_sum - sum * sum / n as f64;
        if parent_sse <= 1e-12 {
            return make_leaf(self);
        }

        // Random feature subset for this split
        let mut features: Vec<usize> = (0..n_features).collect();
        for i in 0..mtry.min(n_features) {
            let j = rng.gen_range(i..n_features);
            features.swap(i, j);
        }

        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, gain)
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for &feature in features.iter().take(mtry.min(n_features)) {
            pairs.clear();
            pairs.extend(
                indices
                    .iter()
                    .map(|&i| (x[i * n_features + feature], y[i])),
            );
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            // Scan split positions between distinct consecutive values
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for split in 1..n {
                let (v_prev, y_prev) = pairs[split - 1];
                left_sum += y_prev;
                left_sq += y_prev * y_prev;
                let v_next = pairs[split].0;
                if v_next <= v_prev {
                    continue;
                }
                let n_left = split as f64;
                let n_right = (n - split) as f64;
                if (split) < min_node_size || (n - split) < min_node_size {
                    continue;
                }
                let right_sum = sum - left_sum;
                let right_sq = sq_sum - left_sq;
                let sse_left = left_sq - left_sum * left_sum / n_left;
                let sse_right = right_sq - right_sum * right_sum / n_right;
                let gain = parent_sse - sse_left - sse_right;
                if gain > 1e-12 && best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((feature, (v_prev + v_next) / 2.0, gain));
                }
            }
        }

        let Some((feature, threshold, _)) = best else {
            return make_leaf(self);
        };

        // Partition indices around the threshold
        let mut left_idx: Vec<usize> = Vec::new();
        let mut right_idx: Vec<usize> = Vec::new();
        for &i in indices.iter() {
            if x[i * n_features + feature] <= threshold {
                left_idx.push(i);
            } else {
                right_idx.push(i);
            }
        }
        if left_idx.is_empty() || right_idx.is_empty() {
            return make_leaf(self);
        }

        let id = self.nodes.len() as u32;
        self.nodes.push(Node {
            feature: feature as i32,
            threshold,
            left: 0,
            right: 0,
            value: mean,
        });

        let left = self.build_node(x, y, n_features, &left_idx, min_node_size, mtry, rng);
        let right = self.build_node(x, y, n_features, &right_idx, min_node_size, mtry, rng);
        self.nodes[id as usize].left = left;
        self.nodes[id as usize].right = right;
        id
    }
}

// ============================================================================
// Random Forest
// ============================================================================

/// A bagged ensemble of regression trees.
#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    /// Per-tree bootstrap membership, `in_bag[t][i]`.
    in_bag: Vec<Vec<bool>>,
    n_features: usize,
}

impl RandomForest {
    /// Train a forest on row-major features `x` (length n * n_features).
    pub fn fit(x: &[f64], y: &[f64], n_features: usize, config: &ForestConfig) -> Self {
        let n = y.len();
        debug_assert_eq!(x.len(), n * n_features);

        let mtry = config
            .mtry
            .unwrap_or_else(|| (n_features as f64).sqrt().round().max(1.0) as usize)
            .clamp(1, n_features);

        let grown: Vec<(RegressionTree, Vec<bool>)> = (0..config.trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed::derive(config.seed, t as u64));

                // Bootstrap bag with replacement
                let mut bag = Vec::with_capacity(n);
                let mut in_bag = vec![false; n];
                for _ in 0..n {
                    let i = rng.gen_range(0..n);
                    bag.push(i);
                    in_bag[i] = true;
                }

                let tree = RegressionTree::grow(
                    x,
                    y,
                    n_features,
                    &bag,
                    config.min_node_size.max(1),
                    mtry,
                    &mut rng,
                );
                (tree, in_bag)
            })
            .collect();

        let mut trees = Vec::with_capacity(grown.len());
        let mut in_bag = Vec::with_capacity(grown.len());
        for (tree, bag) in grown {
            trees.push(tree);
            in_bag.push(bag);
        }

        Self {
            trees,
            in_bag,
            n_features,
        }
    }

    /// Predict the ensemble mean for one covariate row.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        sum / self.trees.len() as f64
    }

    /// Predict the ensemble mean and the spread (variance) of per-tree
    /// predictions. The spread is the ensemble's variance surrogate, not a
    /// calibrated prediction variance.
    pub fn predict_spread(&self, row: &[f64]) -> (f64, f64) {
        let n = self.trees.len() as f64;
        let mut sum = 0.0;
        let mut sq_sum = 0.0;
        for tree in &self.trees {
            let p = tree.predict(row);
            sum += p;
            sq_sum += p * p;
        }
        let mean = sum / n;
        let variance = (sq_sum / n - mean * mean).max(0.0);
        (mean, variance)
    }

    /// Out-of-bag prediction per training sample (NaN when a sample was
    /// in-bag for every tree).
    pub fn oob_predictions(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len() / self.n_features;
        let mut sums = vec![0.0_f64; n];
        let mut counts = vec![0usize; n];

        for (tree, bag) in self.trees.iter().zip(self.in_bag.iter()) {
            for i in 0..n {
                if !bag[i] {
                    sums[i] += tree.predict(&x[i * self.n_features..(i + 1) * self.n_features]);
                    counts[i] += 1;
                }
            }
        }

        (0..n)
            .map(|i| {
                if counts[i] > 0 {
                    sums[i] / counts[i] as f64
                } else {
                    f64::NAN
                }
            })
            .collect()
    }

    /// Out-of-bag error summary; `None` when no sample was ever out-of-bag.
    pub fn oob_summary(&self, x: &[f64], y: &[f64]) -> Option<OobSummary> {
        let predictions = self.oob_predictions(x);
        let mut ss_res = 0.0;
        let mut sum_y = 0.0;
        let mut n = 0usize;
        for (i, &p) in predictions.iter().enumerate() {
            if p.is_finite() {
                let err = p - y[i];
                ss_res += err * err;
                sum_y += y[i];
                n += 1;
            }
        }
        if n == 0 {
            return None;
        }
        let mean_y = sum_y / n as f64;
        let ss_tot: f64 = predictions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .map(|(i, _)| (y[i] - mean_y) * (y[i] - mean_y))
            .sum();
        let mse = ss_res / n as f64;
        let r_squared = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };
        Some(OobSummary {
            mse,
            rmse: mse.sqrt(),
            r_squared,
            n,
        })
    }

    /// Permutation importance per feature: the increase in out-of-bag MSE
    /// after permuting that feature's column across all samples.
    pub fn permutation_importance(&self, x: &[f64], y: &[f64], perm_seed: u64) -> Vec<f64> {
        let n = y.len();
        let baseline = match self.oob_summary(x, y) {
            Some(summary) => summary.mse,
            None => return vec![0.0; self.n_features],
        };

        (0..self.n_features)
            .map(|feature| {
                // Permute one column, leaving everything else intact
                let mut permuted = x.to_vec();
                let mut order: Vec<usize> = (0..n).collect();
                let mut rng = StdRng::seed_from_u64(seed::derive(perm_seed, feature as u64));
                for i in (1..n).rev() {
                    let j = rng.gen_range(0..=i);
                    order.swap(i, j);
                }
                for (i, &src) in order.iter().enumerate() {
                    permuted[i * self.n_features + feature] = x[src * self.n_features + feature];
                }

                match self.oob_summary(&permuted, y) {
                    Some(summary) => summary.mse - baseline,
                    None => 0.0,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic synthetic data: y = 3 x0 - 2 x1 + noise-free.
    fn linear_data(n: usize) -> (Vec<f64>, Vec<f64>) {
        let mut x = Vec::with_capacity(n * 2);
        let mut y = Vec::with_capacity(n);
        let mut state = 7u64;
        for _ in 0..n {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let a = (state >> 33) as f64 / (1u64 << 31) as f64;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let b = (state >> 33) as f64 / (1u64 << 31) as f64;
            x.push(a);
            x.push(b);
            y.push(3.0 * a - 2.0 * b);
        }
        (x, y)
    }

    fn small_config() -> ForestConfig {
        ForestConfig {
            trees: 50,
            min_node_size: 2,
            mtry: None,
            seed: 42,
        }
    }

    #[test]
    fn learns_a_linear_signal() {
        let (x, y) = linear_data(120);
        let forest = RandomForest::fit(&x, &y, 2, &small_config());
        let summary = forest.oob_summary(&x, &y).expect("oob available");
        assert!(summary.r_squared > 0.7, "R2 = {}", summary.r_squared);
    }

    #[test]
    fn training_is_deterministic() {
        let (x, y) = linear_data(60);
        let a = RandomForest::fit(&x, &y, 2, &small_config());
        let b = RandomForest::fit(&x, &y, 2, &small_config());
        let row = [0.3, 0.6];
        assert_eq!(a.predict(&row), b.predict(&row));
    }

    #[test]
    fn spread_is_nonnegative_and_mean_matches() {
        let (x, y) = linear_data(80);
        let forest = RandomForest::fit(&x, &y, 2, &small_config());
        let row = [0.5, 0.5];
        let (mean, variance) = forest.predict_spread(&row);
        assert!(variance >= 0.0);
        assert!((mean - forest.predict(&row)).abs() < 1e-12);
    }

    #[test]
    fn constant_target_gives_single_leaf_trees() {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y = vec![5.0; 40];
        let forest = RandomForest::fit(&x, &y, 1, &small_config());
        assert_eq!(forest.predict(&[17.0]), 5.0);
    }

    #[test]
    fn informative_feature_dominates_importance() {
        let (x, y) = linear_data(120);
        // Append a pure-noise third feature
        let n = y.len();
        let mut x3 = Vec::with_capacity(n * 3);
        let mut state = 99u64;
        for i in 0..n {
            x3.push(x[i * 2]);
            x3.push(x[i * 2 + 1]);
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            x3.push((state >> 33) as f64 / (1u64 << 31) as f64);
        }
        let forest = RandomForest::fit(&x3, &y, 3, &small_config());
        let importance = forest.permutation_importance(&x3, &y, 7);
        assert_eq!(importance.len(), 3);
        assert!(
            importance[0] > importance[2],
            "signal {} vs noise {}",
            importance[0],
            importance[2]
        );
    }
}
