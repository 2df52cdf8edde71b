//! Gradient-boosted decision trees, one-vs-rest multi-class.
//!
//! Per class: boost depth-limited regression trees against the logistic
//! residual (label minus sigmoid of the running score). Split search
//! runs over per-feature candidate thresholds drawn from value quantiles,
//! maximizing variance reduction. `predict` takes the argmax of class
//! scores; `predict_proba` normalizes the per-class sigmoids.
//!
//! Training is bit-deterministic for a fixed seed: features and
//! thresholds are scanned in stable order, subsampling uses a seeded
//! StdRng, and ties keep the first candidate.

use super::{Classifier, ModelError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    /// Boosting rounds per class.
    pub n_estimators: usize,
    /// Maximum tree depth.
    pub max_depth: usize,
    /// Shrinkage applied to each tree's contribution.
    pub learning_rate: f64,
    /// Minimum samples on each side of a split.
    pub min_samples_leaf: usize,
    /// Row subsample ratio per tree (1.0 = no subsampling).
    pub subsample: f64,
    /// Maximum candidate thresholds per feature.
    pub n_bins: usize,
    /// RNG seed for subsampling.
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            max_depth: 5,
            learning_rate: 0.03,
            min_samples_leaf: 5,
            subsample: 1.0,
            n_bins: 32,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeNode {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
    value: f64,
    is_leaf: bool,
}

/// A depth-limited regression tree fit to residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Fit a tree on the rows named by `indices`.
    fn fit(
        x: &[Vec<f64>],
        targets: &[f64],
        indices: &[usize],
        params: &GbdtParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, targets, indices.to_vec(), 0, params);
        tree
    }

    /// Recursively grow the subtree for `indices`, returning its node id.
    fn grow(
        &mut self,
        x: &[Vec<f64>],
        targets: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &GbdtParams,
    ) -> usize {
        let mean = node_mean(targets, &indices);

        let can_split = depth < params.max_depth && indices.len() >= 2 * params.min_samples_leaf;
        let split = if can_split {
            best_split(x, targets, &indices, params)
        } else {
            None
        };

        let id = self.nodes.len();
        self.nodes.push(TreeNode {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: mean,
            is_leaf: true,
        });

        if let Some((feature, threshold)) = split {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .into_iter()
                .partition(|&i| x[i][feature] <= threshold);

            let left = self.grow(x, targets, left_idx, depth + 1, params);
            let right = self.grow(x, targets, right_idx, depth + 1, params);

            let node = &mut self.nodes[id];
            node.feature = feature;
            node.threshold = threshold;
            node.left = left;
            node.right = right;
            node.is_leaf = false;
        }

        id
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            let node = &self.nodes[id];
            if node.is_leaf {
                return node.value;
            }
            id = if row[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }
}

fn node_mean(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

/// Find the (feature, threshold) pair maximizing variance reduction, or
/// None when no candidate improves on the unsplit node.
///
/// Score is sum(left)^2/n_left + sum(right)^2/n_right, equivalent to SSE
/// reduction up to a constant. Candidates are quantile midpoints, at
/// most `n_bins` per feature, scanned in stable order.
fn best_split(
    x: &[Vec<f64>],
    targets: &[f64],
    indices: &[usize],
    params: &GbdtParams,
) -> Option<(usize, f64)> {
    let n_features = x[indices[0]].len();
    let total_sum: f64 = indices.iter().map(|&i| targets[i]).sum();
    let base_score = total_sum * total_sum / indices.len() as f64;

    let mut best: Option<(usize, f64)> = None;
    let mut best_score = base_score;

    for feature in 0..n_features {
        for threshold in candidate_thresholds(x, indices, feature, params.n_bins) {
            let mut left_sum = 0.0;
            let mut left_n = 0usize;
            for &i in indices {
                if x[i][feature] <= threshold {
                    left_sum += targets[i];
                    left_n += 1;
                }
            }
            let right_n = indices.len() - left_n;
            if left_n < params.min_samples_leaf || right_n < params.min_samples_leaf {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let score =
                left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64;

            if score > best_score + 1e-12 {
                best_score = score;
                best = Some((feature, threshold));
            }
        }
    }

    best
}

/// Quantile midpoints over the node's values for one feature.
fn candidate_thresholds(
    x: &[Vec<f64>],
    indices: &[usize],
    feature: usize,
    n_bins: usize,
) -> Vec<f64> {
    let mut values: Vec<f64> = indices.iter().map(|&i| x[i][feature]).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values.dedup();

    if values.len() < 2 {
        return Vec::new();
    }

    let midpoints: Vec<f64> = values
        .windows(2)
        .map(|w| (w[0] + w[1]) / 2.0)
        .collect();

    if midpoints.len() <= n_bins {
        return midpoints;
    }

    // Evenly spaced quantile picks keep the candidate count bounded.
    (0..n_bins)
        .map(|b| midpoints[b * midpoints.len() / n_bins])
        .collect()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// One-vs-rest gradient-boosted classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtClassifier {
    params: GbdtParams,
    n_classes: usize,
    n_features: usize,
    base_score: Vec<f64>,
    forests: Vec<Vec<RegressionTree>>,
}

impl GbdtClassifier {
    pub fn new(params: GbdtParams, n_classes: usize) -> Self {
        Self {
            params,
            n_classes,
            n_features: 0,
            base_score: Vec::new(),
            forests: Vec::new(),
        }
    }

    pub fn params(&self) -> &GbdtParams {
        &self.params
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn is_trained(&self) -> bool {
        !self.forests.is_empty()
    }

    /// Raw boosted score per class for one row.
    fn scores_row(&self, row: &[f64]) -> Vec<f64> {
        (0..self.n_classes)
            .map(|k| {
                let trees: f64 = self.forests[k]
                    .iter()
                    .map(|t| t.predict_row(row))
                    .sum();
                self.base_score[k] + self.params.learning_rate * trees
            })
            .collect()
    }

    fn check_input(&self, x: &[Vec<f64>]) -> Result<(), ModelError> {
        if !self.is_trained() {
            return Err(ModelError::NotTrained);
        }
        for row in x {
            if row.len() != self.n_features {
                return Err(ModelError::DimensionMismatch {
                    expected: self.n_features,
                    got: row.len(),
                });
            }
        }
        Ok(())
    }
}

impl Classifier for GbdtClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8]) -> Result<(), ModelError> {
        if x.is_empty() || y.is_empty() || x.len() != y.len() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let n_features = x[0].len();
        for row in x {
            if row.len() != n_features {
                return Err(ModelError::DimensionMismatch {
                    expected: n_features,
                    got: row.len(),
                });
            }
        }
        for &label in y {
            if label as usize >= self.n_classes {
                return Err(ModelError::ClassOutOfRange {
                    class: label,
                    n_classes: self.n_classes,
                });
            }
        }

        let n = x.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut base_score = Vec::with_capacity(self.n_classes);
        let mut forests = Vec::with_capacity(self.n_classes);

        for k in 0..self.n_classes {
            let binary: Vec<f64> = y
                .iter()
                .map(|&label| if label as usize == k { 1.0 } else { 0.0 })
                .collect();

            // Log-odds of the class prior, clamped away from 0 and 1.
            let prior = (binary.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
            let base = (prior / (1.0 - prior)).ln();
            base_score.push(base);

            let mut scores = vec![base; n];
            let mut trees = Vec::with_capacity(self.params.n_estimators);

            for _ in 0..self.params.n_estimators {
                let residuals: Vec<f64> = binary
                    .iter()
                    .zip(&scores)
                    .map(|(yk, s)| yk - sigmoid(*s))
                    .collect();

                let indices = sample_rows(n, self.params.subsample, &mut rng);
                let tree = RegressionTree::fit(x, &residuals, &indices, &self.params);

                for (i, row) in x.iter().enumerate() {
                    scores[i] += self.params.learning_rate * tree.predict_row(row);
                }
                trees.push(tree);
            }

            forests.push(trees);
        }

        self.n_features = n_features;
        self.base_score = base_score;
        self.forests = forests;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<u8>, ModelError> {
        self.check_input(x)?;
        Ok(x.iter()
            .map(|row| {
                let scores = self.scores_row(row);
                // First maximum wins: stable under float ties.
                let mut best = 0;
                for (k, &s) in scores.iter().enumerate() {
                    if s > scores[best] {
                        best = k;
                    }
                }
                best as u8
            })
            .collect())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        self.check_input(x)?;
        Ok(x.iter()
            .map(|row| {
                let raw: Vec<f64> = self.scores_row(row).iter().map(|&s| sigmoid(s)).collect();
                let total: f64 = raw.iter().sum();
                if total > 0.0 {
                    raw.iter().map(|p| p / total).collect()
                } else {
                    vec![1.0 / self.n_classes as f64; self.n_classes]
                }
            })
            .collect())
    }
}

/// Row indices for one tree: all rows, or a seeded sample without
/// replacement, sorted so tree construction order stays stable.
fn sample_rows(n: usize, subsample: f64, rng: &mut StdRng) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..n).collect();
    }
    let amount = ((n as f64 * subsample).round() as usize).max(1).min(n);
    let mut picked = rand::seq::index::sample(rng, n, amount).into_vec();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_params() -> GbdtParams {
        GbdtParams {
            n_estimators: 40,
            max_depth: 3,
            learning_rate: 0.3,
            min_samples_leaf: 1,
            subsample: 1.0,
            n_bins: 16,
            seed: 42,
        }
    }

    /// Three linearly separable clusters in 2D.
    fn clustered_data() -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..30 {
            let jitter = (i % 5) as f64 * 0.01;
            x.push(vec![-5.0 + jitter, -5.0 - jitter]);
            y.push(0);
            x.push(vec![0.0 + jitter, 5.0 + jitter]);
            y.push(1);
            x.push(vec![5.0 - jitter, -5.0 + jitter]);
            y.push(2);
        }
        (x, y)
    }

    #[test]
    fn fits_separable_clusters() {
        let (x, y) = clustered_data();
        let mut model = GbdtClassifier::new(quick_params(), 3);
        model.fit(&x, &y).unwrap();
        let preds = model.predict(&x).unwrap();
        let correct = preds.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(
            correct as f64 / y.len() as f64 > 0.95,
            "train accuracy too low: {correct}/{}",
            y.len()
        );
    }

    #[test]
    fn training_is_deterministic_for_fixed_seed() {
        let (x, y) = clustered_data();
        let params = GbdtParams {
            subsample: 0.8,
            ..quick_params()
        };

        let mut a = GbdtClassifier::new(params.clone(), 3);
        a.fit(&x, &y).unwrap();
        let mut b = GbdtClassifier::new(params, 3);
        b.fit(&x, &y).unwrap();

        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
        let pa = a.predict_proba(&x).unwrap();
        let pb = b.predict_proba(&x).unwrap();
        for (ra, rb) in pa.iter().zip(&pb) {
            for (va, vb) in ra.iter().zip(rb) {
                assert!((va - vb).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn proba_rows_sum_to_one() {
        let (x, y) = clustered_data();
        let mut model = GbdtClassifier::new(quick_params(), 3);
        model.fit(&x, &y).unwrap();
        for row in model.predict_proba(&x).unwrap() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            assert_eq!(row.len(), 3);
        }
    }

    #[test]
    fn predict_before_fit_is_an_error() {
        let model = GbdtClassifier::new(quick_params(), 3);
        assert!(matches!(
            model.predict(&[vec![0.0, 0.0]]),
            Err(ModelError::NotTrained)
        ));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let (x, y) = clustered_data();
        let mut model = GbdtClassifier::new(quick_params(), 3);
        model.fit(&x, &y).unwrap();
        assert!(matches!(
            model.predict(&[vec![0.0]]),
            Err(ModelError::DimensionMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn class_out_of_range_is_an_error() {
        let x = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let y = vec![0, 7];
        let mut model = GbdtClassifier::new(quick_params(), 3);
        assert!(matches!(
            model.fit(&x, &y),
            Err(ModelError::ClassOutOfRange { class: 7, .. })
        ));
    }

    #[test]
    fn empty_training_set_is_an_error() {
        let mut model = GbdtClassifier::new(quick_params(), 3);
        assert!(matches!(
            model.fit(&[], &[]),
            Err(ModelError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn missing_class_in_training_still_predicts_valid_indices() {
        // A walk-forward block may lack one of the three classes.
        let x: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![i as f64, (i % 7) as f64])
            .collect();
        let y: Vec<u8> = (0..40).map(|i| if i < 20 { 0 } else { 2 }).collect();
        let mut model = GbdtClassifier::new(quick_params(), 3);
        model.fit(&x, &y).unwrap();
        for p in model.predict(&x).unwrap() {
            assert!(p < 3);
        }
    }

    #[test]
    fn artifact_roundtrips_through_json() {
        let (x, y) = clustered_data();
        let mut model = GbdtClassifier::new(quick_params(), 3);
        model.fit(&x, &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: GbdtClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(model.predict(&x).unwrap(), restored.predict(&x).unwrap());
    }
}
