//! Isolation Forest anomaly detection

use crate::anomaly::{AnomalyDetector, TreeEnsemble};
use crate::error::{AuditError, Result};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful search in a BST of `n` nodes.
///
/// c(n) = 2 * H(n-1) - 2(n-1)/n, with H(i) ~ ln(i) + gamma
pub fn average_path_length(n: usize) -> f64 {
    if n <= 1 {
        0.0
    } else if n == 2 {
        1.0
    } else {
        let n_f = n as f64;
        2.0 * ((n_f - 1.0).ln() + EULER_GAMMA) - 2.0 * (n_f - 1.0) / n_f
    }
}

/// Isolation Tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IsolationTree {
    /// Internal node with split
    Internal {
        /// Feature index for split
        feature: usize,
        /// Split threshold
        threshold: f64,
        /// Number of training samples that reached this node
        size: usize,
        /// Left subtree (values < threshold)
        left: Box<IsolationTree>,
        /// Right subtree (values >= threshold)
        right: Box<IsolationTree>,
    },
    /// External (leaf) node
    External {
        /// Number of samples in this node
        size: usize,
    },
}

impl IsolationTree {
    /// Build an isolation tree over the rows in `indices`
    pub fn build(
        x: &Array2<f64>,
        indices: &[usize],
        height: usize,
        max_height: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let n_samples = indices.len();

        if height >= max_height || n_samples <= 1 {
            return IsolationTree::External { size: n_samples };
        }

        // Only features that still vary inside this node can split it
        let candidates: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|feature| {
                let (min_val, max_val) = indices.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), &i| (lo.min(x[[i, feature]]), hi.max(x[[i, feature]])),
                );
                (max_val > min_val).then_some((feature, min_val, max_val))
            })
            .collect();

        if candidates.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        let (feature, min_val, max_val) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min_val..max_val);

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, feature]] < threshold);

        if left_indices.is_empty() || right_indices.is_empty() {
            return IsolationTree::External { size: n_samples };
        }

        let left = Box::new(Self::build(x, &left_indices, height + 1, max_height, rng));
        let right = Box::new(Self::build(x, &right_indices, height + 1, max_height, rng));

        IsolationTree::Internal {
            feature,
            threshold,
            size: n_samples,
            left,
            right,
        }
    }

    /// Number of training samples covered by this node
    pub fn size(&self) -> usize {
        match self {
            IsolationTree::Internal { size, .. } | IsolationTree::External { size } => *size,
        }
    }

    /// Compute path length for a sample
    pub fn path_length(&self, sample: &[f64], current_height: usize) -> f64 {
        match self {
            IsolationTree::External { size } => {
                current_height as f64 + average_path_length(*size)
            }
            IsolationTree::Internal {
                feature,
                threshold,
                left,
                right,
                ..
            } => {
                if sample[*feature] < *threshold {
                    left.path_length(sample, current_height + 1)
                } else {
                    right.path_length(sample, current_height + 1)
                }
            }
        }
    }

    /// Path length averaged over the training samples, weighted by leaf size
    pub fn expected_path_length(&self) -> f64 {
        let total = self.size();
        if total == 0 {
            return 0.0;
        }
        self.weighted_leaf_sum(0) / total as f64
    }

    fn weighted_leaf_sum(&self, depth: usize) -> f64 {
        match self {
            IsolationTree::External { size } => {
                *size as f64 * (depth as f64 + average_path_length(*size))
            }
            IsolationTree::Internal { left, right, .. } => {
                left.weighted_leaf_sum(depth + 1) + right.weighted_leaf_sum(depth + 1)
            }
        }
    }

    /// Depth of the deepest leaf
    pub fn depth(&self) -> usize {
        match self {
            IsolationTree::External { .. } => 0,
            IsolationTree::Internal { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Hyperparameters of the isolation ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationForestConfig {
    /// Number of trees
    pub n_estimators: usize,
    /// Maximum samples drawn (without replacement) per tree
    pub max_samples: usize,
    /// Expected proportion of anomalies, in (0, 0.5]
    ///
    /// At most about this share of the training rows is flagged; it is not a
    /// target. Rows whose score ties the offset are not flagged, so on heavily
    /// tied data far fewer rows (possibly none) are flagged.
    pub contamination: f64,
    /// Random seed
    pub seed: u64,
    /// Smallest subsample a tree may be grown on; fitting needs twice this
    pub min_samples_per_tree: usize,
}

impl Default for IsolationForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.05,
            seed: 42,
            min_samples_per_tree: 2,
        }
    }
}

impl IsolationForestConfig {
    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(AuditError::InvalidParameter {
                name: "contamination".to_string(),
                value: self.contamination.to_string(),
                reason: "must be in (0, 0.5]".to_string(),
            });
        }
        if self.n_estimators == 0 {
            return Err(AuditError::InvalidParameter {
                name: "n_estimators".to_string(),
                value: "0".to_string(),
                reason: "at least one tree is required".to_string(),
            });
        }
        if self.min_samples_per_tree < 2 {
            return Err(AuditError::InvalidParameter {
                name: "min_samples_per_tree".to_string(),
                value: self.min_samples_per_tree.to_string(),
                reason: "must be at least 2".to_string(),
            });
        }
        if self.max_samples < self.min_samples_per_tree {
            return Err(AuditError::InvalidParameter {
                name: "max_samples".to_string(),
                value: self.max_samples.to_string(),
                reason: format!("must be at least min_samples_per_tree ({})", self.min_samples_per_tree),
            });
        }
        Ok(())
    }

    /// Minimum number of rows accepted by `fit`
    pub fn min_rows(&self) -> usize {
        2 * self.min_samples_per_tree
    }
}

/// Isolation Forest anomaly detector
///
/// Immutable once fitted: the trees, offset and subsample size are only
/// written by [`AnomalyDetector::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    config: IsolationForestConfig,
    /// Fitted trees
    trees: Option<Vec<IsolationTree>>,
    /// Raw-score quantile at the contamination rate
    offset: Option<f64>,
    /// Samples each tree was grown on
    subsample_size: Option<usize>,
    /// Number of features seen during fit
    n_features: Option<usize>,
}

impl IsolationForest {
    /// Create new Isolation Forest with default hyperparameters
    pub fn new() -> Self {
        Self::with_config(IsolationForestConfig::default())
    }

    pub fn with_config(config: IsolationForestConfig) -> Self {
        Self {
            config,
            trees: None,
            offset: None,
            subsample_size: None,
            n_features: None,
        }
    }

    /// Build and fit a forest in one step
    pub fn train(config: IsolationForestConfig, x: &Array2<f64>) -> Result<Self> {
        let mut forest = Self::with_config(config);
        forest.fit(x)?;
        Ok(forest)
    }

    /// Set number of trees
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.config.n_estimators = n;
        self
    }

    /// Set maximum samples per tree
    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.config.max_samples = n;
        self
    }

    /// Set contamination ratio
    pub fn with_contamination(mut self, c: f64) -> Self {
        self.config.contamination = c;
        self
    }

    /// Set random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn config(&self) -> &IsolationForestConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.trees.is_some()
    }

    /// Subsample size each tree was grown on
    pub fn subsample_size(&self) -> Option<usize> {
        self.subsample_size
    }

    /// Mean path length of every row across all trees
    pub fn mean_path_lengths(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let trees = self.trees.as_ref().ok_or(AuditError::ModelNotFitted)?;
        self.check_width(x)?;

        let scores: Vec<f64> = x
            .rows()
            .into_iter()
            .map(|row| {
                let sample = row.to_vec();
                trees
                    .iter()
                    .map(|tree| tree.path_length(&sample, 0))
                    .sum::<f64>()
                    / trees.len() as f64
            })
            .collect();

        Ok(Array1::from_vec(scores))
    }

    fn check_width(&self, x: &Array2<f64>) -> Result<()> {
        match self.n_features {
            Some(n) if n != x.ncols() => Err(AuditError::ShapeError {
                expected: format!("{} features", n),
                actual: format!("{} features", x.ncols()),
            }),
            _ => Ok(()),
        }
    }

    /// s(x) = -2^(-E[h(x)] / c(psi))
    fn raw_score(&self, mean_path_length: f64) -> f64 {
        let c_n = average_path_length(self.subsample_size.unwrap_or(self.config.max_samples));
        -(2.0_f64.powf(-mean_path_length / c_n))
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-interpolated quantile of an ascending slice
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

impl AnomalyDetector for IsolationForest {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        self.config.validate()?;

        let n_samples = x.nrows();
        let required = self.config.min_rows();
        if n_samples < required {
            return Err(AuditError::InsufficientData {
                required,
                actual: n_samples,
            });
        }
        if x.ncols() == 0 {
            return Err(AuditError::NoFeaturesSelected);
        }
        if let Some(((row, col), v)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(AuditError::InvalidFeatureData {
                column: format!("#{}", col),
                row,
                reason: format!("non-finite value {}", v),
            });
        }

        let start = Instant::now();
        let samples_per_tree = self.config.max_samples.min(n_samples);
        let max_height = (samples_per_tree as f64).log2().ceil() as usize;

        // One seed per tree, drawn up front, so tree i never depends on
        // how many random numbers trees 0..i consumed
        let mut master = StdRng::seed_from_u64(self.config.seed);
        let tree_seeds: Vec<u64> = (0..self.config.n_estimators).map(|_| master.gen()).collect();

        let trees: Vec<IsolationTree> = tree_seeds
            .into_iter()
            .map(|seed| {
                let mut rng = StdRng::seed_from_u64(seed);
                let indices = rand::seq::index::sample(&mut rng, n_samples, samples_per_tree).into_vec();
                IsolationTree::build(x, &indices, 0, max_height, &mut rng)
            })
            .collect();

        self.trees = Some(trees);
        self.subsample_size = Some(samples_per_tree);
        self.n_features = Some(x.ncols());
        self.offset = None;

        let mut raw = self.score_samples(x)?.to_vec();
        raw.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let offset = quantile(&raw, self.config.contamination);
        self.offset = Some(offset);

        debug!(max_height, samples_per_tree, "Isolation trees grown");
        info!(
            n_estimators = self.config.n_estimators,
            n_samples,
            n_features = x.ncols(),
            offset,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "IsolationForest fitted"
        );

        Ok(())
    }

    fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.mean_path_lengths(x)?.mapv(|h| self.raw_score(h)))
    }

    fn offset(&self) -> f64 {
        self.offset.unwrap_or(0.0)
    }

    fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let offset = self.offset.ok_or(AuditError::ModelNotFitted)?;
        Ok(self.score_samples(x)?.mapv(|s| s - offset))
    }

    fn tree_ensemble(&self) -> Option<&dyn TreeEnsemble> {
        if self.is_fitted() {
            Some(self as &dyn TreeEnsemble)
        } else {
            None
        }
    }
}

impl TreeEnsemble for IsolationForest {
    fn trees(&self) -> &[IsolationTree] {
        self.trees.as_deref().unwrap_or(&[])
    }

    fn n_features(&self) -> usize {
        self.n_features.unwrap_or(0)
    }

    fn score_from_path_length(&self, mean_path_length: f64) -> f64 {
        self.raw_score(mean_path_length) - self.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalyLabel;

    fn clustered_with_outliers() -> Array2<f64> {
        // Normal data cluster: 50 points with 2 features each
        let mut data = Vec::new();
        for i in 0..50 {
            data.push((i % 10) as f64);
            data.push(((i % 10) + 1) as f64);
        }
        // Add 2 outliers
        data.extend_from_slice(&[100.0, 100.0]);
        data.extend_from_slice(&[-50.0, -50.0]);

        Array2::from_shape_vec((52, 2), data).unwrap()
    }

    #[test]
    fn test_isolation_forest_basic() {
        let x = clustered_with_outliers();

        let mut iforest = IsolationForest::new()
            .with_n_estimators(50)
            .with_contamination(0.05)
            .with_seed(42);

        iforest.fit(&x).unwrap();

        let scores = iforest.decision_function(&x).unwrap();
        let labels = iforest.classify(&x).unwrap();

        // Outliers should have lower scores
        assert!(scores[50] < scores[0]);
        assert!(scores[51] < scores[0]);
        assert_eq!(labels[50], AnomalyLabel::Anomaly);
        assert_eq!(labels[51], AnomalyLabel::Anomaly);
    }

    #[test]
    fn test_fit_predict_and_detect_agree() {
        let x = clustered_with_outliers();
        let mut iforest = IsolationForest::new().with_max_samples(32);
        let codes = iforest.fit_predict(&x).unwrap();
        assert_eq!(iforest.subsample_size(), Some(32));

        let result = iforest.detect(&x).unwrap();
        assert_eq!(result.offset, iforest.offset());
        assert_eq!(result.n_anomalies, codes.iter().filter(|&&c| c == -1).count());
        for (code, label) in codes.iter().zip(&result.labels) {
            assert_eq!(*code, label.code());
        }
    }

    #[test]
    fn test_raw_scores_bounded() {
        let x = clustered_with_outliers();
        let iforest = IsolationForest::train(IsolationForestConfig::default(), &x).unwrap();
        for &s in iforest.score_samples(&x).unwrap().iter() {
            assert!((-1.0..=0.0).contains(&s), "raw score {} out of range", s);
        }
    }

    #[test]
    fn test_fit_is_deterministic() {
        let x = clustered_with_outliers();
        let a = IsolationForest::train(IsolationForestConfig::default(), &x).unwrap();
        let b = IsolationForest::train(IsolationForestConfig::default(), &x).unwrap();
        assert_eq!(a.trees(), b.trees());
        assert_eq!(a.decision_function(&x).unwrap(), b.decision_function(&x).unwrap());
    }

    #[test]
    fn test_different_seed_changes_trees() {
        let x = clustered_with_outliers();
        let a = IsolationForestConfig { seed: 1, ..Default::default() };
        let b = IsolationForestConfig { seed: 2, ..Default::default() };
        let a = IsolationForest::train(a, &x).unwrap();
        let b = IsolationForest::train(b, &x).unwrap();
        assert_ne!(a.trees(), b.trees());
    }

    #[test]
    fn test_insufficient_data() {
        let x = Array2::from_shape_vec((1, 2), vec![1.0, 2.0]).unwrap();
        let result = IsolationForest::new().fit(&x);
        assert!(matches!(
            result,
            Err(AuditError::InsufficientData { required: 4, actual: 1 })
        ));
    }

    #[test]
    fn test_invalid_contamination() {
        let x = clustered_with_outliers();
        for c in [0.0, 0.6, f64::NAN] {
            let result = IsolationForest::new().with_contamination(c).fit(&x);
            assert!(matches!(result, Err(AuditError::InvalidParameter { .. })));
        }
    }

    #[test]
    fn test_score_before_fit() {
        let x = clustered_with_outliers();
        let result = IsolationForest::new().decision_function(&x);
        assert!(matches!(result, Err(AuditError::ModelNotFitted)));
    }

    #[test]
    fn test_width_mismatch() {
        let x = clustered_with_outliers();
        let iforest = IsolationForest::train(IsolationForestConfig::default(), &x).unwrap();
        let narrow = Array2::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            iforest.score_samples(&narrow),
            Err(AuditError::ShapeError { .. })
        ));
    }

    #[test]
    fn test_constant_data_builds_leaves() {
        let x = Array2::from_elem((20, 3), 7.0);
        let iforest = IsolationForest::train(IsolationForestConfig::default(), &x).unwrap();
        assert!(iforest.trees().iter().all(|t| t.depth() == 0));
        // All rows tie exactly on the offset, so nothing is flagged
        let labels = iforest.classify(&x).unwrap();
        assert!(labels.iter().all(|l| *l == AnomalyLabel::Normal));
    }

    #[test]
    fn test_tied_data_never_exceeds_contamination() {
        // 15 distinct points repeated over 1000 rows
        let x = Array2::from_shape_fn((1000, 2), |(i, j)| ((i * (j + 3)) % 5) as f64);
        let iforest = IsolationForest::train(IsolationForestConfig::default(), &x).unwrap();
        let flagged = iforest
            .classify(&x)
            .unwrap()
            .iter()
            .filter(|l| l.is_anomaly())
            .count();
        assert!(flagged <= 50, "flagged {} of 1000", flagged);
    }

    #[test]
    fn test_isolation_tree_path_length() {
        let x = Array2::from_shape_vec(
            (10, 2),
            vec![
                1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0, 5.0, 5.0,
                6.0, 6.0, 7.0, 7.0, 8.0, 8.0, 9.0, 9.0, 10.0, 10.0,
            ],
        ).unwrap();

        let indices: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(42);
        let tree = IsolationTree::build(&x, &indices, 0, 10, &mut rng);

        assert_eq!(tree.size(), 10);
        let path = tree.path_length(&[5.0, 5.0], 0);
        assert!(path > 0.0);
        assert!(tree.expected_path_length() > 0.0);
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn test_quantile_interpolates() {
        let v = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(quantile(&v, 0.0), 0.0);
        assert_eq!(quantile(&v, 0.5), 1.5);
        assert_eq!(quantile(&v, 1.0), 3.0);
    }
}
