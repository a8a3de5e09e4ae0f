/*!
# Segmentation Agreement Metrics

Rand- and variation-of-information-based agreement between a predicted
labeling and a ground truth of the same shape. Both metrics are computed
from the contingency table `N[a, b]` counting voxels labeled `a` in the
prediction and `b` in the ground truth; voxels that are background (`0`) in
either volume are excluded.

With `p_ab = N[a, b] / N`, row marginals `p_a` (prediction) and column
marginals `q_b` (ground truth):

- `rand_split = Σ p_ab² / Σ q_b²`, `rand_merge = Σ p_ab² / Σ p_a²`;
  perfect agreement gives 1 for both.
- `voi_split = −Σ p_ab · log₂(p_ab / q_b)`,
  `voi_merge = −Σ p_ab · log₂(p_ab / p_a)`; perfect agreement gives 0 for
  both. VOI is reported in bits.
*/

use std::collections::HashMap;

use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

use crate::core::error::{AquiferError, Result};

/// The four agreement scores between a segmentation and a ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMetrics {
    pub rand_split: f64,
    pub rand_merge: f64,
    pub voi_split: f64,
    pub voi_merge: f64,
}

impl SegmentationMetrics {
    /// The scores of perfect agreement; also returned when no voxel is
    /// foreground in both volumes, so fully-suppressed segmentations can
    /// still be scored.
    pub fn perfect() -> Self {
        Self {
            rand_split: 1.0,
            rand_merge: 1.0,
            voi_split: 0.0,
            voi_merge: 0.0,
        }
    }
}

/// Computes the agreement metrics between a prediction and a ground truth.
///
/// # Errors
/// Fails if the two volumes differ in shape.
pub fn evaluate(
    prediction: &ArrayView3<u64>,
    ground_truth: &ArrayView3<u64>,
) -> Result<SegmentationMetrics> {
    if prediction.dim() != ground_truth.dim() {
        let p = prediction.dim();
        let g = ground_truth.dim();
        return Err(AquiferError::shape_mismatch(format!(
            "segmentation ({}, {}, {}) does not match ground truth ({}, {}, {})",
            p.0, p.1, p.2, g.0, g.1, g.2
        )));
    }

    let mut table: HashMap<(u64, u64), u64> = HashMap::new();
    for (&a, &b) in prediction.iter().zip(ground_truth.iter()) {
        if a == 0 || b == 0 {
            continue;
        }
        *table.entry((a, b)).or_insert(0) += 1;
    }
    let total: u64 = table.values().sum();
    if total == 0 {
        return Ok(SegmentationMetrics::perfect());
    }

    let mut prediction_marginal: HashMap<u64, u64> = HashMap::new();
    let mut truth_marginal: HashMap<u64, u64> = HashMap::new();
    for (&(a, b), &n) in &table {
        *prediction_marginal.entry(a).or_insert(0) += n;
        *truth_marginal.entry(b).or_insert(0) += n;
    }

    // Sums of squared counts stay in integers so that the common 1/N²
    // factor cancels exactly and self-agreement comes out as exactly 1.
    let sum_squares = |counts: &HashMap<u64, u64>| -> u128 {
        counts.values().map(|&n| n as u128 * n as u128).sum()
    };
    let pair_squares: u128 = table.values().map(|&n| n as u128 * n as u128).sum();

    let total = total as f64;
    let mut voi_split = 0.0;
    let mut voi_merge = 0.0;
    for (&(a, b), &n) in &table {
        let p_ab = n as f64 / total;
        let p_a = prediction_marginal[&a] as f64 / total;
        let q_b = truth_marginal[&b] as f64 / total;
        voi_split -= p_ab * (p_ab / q_b).log2();
        voi_merge -= p_ab * (p_ab / p_a).log2();
    }

    Ok(SegmentationMetrics {
        rand_split: pair_squares as f64 / sum_squares(&truth_marginal) as f64,
        rand_merge: pair_squares as f64 / sum_squares(&prediction_marginal) as f64,
        voi_split,
        voi_merge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_self_agreement_is_perfect() {
        let mut volume = Array3::zeros((2, 2, 2));
        for (i, v) in volume.iter_mut().enumerate() {
            *v = (i as u64 % 3) + 1;
        }
        let scores = evaluate(&volume.view(), &volume.view()).unwrap();
        assert_eq!(scores, SegmentationMetrics::perfect());
    }

    #[test]
    fn test_background_is_excluded() {
        // The only foreground-in-both voxel agrees, so agreement is perfect
        // no matter how the background voxels are labeled.
        let mut prediction = Array3::zeros((1, 1, 3));
        let mut truth = Array3::zeros((1, 1, 3));
        prediction[[0, 0, 0]] = 1;
        truth[[0, 0, 0]] = 7;
        prediction[[0, 0, 1]] = 5;
        truth[[0, 0, 2]] = 5;
        let scores = evaluate(&prediction.view(), &truth.view()).unwrap();
        assert_eq!(scores, SegmentationMetrics::perfect());
    }

    #[test]
    fn test_split_is_penalized() {
        // Ground truth has one object; the prediction splits it in two.
        let mut prediction = Array3::zeros((1, 1, 4));
        let truth = Array3::ones((1, 1, 4));
        prediction[[0, 0, 0]] = 1;
        prediction[[0, 0, 1]] = 1;
        prediction[[0, 0, 2]] = 2;
        prediction[[0, 0, 3]] = 2;
        let scores = evaluate(&prediction.view(), &truth.view()).unwrap();
        assert!(scores.rand_split < 1.0);
        assert_eq!(scores.rand_merge, 1.0);
        assert!((scores.voi_split - 1.0).abs() < 1e-12);
        assert_eq!(scores.voi_merge, 0.0);
    }

    #[test]
    fn test_merge_is_penalized() {
        // The prediction merges two ground-truth objects.
        let prediction = Array3::ones((1, 1, 4));
        let mut truth = Array3::zeros((1, 1, 4));
        truth[[0, 0, 0]] = 1;
        truth[[0, 0, 1]] = 1;
        truth[[0, 0, 2]] = 2;
        truth[[0, 0, 3]] = 2;
        let scores = evaluate(&prediction.view(), &truth.view()).unwrap();
        assert!(scores.rand_merge < 1.0);
        assert_eq!(scores.rand_split, 1.0);
        assert!((scores.voi_merge - 1.0).abs() < 1e-12);
        assert_eq!(scores.voi_split, 0.0);
    }

    #[test]
    fn test_all_background_scores_as_perfect() {
        let volume = Array3::<u64>::zeros((2, 2, 2));
        let scores = evaluate(&volume.view(), &volume.view()).unwrap();
        assert_eq!(scores, SegmentationMetrics::perfect());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let a = Array3::<u64>::zeros((1, 2, 3));
        let b = Array3::<u64>::zeros((3, 2, 1));
        assert!(evaluate(&a.view(), &b.view()).is_err());
    }
}
