/*!
# Volume Types and Entry Validation

This module defines the array types the engine operates on and the
precondition checks shared by the public entry points:

- **Affinity volume:** `(3, D, H, W)` array of `f32` in `[0, 1]`. Channel `0`
  holds the affinity between voxel `(z, y, x)` and `(z-1, y, x)`; channels
  `1` and `2` likewise for the y− and x− neighbors. Out-of-range neighbors
  contribute no edge.
- **Label volume:** `(D, H, W)` array of `u64`. Label `0` is reserved for
  background voxels.

Validation helpers return descriptive [`AquiferError`]s so that every entry
point fails before touching data, with no partial output.
*/

use ndarray::{Array3, Array4, ArrayView3, ArrayView4};

use crate::core::error::{AquiferError, Result};

/// Affinity channels, in the order of the leading array axis.
pub const CHANNELS: usize = 3;

/// A dense affinity volume with shape `(3, D, H, W)`.
pub type AffinityVolume = Array4<f32>;

/// A dense label volume with shape `(D, H, W)`. Label `0` is background.
pub type LabelVolume = Array3<u64>;

/// Returns the spatial shape `(D, H, W)` of an affinity volume.
pub fn spatial_shape(affinities: &ArrayView4<f32>) -> (usize, usize, usize) {
    let s = affinities.shape();
    (s[1], s[2], s[3])
}

/// Checks that an affinity volume has exactly three channels.
pub fn validate_affinities(affinities: &ArrayView4<f32>) -> Result<()> {
    let s = affinities.shape();
    if s[0] != CHANNELS {
        return Err(AquiferError::shape_mismatch(format!(
            "affinities must have shape (3, D, H, W), got ({}, {}, {}, {})",
            s[0], s[1], s[2], s[3]
        )));
    }
    Ok(())
}

/// Checks that a label volume spatially matches an affinity volume.
pub fn validate_labels_match(
    labels: &ArrayView3<u64>,
    affinities: &ArrayView4<f32>,
    what: &str,
) -> Result<()> {
    let (d, h, w) = spatial_shape(affinities);
    if labels.dim() != (d, h, w) {
        let l = labels.dim();
        return Err(AquiferError::shape_mismatch(format!(
            "{} shape ({}, {}, {}) does not match affinities ({}, {}, {})",
            what, l.0, l.1, l.2, d, h, w
        )));
    }
    Ok(())
}

/// Checks that a threshold sequence is non-decreasing.
///
/// A decreasing step fails fast; `NaN` thresholds are rejected as well since
/// they cannot be ordered against the merge scores.
pub fn validate_thresholds(thresholds: &[f32]) -> Result<()> {
    for pair in thresholds.windows(2) {
        if pair[1] < pair[0] {
            return Err(AquiferError::invalid_input(format!(
                "thresholds must be non-decreasing, got {} after {}",
                pair[1], pair[0]
            )));
        }
    }
    if thresholds.iter().any(|t| t.is_nan()) {
        return Err(AquiferError::invalid_input("thresholds must not be NaN"));
    }
    Ok(())
}

/// Checks that the watershed clamp thresholds are ordered and in `[0, 1]`.
pub fn validate_clamp_range(low: f32, high: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
        return Err(AquiferError::invalid_input(format!(
            "affinity thresholds must satisfy 0 <= low <= high <= 1, got low={}, high={}",
            low, high
        )));
    }
    Ok(())
}

/// Clamps every affinity into `[0, 1]` in place. Out-of-range values are
/// repaired without error; `NaN` becomes `0`.
pub fn clamp_affinities(affinities: &mut AffinityVolume) {
    affinities.mapv_inplace(|a| if a.is_nan() { 0.0 } else { a.clamp(0.0, 1.0) });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_channel_check() {
        let a = Array4::<f32>::zeros((2, 4, 4, 4));
        assert!(validate_affinities(&a.view()).is_err());
        let a = Array4::<f32>::zeros((3, 4, 4, 4));
        assert!(validate_affinities(&a.view()).is_ok());
    }

    #[test]
    fn test_threshold_order() {
        assert!(validate_thresholds(&[0.0, 0.2, 0.2, 0.9]).is_ok());
        assert!(validate_thresholds(&[0.5, 0.2]).is_err());
        assert!(validate_thresholds(&[0.1, f32::NAN]).is_err());
    }

    #[test]
    fn test_clamp_repairs_out_of_range() {
        let mut a = Array4::<f32>::zeros((3, 1, 1, 1));
        a[[0, 0, 0, 0]] = 1.5;
        a[[1, 0, 0, 0]] = -0.25;
        a[[2, 0, 0, 0]] = f32::NAN;
        clamp_affinities(&mut a);
        assert_eq!(a[[0, 0, 0, 0]], 1.0);
        assert_eq!(a[[1, 0, 0, 0]], 0.0);
        assert_eq!(a[[2, 0, 0, 0]], 0.0);
    }
}
