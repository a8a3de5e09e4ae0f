// tests/test_fragments.rs

use aquifer::fragments::watershed;
use ndarray::{Array4, s};

/// Two 2x2x2 blocks along x, strongly connected inside and disconnected
/// from each other.
fn two_block_affinities() -> Array4<f32> {
    let mut affinities = Array4::zeros((3, 2, 2, 4));
    affinities.slice_mut(s![0, 1, .., ..]).fill(0.9);
    affinities.slice_mut(s![1, .., 1, ..]).fill(0.9);
    affinities.slice_mut(s![2, .., .., 1]).fill(0.9);
    affinities.slice_mut(s![2, .., .., 3]).fill(0.9);
    affinities
}

#[test]
fn test_disconnected_blocks_become_two_fragments() {
    let affinities = two_block_affinities();
    let labels = watershed(&affinities.view(), 0.0001, 0.9999).unwrap();
    for z in 0..2 {
        for y in 0..2 {
            assert_eq!(labels[[z, y, 0]], 1);
            assert_eq!(labels[[z, y, 1]], 1);
            assert_eq!(labels[[z, y, 2]], 2);
            assert_eq!(labels[[z, y, 3]], 2);
        }
    }
}

#[test]
fn test_raising_low_threshold_suppresses_weakly_attached_voxels() {
    // A 1x1x3 line with edges 0.3 and 0.9: the first voxel's only edge is
    // the weak one.
    let mut affinities = Array4::zeros((3, 1, 1, 3));
    affinities[[2, 0, 0, 1]] = 0.3;
    affinities[[2, 0, 0, 2]] = 0.9;

    let joined = watershed(&affinities.view(), 0.1, 0.9999).unwrap();
    assert!(joined.iter().all(|&l| l == 1));

    let suppressed = watershed(&affinities.view(), 0.5, 0.9999).unwrap();
    assert_eq!(suppressed[[0, 0, 0]], 0);
    assert_eq!(suppressed[[0, 0, 1]], 1);
    assert_eq!(suppressed[[0, 0, 2]], 1);
}

#[test]
fn test_labels_are_dense_in_raster_order() {
    let affinities = two_block_affinities();
    let labels = watershed(&affinities.view(), 0.0001, 0.9999).unwrap();
    let mut seen = Vec::new();
    for &label in labels.iter() {
        if label != 0 && !seen.contains(&label) {
            seen.push(label);
        }
    }
    // First-appearance order assigns 1, 2, ... without gaps.
    assert_eq!(seen, (1..=seen.len() as u64).collect::<Vec<_>>());
}

#[test]
fn test_out_of_range_values_are_repaired() {
    let mut affinities = two_block_affinities();
    affinities[[2, 0, 0, 1]] = 7.5;
    affinities[[1, 0, 1, 0]] = -2.0;
    let labels = watershed(&affinities.view(), 0.0001, 0.9999).unwrap();
    // Clamping keeps the strong link and drops the negative one to zero.
    assert_eq!(labels[[0, 0, 0]], labels[[0, 0, 1]]);
}
