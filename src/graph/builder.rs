/*!
# Region Graph Construction

A single pass over the three affinity slabs turns a fragment labeling into a
region graph. For every voxel pair `(p, q)` that is 6-connected across an
affinity, with distinct nonzero labels `(u, v)`, the canonical edge
`(min(u, v), max(u, v))` receives one contact-area increment and one
statistic update with the *raw* affinity value; the watershed's clamping
does not apply here. Region sizes are tallied from the labeling in the same
pass.
*/

use ndarray::{ArrayView3, ArrayView4};
use tracing::debug;

use crate::core::error::{AquiferError, Result};
use crate::core::volume::{spatial_shape, validate_affinities, validate_labels_match};
use crate::graph::RegionGraph;
use crate::graph::statistics::StatisticPlan;

/// Builds the region graph for a fragment labeling.
///
/// # Arguments
/// * `affinities` - `(3, D, H, W)` affinity volume, raw values.
/// * `labels` - `(D, H, W)` fragment labeling; label `0` is background.
/// * `plan` - the statistic aggregations each edge must maintain.
///
/// # Errors
/// Fails if the shapes do not match, or if the labeling's maximum label
/// exceeds the voxel count (region bookkeeping is indexed by label, so an
/// unbounded maximum would turn a labeling bug into an allocation blowup).
pub fn build_region_graph(
    affinities: &ArrayView4<f32>,
    labels: &ArrayView3<u64>,
    plan: StatisticPlan,
) -> Result<RegionGraph> {
    validate_affinities(affinities)?;
    validate_labels_match(labels, affinities, "fragments")?;

    let (d, h, w) = spatial_shape(affinities);
    let voxels = (d * h * w) as u64;
    let max_label = labels.iter().copied().max().unwrap_or(0);
    if max_label > voxels {
        return Err(AquiferError::invalid_input(format!(
            "maximum fragment label {} exceeds the voxel count {}",
            max_label, voxels
        )));
    }

    let mut graph = RegionGraph::new(max_label, plan);

    for &label in labels.iter() {
        if label != 0 {
            graph.count_voxel(label);
        }
    }

    // One slab per axis; the edge at (c, z, y, x) joins the voxel with its
    // negative neighbor along that axis.
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let label = labels[[z, y, x]];
                if label == 0 {
                    continue;
                }
                if z > 0 {
                    link(&mut graph, label, labels[[z - 1, y, x]], affinities[[0, z, y, x]]);
                }
                if y > 0 {
                    link(&mut graph, label, labels[[z, y - 1, x]], affinities[[1, z, y, x]]);
                }
                if x > 0 {
                    link(&mut graph, label, labels[[z, y, x - 1]], affinities[[2, z, y, x]]);
                }
            }
        }
    }

    debug!(
        regions = max_label,
        edges = graph.edge_count(),
        "region graph built"
    );

    Ok(graph)
}

fn link(graph: &mut RegionGraph, label: u64, neighbor: u64, affinity: f32) {
    if neighbor != 0 && neighbor != label {
        graph.record_affinity(label, neighbor, affinity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::statistics::{SampleRetention, StatisticPlan};
    use ndarray::{Array3, Array4};

    fn plan() -> StatisticPlan {
        StatisticPlan {
            min: true,
            max: true,
            mean: true,
            histogram_bins: None,
            samples: SampleRetention::None,
        }
    }

    #[test]
    fn test_two_slab_volume() {
        // Two z-slabs of a 2x2x2 volume, labels 1 and 2; four z-edges.
        let mut affs = Array4::zeros((3, 2, 2, 2));
        for y in 0..2 {
            for x in 0..2 {
                affs[[0, 1, y, x]] = 0.25 * (y * 2 + x + 1) as f32;
            }
        }
        let mut labels = Array3::zeros((2, 2, 2));
        labels.slice_mut(ndarray::s![0, .., ..]).fill(1);
        labels.slice_mut(ndarray::s![1, .., ..]).fill(2);

        let graph = build_region_graph(&affs.view(), &labels.view(), plan()).unwrap();
        assert_eq!(graph.size(1), 4);
        assert_eq!(graph.size(2), 4);
        assert_eq!(graph.live_edge_count(), 1);
        let id = graph.live_edges().next().unwrap();
        let edge = graph.edge(id);
        assert_eq!(edge.endpoints(), (1, 2));
        assert_eq!(edge.contact_area(), 4);
        assert_eq!(edge.statistics().min(), 0.25);
        assert_eq!(edge.statistics().max(), 1.0);
    }

    #[test]
    fn test_background_contributes_nothing() {
        let mut affs = Array4::zeros((3, 1, 1, 2));
        affs[[2, 0, 0, 1]] = 0.9;
        let mut labels = Array3::zeros((1, 1, 2));
        labels[[0, 0, 1]] = 1;

        let graph = build_region_graph(&affs.view(), &labels.view(), plan()).unwrap();
        assert_eq!(graph.live_edge_count(), 0);
        assert_eq!(graph.size(1), 1);
    }

    #[test]
    fn test_rejects_oversized_labels() {
        let affs = Array4::zeros((3, 1, 1, 2));
        let mut labels = Array3::zeros((1, 1, 2));
        labels[[0, 0, 0]] = 1_000;
        assert!(build_region_graph(&affs.view(), &labels.view(), plan()).is_err());
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let affs = Array4::zeros((3, 2, 2, 2));
        let labels = Array3::zeros((2, 2, 3));
        assert!(build_region_graph(&affs.view(), &labels.view(), plan()).is_err());
    }
}
