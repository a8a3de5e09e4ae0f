/*!
# Initial Fragmentation

This module builds seed fragments from a thresholded affinity volume, the
first of the two segmentation stages. The construction is deterministic and
single-threaded:

1. **Clamp:** affinities below `aff_low` are treated as `0`; affinities above
   `aff_high` are lowered to `aff_high` so they stay a strong but finite
   link. The raw values are untouched; agglomeration scores are computed
   from them later.
2. **Seed linking:** every voxel looks at its (up to) six incident edges and
   links to the neighbor across the edge with the maximal clamped affinity.
   Ties are broken by a fixed order: axis z before y before x, negative
   before positive direction. Links are symmetric by construction: if `p`'s
   maximal edge leads to `q` and `q`'s maximal edge leads back, both unions
   land in the same set. Connected components under this relation become the
   fragments, tracked with a union–find over voxel indices.
3. **Background suppression:** a voxel whose maximal incident clamped
   affinity is zero (i.e. below `aff_low`) gets label `0`.
4. **Compaction:** surviving fragments are remapped to dense labels `1..=K`
   in first-appearance order under the raster scan `(z, y, x)`.

An empty volume yields an empty labeling; affinities outside `[0, 1]` are
repaired without error.
*/

use ndarray::{Array3, ArrayView4};
use tracing::debug;

use crate::core::error::Result;
use crate::core::union_find::DisjointSets;
use crate::core::volume::{LabelVolume, spatial_shape, validate_affinities, validate_clamp_range};

/// The six incident edge slots of a voxel, in tie-breaking order.
///
/// Each entry is `(channel, dz, dy, dx)` where the delta points at the
/// neighbor and the channel stores the affinity of the shared edge. For the
/// negative direction the edge lives at the voxel itself; for the positive
/// direction it lives at the neighbor.
const INCIDENT: [(usize, isize, isize, isize); 6] = [
    (0, -1, 0, 0),
    (0, 1, 0, 0),
    (1, 0, -1, 0),
    (1, 0, 1, 0),
    (2, 0, 0, -1),
    (2, 0, 0, 1),
];

/// Computes seed fragments from an affinity volume.
///
/// # Arguments
/// * `affinities` - `(3, D, H, W)` affinity volume.
/// * `aff_low` - affinities below this value are treated as no edge; voxels
///   with no remaining edge become background.
/// * `aff_high` - affinities above this value are lowered to it.
///
/// # Returns
/// A `(D, H, W)` label volume with dense fragment labels `1..=K` and `0` for
/// background.
///
/// # Errors
/// Returns a `ShapeMismatch` error if the volume does not have three
/// channels, or an `InvalidInput` error if the clamp thresholds are not
/// ordered within `[0, 1]`.
pub fn watershed(affinities: &ArrayView4<f32>, aff_low: f32, aff_high: f32) -> Result<LabelVolume> {
    validate_affinities(affinities)?;
    validate_clamp_range(aff_low, aff_high)?;

    let (d, h, w) = spatial_shape(affinities);
    let voxels = d * h * w;
    if voxels == 0 {
        return Ok(Array3::zeros((d, h, w)));
    }

    let clamped = |c: usize, z: usize, y: usize, x: usize| -> f32 {
        let a = affinities[[c, z, y, x]].clamp(0.0, 1.0);
        if a < aff_low {
            0.0
        } else if a > aff_high {
            aff_high
        } else {
            a
        }
    };

    let mut sets = DisjointSets::new(voxels);
    let mut foreground = vec![false; voxels];

    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let mut best = 0.0f32;
                let mut target = None;
                for &(c, dz, dy, dx) in &INCIDENT {
                    let nz = z as isize + dz;
                    let ny = y as isize + dy;
                    let nx = x as isize + dx;
                    if nz < 0
                        || ny < 0
                        || nx < 0
                        || nz >= d as isize
                        || ny >= h as isize
                        || nx >= w as isize
                    {
                        continue;
                    }
                    // A negative-direction edge is stored at this voxel, a
                    // positive-direction edge at the neighbor.
                    let a = if dz + dy + dx < 0 {
                        clamped(c, z, y, x)
                    } else {
                        clamped(c, nz as usize, ny as usize, nx as usize)
                    };
                    if a > best {
                        best = a;
                        target = Some(((nz as usize * h) + ny as usize) * w + nx as usize);
                    }
                }
                if let Some(neighbor) = target {
                    let index = (z * h + y) * w + x;
                    foreground[index] = true;
                    sets.union(index, neighbor);
                }
            }
        }
    }

    // Compact surviving fragments to dense labels in raster order.
    let mut labels = Array3::zeros((d, h, w));
    let mut dense = std::collections::HashMap::new();
    let mut next_label = 1u64;
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let index = (z * h + y) * w + x;
                if !foreground[index] {
                    continue;
                }
                let root = sets.find(index);
                let label = *dense.entry(root).or_insert_with(|| {
                    let l = next_label;
                    next_label += 1;
                    l
                });
                labels[[z, y, x]] = label;
            }
        }
    }

    debug!(
        fragments = next_label - 1,
        background = foreground.iter().filter(|f| !**f).count(),
        "watershed complete"
    );

    Ok(labels)
}
