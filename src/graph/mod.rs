/*!
# Region Adjacency Graph

The region graph tracks, for a fragment labeling, every pair of regions that
touch across at least one voxel affinity. Regions are identified by their
label; edges live in an arena and are addressed by [`EdgeId`]. Two access
paths are maintained side by side, as the agglomeration workload needs both:

- a hash index from the canonical pair `(u, v)` with `u < v` to the edge, and
- a per-region adjacency list of edge ids.

Edges are never removed from the arena. A merge retires edges in place and
bumps the survivor's `stale` counter, which the agglomerator uses to discard
outdated priority-queue entries.
*/

pub mod builder;
pub mod statistics;

use std::collections::HashMap;

use crate::core::error::{AquiferError, Result};
use crate::graph::statistics::{EdgeStatistics, StatisticPlan};

/// A region label. Label `0` is background and never appears in the graph.
pub type RegionId = u64;

/// Index of an edge in the region graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub(crate) usize);

impl EdgeId {
    /// Returns the numeric part of the edge's index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// An edge between two regions, carrying the statistics the scoring
/// expression needs plus the bookkeeping of the merge loop.
#[derive(Debug, Clone)]
pub struct RegionEdge {
    u: RegionId,
    v: RegionId,
    contact_area: u64,
    statistics: EdgeStatistics,
    score: f32,
    stale: u32,
    retired: bool,
}

impl RegionEdge {
    /// Canonical endpoints, `u < v`.
    pub fn endpoints(&self) -> (RegionId, RegionId) {
        (self.u, self.v)
    }

    /// Number of voxel affinities contributing to this edge.
    pub fn contact_area(&self) -> u64 {
        self.contact_area
    }

    /// The edge's affinity aggregation.
    pub fn statistics(&self) -> &EdgeStatistics {
        &self.statistics
    }

    /// Current merge score.
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Sets the merge score; called after (re)evaluation.
    pub fn set_score(&mut self, score: f32) {
        self.score = score;
    }

    /// Version counter for lazy priority-queue deletion.
    pub fn stale(&self) -> u32 {
        self.stale
    }

    /// Whether this edge has been retired by a merge.
    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

fn canonical(a: RegionId, b: RegionId) -> (RegionId, RegionId) {
    if a < b { (a, b) } else { (b, a) }
}

/// The region adjacency graph.
#[derive(Debug, Clone)]
pub struct RegionGraph {
    plan: StatisticPlan,
    sizes: Vec<u64>,
    edges: Vec<RegionEdge>,
    index: HashMap<(RegionId, RegionId), EdgeId>,
    adjacency: Vec<Vec<EdgeId>>,
}

impl RegionGraph {
    /// Creates an empty graph for labels `1..=max_label`.
    pub fn new(max_label: u64, plan: StatisticPlan) -> Self {
        let slots = max_label as usize + 1;
        Self {
            plan,
            sizes: vec![0; slots],
            edges: Vec::new(),
            index: HashMap::new(),
            adjacency: vec![Vec::new(); slots],
        }
    }

    /// The statistic plan edges are built with.
    pub fn plan(&self) -> &StatisticPlan {
        &self.plan
    }

    /// Largest region label the graph was sized for.
    pub fn max_label(&self) -> u64 {
        self.sizes.len() as u64 - 1
    }

    /// Voxel count of a region.
    pub fn size(&self, region: RegionId) -> u64 {
        self.sizes[region as usize]
    }

    /// Increments a region's voxel count by one; used by the size tally.
    pub fn count_voxel(&mut self, region: RegionId) {
        self.sizes[region as usize] += 1;
    }

    /// Total number of edges ever created (including retired ones).
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of live edges.
    pub fn live_edge_count(&self) -> usize {
        self.edges.iter().filter(|e| !e.retired).count()
    }

    /// Access an edge by id.
    pub fn edge(&self, id: EdgeId) -> &RegionEdge {
        &self.edges[id.0]
    }

    /// Mutable access to an edge by id.
    pub fn edge_mut(&mut self, id: EdgeId) -> &mut RegionEdge {
        &mut self.edges[id.0]
    }

    /// Edge ids incident to a region. May contain retired edges; callers
    /// filter with [`RegionEdge::is_retired`].
    pub fn edges_of(&self, region: RegionId) -> &[EdgeId] {
        &self.adjacency[region as usize]
    }

    /// Iterator over all live edge ids, in creation order.
    pub fn live_edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.retired)
            .map(|(i, _)| EdgeId(i))
    }

    /// Records one voxel affinity between two distinct nonzero regions,
    /// creating the edge if this is its first contribution.
    pub fn record_affinity(&mut self, a: RegionId, b: RegionId, affinity: f32) {
        debug_assert!(a != 0 && b != 0 && a != b);
        let key = canonical(a, b);
        let id = *self.index.entry(key).or_insert_with(|| {
            let id = EdgeId(self.edges.len());
            self.edges.push(RegionEdge {
                u: key.0,
                v: key.1,
                contact_area: 0,
                statistics: EdgeStatistics::new(&self.plan),
                score: 0.0,
                stale: 0,
                retired: false,
            });
            self.adjacency[key.0 as usize].push(id);
            self.adjacency[key.1 as usize].push(id);
            id
        });
        let plan = self.plan;
        let edge = &mut self.edges[id.0];
        edge.contact_area += 1;
        edge.statistics.record(&plan, affinity);
    }

    /// Merges region `loser` into region `winner` across the edge `via`,
    /// which joins the two.
    ///
    /// Every surviving edge of `loser` is either combined into an existing
    /// `(winner, w)` edge or rewired to `winner`; `via` itself is retired.
    /// Returns the ids of edges whose statistics changed; their scores must
    /// be recomputed and fresh priority-queue entries pushed. Each returned
    /// edge already has its `stale` counter bumped.
    pub fn merge_regions(
        &mut self,
        winner: RegionId,
        loser: RegionId,
        via: EdgeId,
    ) -> Result<Vec<EdgeId>> {
        debug_assert_ne!(winner, loser);
        let key = canonical(winner, loser);
        if self.index.remove(&key) != Some(via) {
            return Err(AquiferError::invariant_violation(format!(
                "merge edge ({}, {}) is not indexed where expected",
                key.0, key.1
            )));
        }
        self.edges[via.0].retired = true;

        let plan = self.plan;
        let loser_edges = std::mem::take(&mut self.adjacency[loser as usize]);
        let mut touched = Vec::new();

        for id in loser_edges {
            if self.edges[id.0].retired {
                continue;
            }
            let (a, b) = self.edges[id.0].endpoints();
            let other = if a == loser { b } else { a };
            debug_assert_ne!(other, winner, "edge to winner should be retired already");
            self.index.remove(&canonical(loser, other));

            if let Some(&existing) = self.index.get(&canonical(winner, other)) {
                // Combine the two parallel edges into the surviving one.
                let absorbed = self.edges[id.0].clone();
                self.edges[id.0].retired = true;
                let edge = &mut self.edges[existing.0];
                edge.contact_area += absorbed.contact_area;
                edge.statistics.absorb(&plan, &absorbed.statistics);
                edge.stale += 1;
                touched.push(existing);
            } else {
                // Rewire the edge from loser to winner.
                let key = canonical(winner, other);
                let edge = &mut self.edges[id.0];
                edge.u = key.0;
                edge.v = key.1;
                edge.stale += 1;
                self.index.insert(key, id);
                self.adjacency[winner as usize].push(id);
                touched.push(id);
            }
        }

        self.sizes[winner as usize] += self.sizes[loser as usize];
        self.sizes[loser as usize] = 0;
        Ok(touched)
    }
}
