/*!
# Hierarchical Agglomeration

The second segmentation stage: starting from the fragment region graph,
repeatedly extract the minimum-scoring edge, merge its incident regions, and
rescore the edges the merge affected. Whenever the next edge's score would
exceed the current threshold, a relabeled snapshot of the volume is emitted;
the caller requests snapshots lazily through an [`Iterator`], one per
threshold, and may abandon the sequence at any point.

Priority-queue bookkeeping uses lazy deletion: each edge carries a monotone
`stale` version counter, every queue entry remembers the version it was
pushed with, and outdated entries are discarded on pop. Entries with equal
scores leave the queue in push order thanks to a global sequence counter, so
runs on identical inputs are reproducible.

A score of `+∞` means "never merge"; such edges stay in the graph and the
queue but never fire.
*/

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::Result;
use crate::core::union_find::DisjointSets;
use crate::core::volume::{
    AffinityVolume, LabelVolume, clamp_affinities, validate_affinities, validate_clamp_range,
    validate_labels_match, validate_thresholds,
};
use crate::fragments::watershed;
use crate::graph::builder::build_region_graph;
use crate::graph::{EdgeId, RegionGraph, RegionId};
use crate::metrics::{SegmentationMetrics, evaluate};
use crate::scoring::{DEFAULT_SCORING_FUNCTION, ScoreContext, ScoringExpr};

/// One executed merge: the two region roots as they were just before the
/// merge, and the edge score that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Root that absorbed the other region.
    pub winner: RegionId,
    /// Root that was retired by the merge.
    pub loser: RegionId,
    /// Score of the merged edge.
    pub score: f32,
}

/// A surviving region-graph edge at snapshot time, with endpoints remapped
/// to the snapshot's dense labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionGraphEdge {
    pub u: u64,
    pub v: u64,
    pub score: f32,
}

/// The labeling emitted for one threshold, plus the optional extras.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The threshold this snapshot was emitted for.
    pub threshold: f32,
    /// Dense relabeling of the volume; `0` stays background.
    pub segmentation: LabelVolume,
    /// Agreement with the ground truth, when one was supplied.
    pub metrics: Option<SegmentationMetrics>,
    /// Merges executed since the previous snapshot, when requested.
    pub merge_history: Option<Vec<MergeRecord>>,
    /// Live edges and their scores, when requested.
    pub region_graph: Option<Vec<RegionGraphEdge>>,
}

/// Priority-queue entry; ordered by `(score, sequence)` so equal scores pop
/// in push order.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    score: OrderedFloat<f32>,
    sequence: u64,
    edge: EdgeId,
    version: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Options for an agglomeration run, built with a fluent API.
///
/// # Example
///
/// ```rust
/// use aquifer::agglomerate::AgglomerateOptions;
/// use ndarray::Array4;
///
/// let affinities = Array4::<f32>::ones((3, 4, 4, 4));
/// let run = AgglomerateOptions::new(affinities, vec![0.2, 0.5])
///     .scoring_function("OneMinus<MeanAffinity>")
///     .run()
///     .unwrap();
/// for snapshot in run {
///     assert_eq!(snapshot.segmentation.dim(), (4, 4, 4));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct AgglomerateOptions {
    affinities: AffinityVolume,
    thresholds: Vec<f32>,
    ground_truth: Option<LabelVolume>,
    fragments: Option<LabelVolume>,
    aff_threshold_low: f32,
    aff_threshold_high: f32,
    scoring_function: String,
    return_merge_history: bool,
    return_region_graph: bool,
    seed: Option<u64>,
}

impl AgglomerateOptions {
    /// Creates options with the default clamp thresholds (`0.0001`,
    /// `0.9999`) and scoring function
    /// `Multiply<OneMinus<MaxAffinity>, MinSize>`.
    pub fn new(affinities: AffinityVolume, thresholds: Vec<f32>) -> Self {
        Self {
            affinities,
            thresholds,
            ground_truth: None,
            fragments: None,
            aff_threshold_low: 0.0001,
            aff_threshold_high: 0.9999,
            scoring_function: DEFAULT_SCORING_FUNCTION.to_string(),
            return_merge_history: false,
            return_region_graph: false,
            seed: None,
        }
    }

    /// Supplies a ground-truth labeling; snapshots then carry metrics.
    pub fn ground_truth(mut self, ground_truth: LabelVolume) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// Supplies precomputed fragments, skipping the watershed.
    pub fn fragments(mut self, fragments: LabelVolume) -> Self {
        self.fragments = Some(fragments);
        self
    }

    /// Affinities below this value are treated as no edge by the watershed.
    pub fn aff_threshold_low(mut self, low: f32) -> Self {
        self.aff_threshold_low = low;
        self
    }

    /// Affinities above this value are lowered to it by the watershed.
    pub fn aff_threshold_high(mut self, high: f32) -> Self {
        self.aff_threshold_high = high;
        self
    }

    /// Sets the scoring expression, in the `Name<arg, …>` grammar.
    pub fn scoring_function(mut self, text: &str) -> Self {
        self.scoring_function = text.to_string();
        self
    }

    /// Attach the merges executed per snapshot to the output.
    pub fn return_merge_history(mut self, on: bool) -> Self {
        self.return_merge_history = on;
        self
    }

    /// Attach the surviving region graph per snapshot to the output.
    pub fn return_region_graph(mut self, on: bool) -> Self {
        self.return_region_graph = on;
        self
    }

    /// Seeds the RNG behind `Random` leaves, making them reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the inputs and prepares the lazy snapshot sequence.
    ///
    /// The scoring expression is parsed first, then the array shapes are
    /// checked, so every failure mode surfaces before any volume data is
    /// processed.
    ///
    /// # Errors
    /// See [`crate::core::error::AquiferError`]: scoring parse and
    /// unsupported-primitive errors, shape mismatches, and threshold or
    /// clamp-range violations all fail here, with no partial output.
    pub fn run(mut self) -> Result<ThresholdSegmentation> {
        let expression = ScoringExpr::parse(&self.scoring_function)?;
        validate_affinities(&self.affinities.view())?;
        validate_thresholds(&self.thresholds)?;
        validate_clamp_range(self.aff_threshold_low, self.aff_threshold_high)?;
        if let Some(fragments) = &self.fragments {
            validate_labels_match(&fragments.view(), &self.affinities.view(), "fragments")?;
        }
        if let Some(ground_truth) = &self.ground_truth {
            validate_labels_match(&ground_truth.view(), &self.affinities.view(), "ground truth")?;
        }

        clamp_affinities(&mut self.affinities);
        let fragments = match self.fragments.take() {
            Some(fragments) => fragments,
            None => watershed(
                &self.affinities.view(),
                self.aff_threshold_low,
                self.aff_threshold_high,
            )?,
        };

        let plan = expression.statistic_plan();
        let graph = build_region_graph(&self.affinities.view(), &fragments.view(), plan)?;
        let forest = DisjointSets::new(graph.max_label() as usize + 1);
        let context = ScoreContext::new(&expression, self.seed);

        let mut run = ThresholdSegmentation {
            graph,
            forest,
            heap: BinaryHeap::new(),
            expression,
            context,
            sequence: 0,
            fragments,
            ground_truth: self.ground_truth,
            thresholds: self.thresholds,
            position: 0,
            return_merge_history: self.return_merge_history,
            return_region_graph: self.return_region_graph,
            pending_history: Vec::new(),
        };

        for id in run.graph.live_edges().collect::<Vec<_>>() {
            run.rescore(id);
            run.push_entry(id);
        }
        Ok(run)
    }
}

/// Agglomerates a volume, yielding one labeling per threshold.
///
/// This is the library entry point; it is equivalent to
/// [`AgglomerateOptions::run`].
pub fn agglomerate(options: AgglomerateOptions) -> Result<ThresholdSegmentation> {
    options.run()
}

/// The lazy snapshot sequence of an agglomeration run.
///
/// Each call to [`Iterator::next`] advances the merge loop just far enough
/// to cross the next threshold and yields the resulting [`Snapshot`]. All
/// engine state lives here and is released when the sequence is dropped.
pub struct ThresholdSegmentation {
    graph: RegionGraph,
    forest: DisjointSets,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    expression: ScoringExpr,
    context: ScoreContext,
    sequence: u64,
    fragments: LabelVolume,
    ground_truth: Option<LabelVolume>,
    thresholds: Vec<f32>,
    position: usize,
    return_merge_history: bool,
    return_region_graph: bool,
    pending_history: Vec<MergeRecord>,
}

impl ThresholdSegmentation {
    /// Number of fragments the run started from.
    pub fn fragment_count(&self) -> u64 {
        self.graph.max_label()
    }

    /// Evaluates the scoring expression for an edge and stores the result.
    fn rescore(&mut self, id: EdgeId) {
        let edge = self.graph.edge(id);
        let (u, v) = edge.endpoints();
        let score = self.expression.evaluate(
            edge,
            self.graph.size(u),
            self.graph.size(v),
            &mut self.context,
        );
        self.graph.edge_mut(id).set_score(score);
    }

    fn push_entry(&mut self, id: EdgeId) {
        let edge = self.graph.edge(id);
        let entry = HeapEntry {
            score: OrderedFloat(edge.score()),
            sequence: self.sequence,
            edge: id,
            version: edge.stale(),
        };
        self.sequence += 1;
        self.heap.push(Reverse(entry));
    }

    /// Runs the merge loop until the minimum live score exceeds `threshold`
    /// or the queue drains. Returns the number of merges executed.
    fn advance(&mut self, threshold: f32) -> usize {
        let mut merges = 0;
        while let Some(Reverse(entry)) = self.heap.pop() {
            let edge = self.graph.edge(entry.edge);
            if edge.is_retired() || entry.version != edge.stale() {
                continue;
            }
            if edge.score() > threshold {
                self.heap.push(Reverse(entry));
                break;
            }
            let (eu, ev) = edge.endpoints();
            let score = edge.score();
            let u = self.forest.find(eu as usize) as RegionId;
            let v = self.forest.find(ev as usize) as RegionId;
            if u == v {
                // Became internal through an earlier merge.
                continue;
            }

            // The larger region absorbs the smaller; ties go to the lower id.
            let (winner, loser) = match self.graph.size(u).cmp(&self.graph.size(v)) {
                Ordering::Greater => (u, v),
                Ordering::Less => (v, u),
                Ordering::Equal => {
                    if u < v {
                        (u, v)
                    } else {
                        (v, u)
                    }
                }
            };
            if self.return_merge_history {
                self.pending_history.push(MergeRecord {
                    winner,
                    loser,
                    score,
                });
            }

            self.forest.union_into(winner as usize, loser as usize);
            let touched = self
                .graph
                .merge_regions(winner, loser, entry.edge)
                .expect("region graph and priority queue agree on live edges");
            for id in touched {
                self.rescore(id);
                self.push_entry(id);
            }
            merges += 1;
        }
        merges
    }

    /// Maps every fragment through the union-find and compacts the roots to
    /// dense labels in first-appearance raster order. Returns the labeling
    /// and the root-to-dense mapping.
    fn relabel(&mut self) -> (LabelVolume, HashMap<RegionId, u64>) {
        let forest = &mut self.forest;
        let mut dense: HashMap<RegionId, u64> = HashMap::new();
        let mut next_label = 1u64;
        let segmentation = self.fragments.mapv(|label| {
            if label == 0 {
                return 0;
            }
            let root = forest.find(label as usize) as RegionId;
            *dense.entry(root).or_insert_with(|| {
                let dense_label = next_label;
                next_label += 1;
                dense_label
            })
        });
        (segmentation, dense)
    }
}

impl Iterator for ThresholdSegmentation {
    type Item = Snapshot;

    /// Yields the snapshot for the next threshold, or `None` once every
    /// requested threshold has been emitted.
    fn next(&mut self) -> Option<Snapshot> {
        if self.position >= self.thresholds.len() {
            return None;
        }
        let threshold = self.thresholds[self.position];
        self.position += 1;

        let merges = self.advance(threshold);
        let (segmentation, dense) = self.relabel();
        debug!(threshold, merges, regions = dense.len(), "snapshot emitted");

        let metrics = self.ground_truth.as_ref().map(|ground_truth| {
            evaluate(&segmentation.view(), &ground_truth.view())
                .expect("ground truth shape was validated at entry")
        });
        let merge_history = self
            .return_merge_history
            .then(|| std::mem::take(&mut self.pending_history));
        let region_graph = self.return_region_graph.then(|| {
            self.graph
                .live_edges()
                .map(|id| {
                    let edge = self.graph.edge(id);
                    let (u, v) = edge.endpoints();
                    RegionGraphEdge {
                        u: dense[&u],
                        v: dense[&v],
                        score: edge.score(),
                    }
                })
                .collect()
        });

        Some(Snapshot {
            threshold,
            segmentation,
            metrics,
            merge_history,
            region_graph,
        })
    }
}
