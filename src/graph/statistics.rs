/*!
# Edge Statistic Aggregations

Every region-graph edge carries an aggregation over the affinity values of
the voxel pairs it represents. Which aggregations are maintained is decided
once, before the graph is built, by inspecting the scoring expression: the
resulting [`StatisticPlan`] selects exactly the fields that the expression
will read. Edge counts are large, so the plan replaces per-edge polymorphism
with a fixed struct whose unused parts stay unallocated.

Storage decisions for the value-based aggregations:

- The **sample vector** is the canonical per-edge value store. It retains the
  top `k` values when only `MeanMaxKAffinity(k)` needs samples, and all
  values when an exact quantile leaf is present (the top-k read then simply
  looks at the largest `k` of the full vector).
- The **histogram** is an independent fixed-width aggregation over `[0, 1]`.
  If several histogram leaves request different bin counts, one histogram
  with the largest requested count is kept.
*/

/// How many raw affinity samples an edge retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRetention {
    /// No samples kept.
    #[default]
    None,
    /// Keep the `k` largest values seen.
    TopK(usize),
    /// Keep every value.
    All,
}

impl SampleRetention {
    /// Combines two retention requirements, keeping the stronger one.
    pub fn combine(self, other: SampleRetention) -> SampleRetention {
        match (self, other) {
            (SampleRetention::All, _) | (_, SampleRetention::All) => SampleRetention::All,
            (SampleRetention::TopK(a), SampleRetention::TopK(b)) => SampleRetention::TopK(a.max(b)),
            (SampleRetention::TopK(k), SampleRetention::None)
            | (SampleRetention::None, SampleRetention::TopK(k)) => SampleRetention::TopK(k),
            (SampleRetention::None, SampleRetention::None) => SampleRetention::None,
        }
    }
}

/// The set of aggregations a scoring expression requires per edge.
///
/// The affinity count is always tracked; it doubles as the edge's contact
/// area and costs nothing beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatisticPlan {
    /// Track the minimum affinity.
    pub min: bool,
    /// Track the maximum affinity.
    pub max: bool,
    /// Track the running sum for the mean.
    pub mean: bool,
    /// Maintain a fixed-width histogram over `[0, 1]` with this many bins.
    pub histogram_bins: Option<usize>,
    /// Retain raw samples.
    pub samples: SampleRetention,
}

impl StatisticPlan {
    /// Merges the requirements of `other` into `self`.
    pub fn merge(&mut self, other: &StatisticPlan) {
        self.min |= other.min;
        self.max |= other.max;
        self.mean |= other.mean;
        self.histogram_bins = match (self.histogram_bins, other.histogram_bins) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.samples = self.samples.combine(other.samples);
    }
}

/// Per-edge affinity aggregation, populated according to a [`StatisticPlan`].
#[derive(Debug, Clone)]
pub struct EdgeStatistics {
    min: f32,
    max: f32,
    sum: f64,
    count: u64,
    histogram: Option<Vec<u32>>,
    samples: Option<Vec<f32>>,
}

impl EdgeStatistics {
    /// Creates an empty aggregation with the plan's structures allocated.
    pub fn new(plan: &StatisticPlan) -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            sum: 0.0,
            count: 0,
            histogram: plan.histogram_bins.map(|bins| vec![0; bins]),
            samples: match plan.samples {
                SampleRetention::None => None,
                SampleRetention::TopK(k) => Some(Vec::with_capacity(k)),
                SampleRetention::All => Some(Vec::new()),
            },
        }
    }

    /// Records one affinity value.
    pub fn record(&mut self, plan: &StatisticPlan, affinity: f32) {
        self.count += 1;
        if plan.min {
            self.min = self.min.min(affinity);
        }
        if plan.max {
            self.max = self.max.max(affinity);
        }
        if plan.mean {
            self.sum += affinity as f64;
        }
        if let Some(histogram) = &mut self.histogram {
            let bins = histogram.len();
            let bin = ((affinity * bins as f32) as usize).min(bins - 1);
            histogram[bin] += 1;
        }
        if let Some(samples) = &mut self.samples {
            match plan.samples {
                SampleRetention::All => samples.push(affinity),
                SampleRetention::TopK(k) => {
                    if samples.len() < k {
                        samples.push(affinity);
                    } else {
                        let weakest = samples
                            .iter()
                            .enumerate()
                            .min_by(|(_, a), (_, b)| a.total_cmp(b))
                            .map(|(i, _)| i);
                        if let Some(weakest) = weakest {
                            if affinity > samples[weakest] {
                                samples[weakest] = affinity;
                            }
                        }
                    }
                }
                SampleRetention::None => {}
            }
        }
    }

    /// Folds another aggregation into this one: min of mins, max of maxes,
    /// summed sums and counts, elementwise-added histograms, concatenated
    /// then truncated sample vectors.
    pub fn absorb(&mut self, plan: &StatisticPlan, other: &EdgeStatistics) {
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        if let (Some(histogram), Some(other_histogram)) = (&mut self.histogram, &other.histogram) {
            for (bin, add) in histogram.iter_mut().zip(other_histogram) {
                *bin += add;
            }
        }
        if let (Some(samples), Some(other_samples)) = (&mut self.samples, &other.samples) {
            samples.extend_from_slice(other_samples);
            if let SampleRetention::TopK(k) = plan.samples {
                if samples.len() > k {
                    samples.sort_unstable_by(|a, b| b.total_cmp(a));
                    samples.truncate(k);
                }
            }
        }
    }

    /// Number of recorded affinity values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Minimum recorded affinity.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Maximum recorded affinity.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Mean of the recorded affinities.
    pub fn mean(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum / self.count as f64) as f32
    }

    /// Mean of the `k` largest recorded samples (or of all samples when
    /// fewer than `k` were kept).
    pub fn mean_max_k(&self, k: usize) -> f32 {
        let Some(samples) = &self.samples else {
            return 0.0;
        };
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable_by(|a, b| b.total_cmp(a));
        sorted.truncate(k);
        (sorted.iter().map(|&v| v as f64).sum::<f64>() / sorted.len() as f64) as f32
    }

    /// Exact q-th percentile (nearest rank) over the retained samples.
    ///
    /// With `init_with_max`, aggregations holding fewer than two values
    /// report their maximum instead.
    pub fn quantile(&self, q: u8, init_with_max: bool) -> f32 {
        let Some(samples) = &self.samples else {
            return self.max;
        };
        if samples.is_empty() {
            return self.max;
        }
        if samples.len() == 1 || (init_with_max && samples.len() < 2) {
            return if samples.len() == 1 { samples[0] } else { self.max };
        }
        let rank = quantile_rank(q, samples.len() as u64) as usize;
        let mut scratch = samples.clone();
        let (_, value, _) = scratch.select_nth_unstable_by(rank, f32::total_cmp);
        *value
    }

    /// Histogram-approximated q-th percentile: the center of the bin holding
    /// the nearest-rank sample.
    pub fn histogram_quantile(&self, q: u8, init_with_max: bool) -> f32 {
        let Some(histogram) = &self.histogram else {
            return self.max;
        };
        if self.count == 1 || (init_with_max && self.count < 2) {
            // A single sample is reported exactly; max equals that sample.
            return self.max;
        }
        let bins = histogram.len();
        let rank = quantile_rank(q, self.count);
        let mut cumulative = 0u64;
        for (bin, &hits) in histogram.iter().enumerate() {
            cumulative += hits as u64;
            if cumulative > rank {
                return (bin as f32 + 0.5) / bins as f32;
            }
        }
        self.max
    }
}

/// Nearest-rank index of the q-th percentile among `n` ordered values.
fn quantile_rank(q: u8, n: u64) -> u64 {
    debug_assert!(n > 0, "quantile of an empty aggregation");
    (q as u64 * (n - 1)) / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_plan() -> StatisticPlan {
        StatisticPlan {
            min: true,
            max: true,
            mean: true,
            histogram_bins: Some(10),
            samples: SampleRetention::All,
        }
    }

    #[test]
    fn test_scalar_aggregates() {
        let plan = full_plan();
        let mut stats = EdgeStatistics::new(&plan);
        for a in [0.2, 0.8, 0.5] {
            stats.record(&plan, a);
        }
        assert_eq!(stats.min(), 0.2);
        assert_eq!(stats.max(), 0.8);
        assert!((stats.mean() - 0.5).abs() < 1e-6);
        assert_eq!(stats.count(), 3);
    }

    #[test]
    fn test_top_k_retention() {
        let plan = StatisticPlan {
            samples: SampleRetention::TopK(2),
            ..Default::default()
        };
        let mut stats = EdgeStatistics::new(&plan);
        for a in [0.1, 0.9, 0.3, 0.7] {
            stats.record(&plan, a);
        }
        assert!((stats.mean_max_k(2) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_exact_quantile_nearest_rank() {
        let plan = StatisticPlan {
            max: true,
            samples: SampleRetention::All,
            ..Default::default()
        };
        let mut stats = EdgeStatistics::new(&plan);
        for a in [0.5, 0.1, 0.3, 0.9, 0.7] {
            stats.record(&plan, a);
        }
        assert_eq!(stats.quantile(0, false), 0.1);
        assert_eq!(stats.quantile(50, false), 0.5);
        assert_eq!(stats.quantile(100, false), 0.9);
    }

    #[test]
    fn test_quantile_init_with_max() {
        let plan = StatisticPlan {
            max: true,
            samples: SampleRetention::All,
            ..Default::default()
        };
        let mut stats = EdgeStatistics::new(&plan);
        stats.record(&plan, 0.4);
        assert_eq!(stats.quantile(0, true), 0.4);
        stats.record(&plan, 0.6);
        assert_eq!(stats.quantile(0, true), 0.4);
    }

    #[test]
    fn test_histogram_quantile() {
        let plan = StatisticPlan {
            max: true,
            histogram_bins: Some(10),
            ..Default::default()
        };
        let mut stats = EdgeStatistics::new(&plan);
        stats.record(&plan, 0.1);
        stats.record(&plan, 0.2);
        // Rank 0 of two samples falls in the bin of 0.1.
        assert!((stats.histogram_quantile(0, false) - 0.15).abs() < 1e-6);
        // A single sample is reported exactly.
        let mut single = EdgeStatistics::new(&plan);
        single.record(&plan, 0.73);
        assert_eq!(single.histogram_quantile(50, false), 0.73);
    }

    #[test]
    fn test_absorb_combines_everything() {
        let plan = full_plan();
        let mut left = EdgeStatistics::new(&plan);
        let mut right = EdgeStatistics::new(&plan);
        left.record(&plan, 0.2);
        right.record(&plan, 0.9);
        right.record(&plan, 0.4);
        left.absorb(&plan, &right);
        assert_eq!(left.count(), 3);
        assert_eq!(left.min(), 0.2);
        assert_eq!(left.max(), 0.9);
        assert!((left.mean() - 0.5).abs() < 1e-6);
        assert_eq!(left.quantile(100, false), 0.9);
    }

    #[test]
    fn test_plan_merge() {
        let mut plan = StatisticPlan {
            min: true,
            histogram_bins: Some(64),
            samples: SampleRetention::TopK(5),
            ..Default::default()
        };
        plan.merge(&StatisticPlan {
            max: true,
            histogram_bins: Some(256),
            samples: SampleRetention::All,
            ..Default::default()
        });
        assert!(plan.min && plan.max);
        assert_eq!(plan.histogram_bins, Some(256));
        assert_eq!(plan.samples, SampleRetention::All);
    }
}
