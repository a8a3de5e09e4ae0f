/*!
# Edge Scoring Expressions

The merge priority of a region-graph edge is a user-chosen scalar, described
as an expression tree over region and edge statistics. Trees can be built
two ways:

- parsed from the textual `Name<arg, arg, …>` grammar, e.g.
  `Multiply<OneMinus<MaxAffinity>, MinSize>` (see [`parser`]);
- assembled in code with the arithmetic operators: `ScoringExpr` implements
  `Add`, `Sub`, `Mul` and `Div` against both expressions and integer
  constants, `1 - x` folds to `OneMinus`, `1 / x` folds to `Invert`, and
  [`ScoringExpr::pow`] accepts exponent 2 only.

A tree is inspected once, before the region graph is built, to decide which
statistic aggregations every edge must carry ([`ScoringExpr::statistic_plan`]);
evaluation is then a plain recursive visit per edge. Division by zero yields
`+∞`, which the agglomerator treats as "never merge".
*/

pub mod parser;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::error::{AquiferError, Result};
use crate::graph::RegionEdge;
use crate::graph::statistics::{SampleRetention, StatisticPlan};

/// Scoring function used when the caller does not specify one.
pub const DEFAULT_SCORING_FUNCTION: &str = "Multiply<OneMinus<MaxAffinity>, MinSize>";

/// A node of the scoring expression tree.
///
/// Leaves are evaluated against a region pair and its edge; combinators fold
/// child values into a scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringExpr {
    /// An integer constant.
    Constant(i64),
    /// Voxel count of the smaller region.
    MinSize,
    /// Voxel count of the larger region.
    MaxSize,
    /// Number of voxel affinities forming the edge.
    ContactArea,
    /// Minimum affinity on the edge.
    MinAffinity,
    /// Maximum affinity on the edge.
    MaxAffinity,
    /// Mean affinity on the edge.
    MeanAffinity,
    /// Mean of the `k` largest affinities on the edge.
    MeanMaxKAffinity(usize),
    /// Exact q-th percentile of the edge's affinities.
    QuantileAffinity { q: u8, init_with_max: bool },
    /// Histogram-approximated q-th percentile.
    HistogramQuantileAffinity {
        q: u8,
        bins: usize,
        init_with_max: bool,
    },
    /// Uniform value in `[0, 1)` from the run's RNG.
    Random,
    /// `1 - a`.
    OneMinus(Box<ScoringExpr>),
    /// `1 / a`; `+∞` for `a == 0`.
    Invert(Box<ScoringExpr>),
    /// `a²`.
    Square(Box<ScoringExpr>),
    /// `a + b`.
    Add(Box<ScoringExpr>, Box<ScoringExpr>),
    /// `a - b`.
    Subtract(Box<ScoringExpr>, Box<ScoringExpr>),
    /// `a · b`.
    Multiply(Box<ScoringExpr>, Box<ScoringExpr>),
    /// `a / b`; `+∞` for `b == 0`.
    Divide(Box<ScoringExpr>, Box<ScoringExpr>),
    /// `1` if `a > b`, else `0`.
    Step(Box<ScoringExpr>, Box<ScoringExpr>),
}

impl ScoringExpr {
    /// Parses an expression from the `Name<arg, …>` grammar.
    pub fn parse(text: &str) -> Result<ScoringExpr> {
        parser::parse(text)
    }

    /// The 50th histogram percentile with 256 bins, a common robust choice.
    pub fn median_affinity() -> ScoringExpr {
        ScoringExpr::HistogramQuantileAffinity {
            q: 50,
            bins: 256,
            init_with_max: true,
        }
    }

    /// Wraps the expression in `OneMinus`.
    pub fn one_minus(self) -> ScoringExpr {
        ScoringExpr::OneMinus(Box::new(self))
    }

    /// Wraps the expression in `Invert`.
    pub fn inverted(self) -> ScoringExpr {
        ScoringExpr::Invert(Box::new(self))
    }

    /// Raises the expression to an integer power. Only exponent 2 is
    /// supported.
    pub fn pow(self, exponent: i64) -> Result<ScoringExpr> {
        if exponent == 2 {
            Ok(ScoringExpr::Square(Box::new(self)))
        } else {
            Err(AquiferError::unsupported_scoring(format!(
                "powers other than 2 are not implemented, got {}",
                exponent
            )))
        }
    }

    /// Builds `Step(self, other)`.
    pub fn step(self, other: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Step(Box::new(self), Box::new(other))
    }

    /// Returns true if any leaf draws from the RNG.
    pub fn uses_random(&self) -> bool {
        match self {
            ScoringExpr::Random => true,
            ScoringExpr::OneMinus(a) | ScoringExpr::Invert(a) | ScoringExpr::Square(a) => {
                a.uses_random()
            }
            ScoringExpr::Add(a, b)
            | ScoringExpr::Subtract(a, b)
            | ScoringExpr::Multiply(a, b)
            | ScoringExpr::Divide(a, b)
            | ScoringExpr::Step(a, b) => a.uses_random() || b.uses_random(),
            _ => false,
        }
    }

    /// Derives the per-edge aggregations this expression reads.
    ///
    /// Quantile leaves also request the maximum, which stands in for the
    /// quantile on single-sample and `init_with_max` edges.
    pub fn statistic_plan(&self) -> StatisticPlan {
        let mut plan = StatisticPlan::default();
        self.collect_requirements(&mut plan);
        plan
    }

    fn collect_requirements(&self, plan: &mut StatisticPlan) {
        match self {
            ScoringExpr::MinAffinity => plan.min = true,
            ScoringExpr::MaxAffinity => plan.max = true,
            ScoringExpr::MeanAffinity => plan.mean = true,
            ScoringExpr::MeanMaxKAffinity(k) => {
                plan.samples = plan.samples.combine(SampleRetention::TopK(*k));
            }
            ScoringExpr::QuantileAffinity { .. } => {
                plan.samples = plan.samples.combine(SampleRetention::All);
                plan.max = true;
            }
            ScoringExpr::HistogramQuantileAffinity { bins, .. } => {
                plan.merge(&StatisticPlan {
                    histogram_bins: Some(*bins),
                    max: true,
                    ..Default::default()
                });
            }
            ScoringExpr::OneMinus(a) | ScoringExpr::Invert(a) | ScoringExpr::Square(a) => {
                a.collect_requirements(plan);
            }
            ScoringExpr::Add(a, b)
            | ScoringExpr::Subtract(a, b)
            | ScoringExpr::Multiply(a, b)
            | ScoringExpr::Divide(a, b)
            | ScoringExpr::Step(a, b) => {
                a.collect_requirements(plan);
                b.collect_requirements(plan);
            }
            _ => {}
        }
    }

    /// Evaluates the expression for an edge between regions of the given
    /// sizes.
    pub fn evaluate(
        &self,
        edge: &RegionEdge,
        size_u: u64,
        size_v: u64,
        context: &mut ScoreContext,
    ) -> f32 {
        match self {
            ScoringExpr::Constant(k) => *k as f32,
            ScoringExpr::MinSize => size_u.min(size_v) as f32,
            ScoringExpr::MaxSize => size_u.max(size_v) as f32,
            ScoringExpr::ContactArea => edge.contact_area() as f32,
            ScoringExpr::MinAffinity => edge.statistics().min(),
            ScoringExpr::MaxAffinity => edge.statistics().max(),
            ScoringExpr::MeanAffinity => edge.statistics().mean(),
            ScoringExpr::MeanMaxKAffinity(k) => edge.statistics().mean_max_k(*k),
            ScoringExpr::QuantileAffinity { q, init_with_max } => {
                edge.statistics().quantile(*q, *init_with_max)
            }
            ScoringExpr::HistogramQuantileAffinity {
                q, init_with_max, ..
            } => edge.statistics().histogram_quantile(*q, *init_with_max),
            ScoringExpr::Random => context
                .rng
                .as_mut()
                .expect("context was built for an expression with a Random leaf")
                .random::<f32>(),
            ScoringExpr::OneMinus(a) => 1.0 - a.evaluate(edge, size_u, size_v, context),
            ScoringExpr::Invert(a) => {
                let value = a.evaluate(edge, size_u, size_v, context);
                if value == 0.0 {
                    f32::INFINITY
                } else {
                    1.0 / value
                }
            }
            ScoringExpr::Square(a) => {
                let value = a.evaluate(edge, size_u, size_v, context);
                value * value
            }
            ScoringExpr::Add(a, b) => {
                a.evaluate(edge, size_u, size_v, context) + b.evaluate(edge, size_u, size_v, context)
            }
            ScoringExpr::Subtract(a, b) => {
                a.evaluate(edge, size_u, size_v, context) - b.evaluate(edge, size_u, size_v, context)
            }
            ScoringExpr::Multiply(a, b) => {
                a.evaluate(edge, size_u, size_v, context) * b.evaluate(edge, size_u, size_v, context)
            }
            ScoringExpr::Divide(a, b) => {
                let divisor = b.evaluate(edge, size_u, size_v, context);
                if divisor == 0.0 {
                    f32::INFINITY
                } else {
                    a.evaluate(edge, size_u, size_v, context) / divisor
                }
            }
            ScoringExpr::Step(a, b) => {
                if a.evaluate(edge, size_u, size_v, context)
                    > b.evaluate(edge, size_u, size_v, context)
                {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Per-run evaluation state: the RNG shared by all `Random` leaves.
pub struct ScoreContext {
    rng: Option<StdRng>,
}

impl ScoreContext {
    /// Creates the evaluation state for an expression. The RNG is only
    /// seeded (for reproducibility when a seed is given, from OS entropy
    /// otherwise) when the expression actually draws from it.
    pub fn new(expression: &ScoringExpr, seed: Option<u64>) -> Self {
        let rng = expression.uses_random().then(|| match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::seed_from_u64(rand::random::<u64>()),
        });
        Self { rng }
    }
}

impl std::ops::Add for ScoringExpr {
    type Output = ScoringExpr;
    fn add(self, rhs: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Add(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Sub for ScoringExpr {
    type Output = ScoringExpr;
    fn sub(self, rhs: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Subtract(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Mul for ScoringExpr {
    type Output = ScoringExpr;
    fn mul(self, rhs: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Multiply(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Div for ScoringExpr {
    type Output = ScoringExpr;
    fn div(self, rhs: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Divide(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Add<i64> for ScoringExpr {
    type Output = ScoringExpr;
    fn add(self, rhs: i64) -> ScoringExpr {
        self + ScoringExpr::Constant(rhs)
    }
}

impl std::ops::Sub<i64> for ScoringExpr {
    type Output = ScoringExpr;
    fn sub(self, rhs: i64) -> ScoringExpr {
        self - ScoringExpr::Constant(rhs)
    }
}

impl std::ops::Mul<i64> for ScoringExpr {
    type Output = ScoringExpr;
    fn mul(self, rhs: i64) -> ScoringExpr {
        self * ScoringExpr::Constant(rhs)
    }
}

impl std::ops::Div<i64> for ScoringExpr {
    type Output = ScoringExpr;
    fn div(self, rhs: i64) -> ScoringExpr {
        self / ScoringExpr::Constant(rhs)
    }
}

impl std::ops::Add<ScoringExpr> for i64 {
    type Output = ScoringExpr;
    fn add(self, rhs: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Constant(self) + rhs
    }
}

impl std::ops::Sub<ScoringExpr> for i64 {
    type Output = ScoringExpr;
    fn sub(self, rhs: ScoringExpr) -> ScoringExpr {
        if self == 1 {
            rhs.one_minus()
        } else {
            ScoringExpr::Constant(self) - rhs
        }
    }
}

impl std::ops::Mul<ScoringExpr> for i64 {
    type Output = ScoringExpr;
    fn mul(self, rhs: ScoringExpr) -> ScoringExpr {
        ScoringExpr::Constant(self) * rhs
    }
}

impl std::ops::Div<ScoringExpr> for i64 {
    type Output = ScoringExpr;
    fn div(self, rhs: ScoringExpr) -> ScoringExpr {
        if self == 1 {
            rhs.inverted()
        } else {
            ScoringExpr::Constant(self) / rhs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RegionGraph;
    use crate::graph::statistics::StatisticPlan;

    /// One edge between regions 1 (size 3) and 2 (size 5) with affinities
    /// 0.2 and 0.6.
    fn sample_edge(plan: StatisticPlan) -> (RegionGraph, crate::graph::EdgeId) {
        let mut graph = RegionGraph::new(2, plan);
        for _ in 0..3 {
            graph.count_voxel(1);
        }
        for _ in 0..5 {
            graph.count_voxel(2);
        }
        graph.record_affinity(1, 2, 0.2);
        graph.record_affinity(1, 2, 0.6);
        let id = graph.live_edges().next().unwrap();
        (graph, id)
    }

    fn eval(expr: &ScoringExpr) -> f32 {
        let (graph, id) = sample_edge(expr.statistic_plan());
        let mut context = ScoreContext::new(expr, Some(7));
        expr.evaluate(graph.edge(id), graph.size(1), graph.size(2), &mut context)
    }

    #[test]
    fn test_one_minus_max_affinity() {
        let expr = ScoringExpr::parse("OneMinus<MaxAffinity>").unwrap();
        assert!((eval(&expr) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_size_and_area_leaves() {
        assert_eq!(eval(&ScoringExpr::MinSize), 3.0);
        assert_eq!(eval(&ScoringExpr::MaxSize), 5.0);
        assert_eq!(eval(&ScoringExpr::ContactArea), 2.0);
    }

    #[test]
    fn test_division_by_zero_is_infinite() {
        let expr = ScoringExpr::Constant(1) / ScoringExpr::Constant(0);
        assert_eq!(eval(&expr), f32::INFINITY);
        let expr = ScoringExpr::Constant(0).inverted();
        assert_eq!(eval(&expr), f32::INFINITY);
    }

    #[test]
    fn test_step() {
        let expr = ScoringExpr::MaxSize.step(ScoringExpr::MinSize);
        assert_eq!(eval(&expr), 1.0);
        let expr = ScoringExpr::MinSize.step(ScoringExpr::MaxSize);
        assert_eq!(eval(&expr), 0.0);
    }

    #[test]
    fn test_operator_folds() {
        assert_eq!(1 - ScoringExpr::MaxAffinity, ScoringExpr::MaxAffinity.one_minus());
        assert_eq!(1 / ScoringExpr::MinSize, ScoringExpr::MinSize.inverted());
        assert_eq!(
            2 - ScoringExpr::MaxAffinity,
            ScoringExpr::Constant(2) - ScoringExpr::MaxAffinity
        );
    }

    #[test]
    fn test_pow_only_supports_square() {
        let squared = ScoringExpr::MeanAffinity.pow(2).unwrap();
        assert!((eval(&squared) - 0.16).abs() < 1e-6);
        assert!(ScoringExpr::MeanAffinity.pow(3).is_err());
    }

    #[test]
    fn test_plan_covers_exactly_the_referenced_statistics() {
        let expr = ScoringExpr::parse("Multiply<OneMinus<MaxAffinity>, MinSize>").unwrap();
        let plan = expr.statistic_plan();
        assert!(plan.max);
        assert!(!plan.min && !plan.mean);
        assert_eq!(plan.histogram_bins, None);
        assert_eq!(plan.samples, SampleRetention::None);

        let expr = ScoringExpr::parse("QuantileAffinity<75>").unwrap();
        let plan = expr.statistic_plan();
        assert_eq!(plan.samples, SampleRetention::All);
        assert!(plan.max);
    }

    #[test]
    fn test_uses_random_detection() {
        assert!(ScoringExpr::Random.uses_random());
        assert!(
            (ScoringExpr::MinSize * ScoringExpr::Random.one_minus()).uses_random()
        );
        let expr = ScoringExpr::parse(DEFAULT_SCORING_FUNCTION).unwrap();
        assert!(!expr.uses_random());
    }

    #[test]
    fn test_random_is_reproducible_per_seed() {
        let expr = ScoringExpr::Random;
        let (graph, id) = sample_edge(expr.statistic_plan());
        let mut first = ScoreContext::new(&expr, Some(42));
        let mut second = ScoreContext::new(&expr, Some(42));
        for _ in 0..5 {
            let a = expr.evaluate(graph.edge(id), 1, 1, &mut first);
            let b = expr.evaluate(graph.edge(id), 1, 1, &mut second);
            assert_eq!(a, b);
            assert!((0.0..1.0).contains(&a));
        }
    }
}
