//! Random survival forest: bootstrap-resampled trees split by the
//! log-rank statistic.
//!
//! Trees are fitted on the rayon pool, each from its own `StdRng` seeded
//! with `seed + tree_index`, so the forest is bit-identical no matter how
//! work is scheduled. Leaves keep both a Nelson-Aalen cumulative hazard and
//! a Kaplan-Meier survival curve of their (bootstrap-weighted) sample; the
//! ensemble risk score is the averaged cumulative hazard summed over the
//! training event times.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::metrics::{StepFunction, kaplan_meier, nelson_aalen};
use crate::survival::SurvivalLabels;

#[derive(Debug, Clone, PartialEq)]
pub struct RsfParams {
    pub n_estimators: usize,
    /// Nodes with fewer samples than this become leaves.
    pub min_samples_split: usize,
    /// Both children of a split must keep at least this many samples.
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for RsfParams {
    fn default() -> Self {
        RsfParams {
            n_estimators: 100,
            min_samples_split: 10,
            min_samples_leaf: 15,
            seed: 42,
        }
    }
}

enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        chf: StepFunction,
        survival: StepFunction,
    },
}

struct CandidateSplit {
    feature: usize,
    threshold: f64,
    statistic: f64,
}

/// Two-sample log-rank chi-square over per-time buckets. `cnt`/`d` hold
/// subject and event counts per unique node time (ascending); the `left`
/// slices describe the candidate left child.
fn log_rank_statistic(
    cnt_total: &[usize],
    d_total: &[usize],
    cnt_left: &[usize],
    d_left: &[usize],
) -> f64 {
    let mut at_risk_total: usize = cnt_total.iter().sum();
    let mut at_risk_left: usize = cnt_left.iter().sum();
    let mut observed_minus_expected = 0.0;
    let mut variance = 0.0;

    for k in 0..cnt_total.len() {
        let d = d_total[k] as f64;
        if d > 0.0 && at_risk_total > 1 {
            let n = at_risk_total as f64;
            let share = at_risk_left as f64 / n;
            observed_minus_expected += d_left[k] as f64 - d * share;
            variance += d * share * (1.0 - share) * ((n - d) / (n - 1.0));
        }
        at_risk_total -= cnt_total[k];
        at_risk_left -= cnt_left[k];
    }

    if variance > 0.0 {
        observed_minus_expected * observed_minus_expected / variance
    } else {
        0.0
    }
}

/// Best log-rank split over a random `sqrt(p)` feature subset, trying every
/// threshold between distinct adjacent values. Returns `None` when no
/// split separates survival at all.
fn best_split(
    x: ArrayView2<'_, f64>,
    labels: &SurvivalLabels,
    rows: &[usize],
    min_samples_leaf: usize,
    rng: &mut StdRng,
) -> Option<CandidateSplit> {
    let p = x.ncols();
    if p == 0 || rows.len() < 2 * min_samples_leaf {
        return None;
    }

    // Bucket the node sample by unique observed time.
    let mut times: Vec<f64> = rows.iter().map(|&r| labels.time()[r]).collect();
    times.sort_unstable_by(f64::total_cmp);
    times.dedup();
    let bucket_of = |r: usize| times.partition_point(|&u| u < labels.time()[r]);

    let mut cnt_total = vec![0usize; times.len()];
    let mut d_total = vec![0usize; times.len()];
    for &r in rows {
        let b = bucket_of(r);
        cnt_total[b] += 1;
        if labels.is_event(r) {
            d_total[b] += 1;
        }
    }

    let mtry = ((p as f64).sqrt().floor() as usize).clamp(1, p);
    let mut best: Option<CandidateSplit> = None;

    for feature in sample(rng, p, mtry) {
        let mut ordered: Vec<usize> = rows.to_vec();
        ordered.sort_unstable_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut cnt_left = vec![0usize; times.len()];
        let mut d_left = vec![0usize; times.len()];
        for (pos, &r) in ordered.iter().enumerate().take(ordered.len() - 1) {
            let b = bucket_of(r);
            cnt_left[b] += 1;
            if labels.is_event(r) {
                d_left[b] += 1;
            }

            let here = x[[r, feature]];
            let next = x[[ordered[pos + 1], feature]];
            if here == next {
                continue;
            }
            let n_left = pos + 1;
            let n_right = ordered.len() - n_left;
            if n_left < min_samples_leaf || n_right < min_samples_leaf {
                continue;
            }

            let statistic = log_rank_statistic(&cnt_total, &d_total, &cnt_left, &d_left);
            let beats = best.as_ref().map_or(statistic > 0.0, |b| statistic > b.statistic);
            if beats {
                best = Some(CandidateSplit {
                    feature,
                    threshold: (here + next) / 2.0,
                    statistic,
                });
            }
        }
    }
    best
}

struct SurvivalTree {
    nodes: Vec<Node>,
}

impl SurvivalTree {
    fn fit(
        x: ArrayView2<'_, f64>,
        labels: &SurvivalLabels,
        params: &RsfParams,
        rng: &mut StdRng,
    ) -> Self {
        let n = x.nrows();
        let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let mut nodes = Vec::new();
        grow(x, labels, &bootstrap, params, rng, &mut nodes);
        SurvivalTree { nodes }
    }

    fn leaf_estimates(&self, row: ArrayView1<'_, f64>) -> (&StepFunction, &StepFunction) {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                Node::Leaf { chf, survival } => return (chf, survival),
            }
        }
    }
}

fn make_leaf(labels: &SurvivalLabels, rows: &[usize], nodes: &mut Vec<Node>) -> usize {
    let sample_labels = labels.select(rows);
    nodes.push(Node::Leaf {
        chf: nelson_aalen(&sample_labels),
        survival: kaplan_meier(&sample_labels),
    });
    nodes.len() - 1
}

fn grow(
    x: ArrayView2<'_, f64>,
    labels: &SurvivalLabels,
    rows: &[usize],
    params: &RsfParams,
    rng: &mut StdRng,
    nodes: &mut Vec<Node>,
) -> usize {
    let n_events = rows.iter().filter(|&&r| labels.is_event(r)).count();
    if rows.len() < params.min_samples_split || n_events == 0 {
        return make_leaf(labels, rows, nodes);
    }

    let Some(split) = best_split(x, labels, rows, params.min_samples_leaf, rng) else {
        return make_leaf(labels, rows, nodes);
    };

    let idx = nodes.len();
    nodes.push(Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: 0,
        right: 0,
    });

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .copied()
        .partition(|&r| x[[r, split.feature]] <= split.threshold);
    let left = grow(x, labels, &left_rows, params, rng, nodes);
    let right = grow(x, labels, &right_rows, params, rng, nodes);
    if let Node::Split {
        left: l, right: r, ..
    } = &mut nodes[idx]
    {
        *l = left;
        *r = right;
    }
    idx
}

pub struct RandomSurvivalForest {
    trees: Vec<SurvivalTree>,
    /// Unique training event times, ascending.
    event_times: Vec<f64>,
}

impl RandomSurvivalForest {
    pub fn fit(x: ArrayView2<'_, f64>, labels: &SurvivalLabels, params: &RsfParams) -> Self {
        let trees: Vec<SurvivalTree> = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
                SurvivalTree::fit(x, labels, params, &mut rng)
            })
            .collect();

        let mut event_times: Vec<f64> = (0..labels.len())
            .filter(|&i| labels.is_event(i))
            .map(|i| labels.time()[i])
            .collect();
        event_times.sort_unstable_by(f64::total_cmp);
        event_times.dedup();

        RandomSurvivalForest { trees, event_times }
    }

    /// Ensemble cumulative hazard summed over the training event times.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut risk = Array1::zeros(x.nrows());
        for (i, row) in x.outer_iter().enumerate() {
            let mut total = 0.0;
            for tree in &self.trees {
                let (chf, _) = tree.leaf_estimates(row);
                for &t in &self.event_times {
                    total += chf.eval(t);
                }
            }
            risk[i] = total / self.trees.len() as f64;
        }
        risk
    }

    /// Mean Kaplan-Meier survival across trees at each horizon.
    pub fn survival_probs(&self, x: ArrayView2<'_, f64>, horizons: &[f64]) -> Array2<f64> {
        let mut probs = Array2::zeros((x.nrows(), horizons.len()));
        for (i, row) in x.outer_iter().enumerate() {
            for tree in &self.trees {
                let (_, survival) = tree.leaf_estimates(row);
                for (k, &t) in horizons.iter().enumerate() {
                    probs[[i, k]] += survival.eval(t);
                }
            }
        }
        probs /= self.trees.len() as f64;
        probs
    }
}
