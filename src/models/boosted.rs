//! Gradient-boosted Cox regression: a stagewise additive log-hazard model
//! where each stage fits a depth-limited least-squares regression tree to
//! the negative gradient of the Breslow partial likelihood.
//!
//! There is no subsampling and no feature sampling, so fitting is fully
//! deterministic.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::metrics::StepFunction;
use crate::survival::SurvivalLabels;

use super::{breslow_baseline, safe_exp, survival_from_baseline};

#[derive(Debug, Clone, PartialEq)]
pub struct GbsaParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for GbsaParams {
    fn default() -> Self {
        GbsaParams {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
        }
    }
}

enum RegNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

struct RegSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Squared-error-optimal split over every feature, or `None` when no split
/// reduces the node's squared error.
fn best_reg_split(
    x: ArrayView2<'_, f64>,
    targets: &Array1<f64>,
    rows: &[usize],
    min_samples_leaf: usize,
) -> Option<RegSplit> {
    let n = rows.len();
    if n < 2 * min_samples_leaf {
        return None;
    }
    let total: f64 = rows.iter().map(|&r| targets[r]).sum();
    let parent_score = total * total / n as f64;

    let mut best: Option<RegSplit> = None;
    for feature in 0..x.ncols() {
        let mut ordered: Vec<usize> = rows.to_vec();
        ordered.sort_unstable_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        for (pos, &r) in ordered.iter().enumerate().take(n - 1) {
            left_sum += targets[r];
            let here = x[[r, feature]];
            let next = x[[ordered[pos + 1], feature]];
            if here == next {
                continue;
            }
            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < min_samples_leaf || n_right < min_samples_leaf {
                continue;
            }

            let right_sum = total - left_sum;
            let score = left_sum * left_sum / n_left as f64
                + right_sum * right_sum / n_right as f64;
            let gain = score - parent_score;
            let beats = best.as_ref().map_or(gain > 1e-12, |b| gain > b.gain);
            if beats {
                best = Some(RegSplit {
                    feature,
                    threshold: (here + next) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}

fn grow_reg(
    x: ArrayView2<'_, f64>,
    targets: &Array1<f64>,
    rows: &[usize],
    depth_left: usize,
    min_samples_leaf: usize,
    nodes: &mut Vec<RegNode>,
) -> usize {
    let mean = rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64;
    if depth_left == 0 {
        nodes.push(RegNode::Leaf { value: mean });
        return nodes.len() - 1;
    }
    let Some(split) = best_reg_split(x, targets, rows, min_samples_leaf) else {
        nodes.push(RegNode::Leaf { value: mean });
        return nodes.len() - 1;
    };

    let idx = nodes.len();
    nodes.push(RegNode::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: 0,
        right: 0,
    });
    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .copied()
        .partition(|&r| x[[r, split.feature]] <= split.threshold);
    let left = grow_reg(x, targets, &left_rows, depth_left - 1, min_samples_leaf, nodes);
    let right = grow_reg(x, targets, &right_rows, depth_left - 1, min_samples_leaf, nodes);
    if let RegNode::Split {
        left: l, right: r, ..
    } = &mut nodes[idx]
    {
        *l = left;
        *r = right;
    }
    idx
}

struct RegressionTree {
    nodes: Vec<RegNode>,
}

impl RegressionTree {
    fn fit(
        x: ArrayView2<'_, f64>,
        targets: &Array1<f64>,
        max_depth: usize,
        min_samples_leaf: usize,
    ) -> Self {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut nodes = Vec::new();
        grow_reg(x, targets, &rows, max_depth, min_samples_leaf, &mut nodes);
        RegressionTree { nodes }
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                RegNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                RegNode::Leaf { value } => return *value,
            }
        }
    }
}

/// delta_i - exp(f_i) * H0(T_i): the negative gradient of the Breslow
/// partial likelihood at the current additive predictor f.
fn negative_gradient(labels: &SurvivalLabels, f: &Array1<f64>) -> Array1<f64> {
    let chf = breslow_baseline(labels, f);
    Array1::from_shape_fn(labels.len(), |i| {
        let delta = if labels.is_event(i) { 1.0 } else { 0.0 };
        delta - safe_exp(f[i]) * chf.eval(labels.time()[i])
    })
}

pub struct GradientBoostedCox {
    trees: Vec<RegressionTree>,
    learning_rate: f64,
    baseline: StepFunction,
}

impl GradientBoostedCox {
    pub fn fit(x: ArrayView2<'_, f64>, labels: &SurvivalLabels, params: &GbsaParams) -> Self {
        let mut f: Array1<f64> = Array1::zeros(x.nrows());
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals = negative_gradient(labels, &f);
            let tree =
                RegressionTree::fit(x, &residuals, params.max_depth, params.min_samples_leaf);
            for (i, row) in x.outer_iter().enumerate() {
                f[i] += params.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        let baseline = breslow_baseline(labels, &f);
        GradientBoostedCox {
            trees,
            learning_rate: params.learning_rate,
            baseline,
        }
    }

    /// Risk scores are the additive log-hazard predictor.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut f = Array1::zeros(x.nrows());
        for (i, row) in x.outer_iter().enumerate() {
            for tree in &self.trees {
                f[i] += self.learning_rate * tree.predict_row(row);
            }
        }
        f
    }

    pub fn survival_probs(&self, x: ArrayView2<'_, f64>, horizons: &[f64]) -> Array2<f64> {
        let eta = self.predict(x);
        survival_from_baseline(&self.baseline, &eta, horizons)
    }
}
