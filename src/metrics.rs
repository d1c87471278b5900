//! Discrimination and calibration metrics for censored time-to-event data.
//!
//! Censoring makes naive accuracy meaningless, so everything here is built
//! on two primitives: right-continuous step functions over observed times,
//! and a reverse Kaplan-Meier estimate of the censoring distribution G used
//! for inverse-probability-of-censoring weighting. Horizons outside the
//! evaluable window of the test labels yield `NaN` rather than an error, so
//! a sweep over many horizons degrades per-point instead of aborting.

use ndarray::{Array1, ArrayView2};
use thiserror::Error;

use crate::survival::SurvivalLabels;

/// Risk estimates closer than this are treated as tied.
const TIED_TOL: f64 = 1e-8;

#[derive(Error, Debug)]
pub enum MetricError {
    #[error("estimate has {found} entries but the labels have {expected}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("no comparable pairs: concordance is undefined for these labels")]
    NoComparablePairs,
}

/// A right-continuous step function: `eval(t)` returns the value attached
/// to the last jump time `<= t`, or `initial` before the first jump.
#[derive(Debug, Clone)]
pub struct StepFunction {
    times: Vec<f64>,
    values: Vec<f64>,
    initial: f64,
}

impl StepFunction {
    /// `times` must be sorted ascending and the same length as `values`.
    pub fn new(times: Vec<f64>, values: Vec<f64>, initial: f64) -> Self {
        debug_assert_eq!(times.len(), values.len());
        debug_assert!(times.windows(2).all(|w| w[0] <= w[1]));
        StepFunction {
            times,
            values,
            initial,
        }
    }

    pub fn eval(&self, t: f64) -> f64 {
        let idx = self.times.partition_point(|&jump| jump <= t);
        if idx == 0 {
            self.initial
        } else {
            self.values[idx - 1]
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }
}

struct RiskRow {
    time: f64,
    n_at_risk: usize,
    n_events: usize,
    n_censored: usize,
}

/// Counts at each unique observed time, ascending.
fn risk_table(labels: &SurvivalLabels) -> Vec<RiskRow> {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_unstable_by(|&a, &b| labels.time()[a].total_cmp(&labels.time()[b]));

    let mut rows = Vec::new();
    let mut at_risk = labels.len();
    let mut i = 0;
    while i < order.len() {
        let t = labels.time()[order[i]];
        let mut n_events = 0;
        let mut n_censored = 0;
        while i < order.len() && labels.time()[order[i]] == t {
            if labels.is_event(order[i]) {
                n_events += 1;
            } else {
                n_censored += 1;
            }
            i += 1;
        }
        rows.push(RiskRow {
            time: t,
            n_at_risk: at_risk,
            n_events,
            n_censored,
        });
        at_risk -= n_events + n_censored;
    }
    rows
}

/// Kaplan-Meier estimate of the survival function S(t).
pub fn kaplan_meier(labels: &SurvivalLabels) -> StepFunction {
    let mut times = Vec::new();
    let mut values = Vec::new();
    let mut survival = 1.0;
    for row in risk_table(labels) {
        if row.n_events == 0 {
            continue;
        }
        survival *= 1.0 - row.n_events as f64 / row.n_at_risk as f64;
        times.push(row.time);
        values.push(survival);
    }
    StepFunction::new(times, values, 1.0)
}

/// Nelson-Aalen estimate of the cumulative hazard H(t).
pub fn nelson_aalen(labels: &SurvivalLabels) -> StepFunction {
    let mut times = Vec::new();
    let mut values = Vec::new();
    let mut hazard = 0.0;
    for row in risk_table(labels) {
        if row.n_events == 0 {
            continue;
        }
        hazard += row.n_events as f64 / row.n_at_risk as f64;
        times.push(row.time);
        values.push(hazard);
    }
    StepFunction::new(times, values, 0.0)
}

/// Reverse Kaplan-Meier estimate of the censoring distribution G(t), the
/// probability of still being under observation at t. Subjects with events
/// at a given time are removed from the denominator before the censoring
/// factor is applied, so G steps down only at censoring times.
#[derive(Debug, Clone)]
pub struct CensoringDistribution {
    surv: StepFunction,
}

impl CensoringDistribution {
    pub fn fit(labels: &SurvivalLabels) -> Self {
        let mut times = Vec::new();
        let mut values = Vec::new();
        let mut prob = 1.0;
        for row in risk_table(labels) {
            if row.n_censored == 0 {
                continue;
            }
            let denom = row.n_at_risk - row.n_events;
            prob *= 1.0 - row.n_censored as f64 / denom as f64;
            times.push(row.time);
            values.push(prob);
        }
        CensoringDistribution {
            surv: StepFunction::new(times, values, 1.0),
        }
    }

    /// G(t), extended right-continuously past the last observed time.
    pub fn proba_at(&self, t: f64) -> f64 {
        self.surv.eval(t)
    }

    /// IPCW weight 1/G(t); zero when the censoring support is exhausted,
    /// which drops the subject from weighted sums instead of blowing up.
    pub fn ipcw_at(&self, t: f64) -> f64 {
        let g = self.proba_at(t);
        if g > 0.0 { 1.0 / g } else { 0.0 }
    }
}

/// Harrell's concordance index. A pair is comparable when the earlier
/// subject had an event and the later subject outlived it (censored
/// subjects tied on time count as later). Ties on the estimate earn half
/// credit.
pub fn harrell_concordance(
    risk: &Array1<f64>,
    labels: &SurvivalLabels,
) -> Result<f64, MetricError> {
    if risk.len() != labels.len() {
        return Err(MetricError::ShapeMismatch {
            expected: labels.len(),
            found: risk.len(),
        });
    }

    let mut numerator = 0.0;
    let mut n_pairs = 0usize;
    for i in 0..labels.len() {
        if !labels.is_event(i) {
            continue;
        }
        let t_i = labels.time()[i];
        for j in 0..labels.len() {
            let comparable =
                labels.time()[j] > t_i || (labels.time()[j] == t_i && !labels.is_event(j));
            if !comparable {
                continue;
            }
            n_pairs += 1;
            let diff = risk[i] - risk[j];
            if diff.abs() <= TIED_TOL {
                numerator += 0.5;
            } else if diff > 0.0 {
                numerator += 1.0;
            }
        }
    }

    if n_pairs == 0 {
        return Err(MetricError::NoComparablePairs);
    }
    Ok(numerator / n_pairs as f64)
}

fn evaluable_window(test: &SurvivalLabels, t: f64) -> bool {
    !test.is_empty() && t >= test.min_time() && t < test.max_time()
}

/// Uno's cumulative/dynamic AUC at each horizon, IPCW-weighted against the
/// training censoring distribution. Horizons outside `[min, max)` of the
/// test times, or with no cases or no controls, come back `NaN`.
pub fn cumulative_dynamic_auc(
    train: &SurvivalLabels,
    test: &SurvivalLabels,
    risk: &Array1<f64>,
    horizons: &[f64],
) -> Result<Array1<f64>, MetricError> {
    if risk.len() != test.len() {
        return Err(MetricError::ShapeMismatch {
            expected: test.len(),
            found: risk.len(),
        });
    }

    let cens = CensoringDistribution::fit(train);
    let mut scores = Array1::from_elem(horizons.len(), f64::NAN);

    for (k, &t) in horizons.iter().enumerate() {
        if !evaluable_window(test, t) {
            continue;
        }

        let cases: Vec<usize> = (0..test.len())
            .filter(|&i| test.time()[i] <= t && test.is_event(i))
            .collect();
        let controls: Vec<usize> = (0..test.len()).filter(|&i| test.time()[i] > t).collect();

        let mut numerator = 0.0;
        let mut weight_sum = 0.0;
        for &i in &cases {
            let w = cens.ipcw_at(test.time()[i]);
            weight_sum += w;
            for &j in &controls {
                let diff = risk[i] - risk[j];
                if diff.abs() <= TIED_TOL {
                    numerator += 0.5 * w;
                } else if diff > 0.0 {
                    numerator += w;
                }
            }
        }

        // 0/0 when either side is empty or all case weights vanished.
        scores[k] = numerator / (weight_sum * controls.len() as f64);
    }
    Ok(scores)
}

/// Graf's IPCW Brier score at each horizon. `survival_probs` holds the
/// predicted probability of remaining event-free, one row per test subject
/// and one column per horizon. Horizons outside the evaluable window come
/// back `NaN`.
pub fn brier_scores(
    train: &SurvivalLabels,
    test: &SurvivalLabels,
    survival_probs: ArrayView2<'_, f64>,
    horizons: &[f64],
) -> Result<Array1<f64>, MetricError> {
    if survival_probs.nrows() != test.len() {
        return Err(MetricError::ShapeMismatch {
            expected: test.len(),
            found: survival_probs.nrows(),
        });
    }
    if survival_probs.ncols() != horizons.len() {
        return Err(MetricError::ShapeMismatch {
            expected: horizons.len(),
            found: survival_probs.ncols(),
        });
    }

    let cens = CensoringDistribution::fit(train);
    let mut scores = Array1::from_elem(horizons.len(), f64::NAN);

    for (k, &t) in horizons.iter().enumerate() {
        if !evaluable_window(test, t) {
            continue;
        }

        let w_control = cens.ipcw_at(t);
        let mut total = 0.0;
        for i in 0..test.len() {
            let est = survival_probs[[i, k]];
            if test.time()[i] <= t && test.is_event(i) {
                total += est * est * cens.ipcw_at(test.time()[i]);
            } else if test.time()[i] > t {
                total += (1.0 - est) * (1.0 - est) * w_control;
            }
        }
        scores[k] = total / test.len() as f64;
    }
    Ok(scores)
}
