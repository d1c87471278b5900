//! Model families and the fit/predict pipeline.
//!
//! Every family is trained through [`ModelSpec::fit`], which standardizes
//! the feature matrix and hands the scaled copy to the family's own fitting
//! routine. A [`FittedPipeline`] owns the scaler alongside the model, so
//! callers never see scaled features: risk scores, concordance scoring, and
//! survival probabilities all take raw feature rows in the training column
//! layout.
//!
//! Risk scores share one orientation across families: higher means an
//! earlier expected event.

pub mod boosted;
pub mod cox;
pub mod forest;
pub mod scaler;

use std::fmt;

use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

use crate::grid::{ParamAssignment, ParamValue};
use crate::metrics::{self, MetricError, StepFunction};
use crate::survival::SurvivalLabels;

use boosted::{GbsaParams, GradientBoostedCox};
use cox::{CoxnetParams, ElasticNetCox};
use forest::{RandomSurvivalForest, RsfParams};
use scaler::StandardScaler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Rsf,
    Gbsa,
    Coxnet,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [ModelFamily::Rsf, ModelFamily::Gbsa, ModelFamily::Coxnet];

    /// Stable key used in result tables and file names.
    pub fn key(self) -> &'static str {
        match self {
            ModelFamily::Rsf => "RSF",
            ModelFamily::Gbsa => "GBSA",
            ModelFamily::Coxnet => "Coxnet",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("unknown {family} hyperparameter '{name}'")]
    UnknownParam { family: ModelFamily, name: String },
    #[error("{family} hyperparameter '{name}' must be {expected}, got {value}")]
    InvalidParam {
        family: ModelFamily,
        name: String,
        expected: String,
        value: ParamValue,
    },
    #[error("feature matrix has {rows} rows but the labels describe {expected} subjects")]
    ShapeMismatch { expected: usize, rows: usize },
    #[error("training labels contain no events")]
    NoEvents,
    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// An unfit model: a family plus a fully resolved hyperparameter set.
#[derive(Debug, Clone)]
pub enum ModelSpec {
    Rsf(RsfParams),
    Gbsa(GbsaParams),
    Coxnet(CoxnetParams),
}

fn int_at_least(
    family: ModelFamily,
    name: &str,
    value: ParamValue,
    min: usize,
) -> Result<usize, ModelError> {
    match value.as_usize() {
        Some(v) if v >= min => Ok(v),
        _ => Err(ModelError::InvalidParam {
            family,
            name: name.to_string(),
            expected: format!("an integer of at least {min}"),
            value,
        }),
    }
}

fn positive_float(family: ModelFamily, name: &str, value: ParamValue) -> Result<f64, ModelError> {
    let v = value.as_f64();
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(ModelError::InvalidParam {
            family,
            name: name.to_string(),
            expected: "a positive number".to_string(),
            value,
        })
    }
}

fn unit_interval(family: ModelFamily, name: &str, value: ParamValue) -> Result<f64, ModelError> {
    let v = value.as_f64();
    if v > 0.0 && v <= 1.0 {
        Ok(v)
    } else {
        Err(ModelError::InvalidParam {
            family,
            name: name.to_string(),
            expected: "a number in (0, 1]".to_string(),
            value,
        })
    }
}

impl ModelSpec {
    pub fn family(&self) -> ModelFamily {
        match self {
            ModelSpec::Rsf(_) => ModelFamily::Rsf,
            ModelSpec::Gbsa(_) => ModelFamily::Gbsa,
            ModelSpec::Coxnet(_) => ModelFamily::Coxnet,
        }
    }

    /// Resolves a hyperparameter assignment against the family's schema,
    /// starting from the family defaults. Unknown names and out-of-range
    /// values are configuration errors.
    pub fn from_assignment(
        family: ModelFamily,
        assignment: &ParamAssignment,
    ) -> Result<Self, ModelError> {
        match family {
            ModelFamily::Rsf => {
                let mut params = RsfParams::default();
                for (name, value) in assignment.iter() {
                    match name {
                        "n_estimators" => params.n_estimators = int_at_least(family, name, value, 1)?,
                        "min_samples_split" => {
                            params.min_samples_split = int_at_least(family, name, value, 2)?
                        }
                        "min_samples_leaf" => {
                            params.min_samples_leaf = int_at_least(family, name, value, 1)?
                        }
                        _ => {
                            return Err(ModelError::UnknownParam {
                                family,
                                name: name.to_string(),
                            });
                        }
                    }
                }
                Ok(ModelSpec::Rsf(params))
            }
            ModelFamily::Gbsa => {
                let mut params = GbsaParams::default();
                for (name, value) in assignment.iter() {
                    match name {
                        "n_estimators" => params.n_estimators = int_at_least(family, name, value, 1)?,
                        "learning_rate" => params.learning_rate = positive_float(family, name, value)?,
                        "max_depth" => params.max_depth = int_at_least(family, name, value, 1)?,
                        "min_samples_leaf" => {
                            params.min_samples_leaf = int_at_least(family, name, value, 1)?
                        }
                        _ => {
                            return Err(ModelError::UnknownParam {
                                family,
                                name: name.to_string(),
                            });
                        }
                    }
                }
                Ok(ModelSpec::Gbsa(params))
            }
            ModelFamily::Coxnet => {
                let mut params = CoxnetParams::default();
                for (name, value) in assignment.iter() {
                    match name {
                        "l1_ratio" => params.l1_ratio = unit_interval(family, name, value)?,
                        "alpha_min_ratio" => {
                            params.alpha_min_ratio = positive_float(family, name, value)?
                        }
                        "max_iter" => params.max_iter = int_at_least(family, name, value, 1)?,
                        "tol" => params.tol = positive_float(family, name, value)?,
                        _ => {
                            return Err(ModelError::UnknownParam {
                                family,
                                name: name.to_string(),
                            });
                        }
                    }
                }
                Ok(ModelSpec::Coxnet(params))
            }
        }
    }

    /// Standardizes the features and trains the family on the scaled copy.
    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        labels: &SurvivalLabels,
    ) -> Result<FittedPipeline, ModelError> {
        if x.nrows() != labels.len() {
            return Err(ModelError::ShapeMismatch {
                expected: labels.len(),
                rows: x.nrows(),
            });
        }
        if labels.n_events() == 0 {
            return Err(ModelError::NoEvents);
        }

        let scaler = StandardScaler::fit(x);
        let scaled = scaler.transform(x);
        let model = match self {
            ModelSpec::Rsf(params) => {
                FittedModel::Rsf(RandomSurvivalForest::fit(scaled.view(), labels, params))
            }
            ModelSpec::Gbsa(params) => {
                FittedModel::Gbsa(GradientBoostedCox::fit(scaled.view(), labels, params))
            }
            ModelSpec::Coxnet(params) => {
                FittedModel::Coxnet(ElasticNetCox::fit(scaled.view(), labels, params))
            }
        };
        Ok(FittedPipeline {
            family: self.family(),
            scaler,
            model,
        })
    }
}

enum FittedModel {
    Rsf(RandomSurvivalForest),
    Gbsa(GradientBoostedCox),
    Coxnet(ElasticNetCox),
}

/// A trained scaler + model pair. Feature matrices passed to any method
/// must use the training column layout.
pub struct FittedPipeline {
    family: ModelFamily,
    scaler: StandardScaler,
    model: FittedModel,
}

impl FittedPipeline {
    pub fn family(&self) -> ModelFamily {
        self.family
    }

    /// Per-subject risk scores; higher means an earlier expected event.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let scaled = self.scaler.transform(x);
        match &self.model {
            FittedModel::Rsf(model) => model.predict(scaled.view()),
            FittedModel::Gbsa(model) => model.predict(scaled.view()),
            FittedModel::Coxnet(model) => model.predict(scaled.view()),
        }
    }

    /// Harrell concordance of the pipeline's risk scores against `labels`.
    pub fn score(&self, x: ArrayView2<'_, f64>, labels: &SurvivalLabels) -> Result<f64, ModelError> {
        let risk = self.predict(x);
        Ok(metrics::harrell_concordance(&risk, labels)?)
    }

    /// Predicted probability of remaining event-free, one row per subject
    /// and one column per horizon.
    pub fn survival_probs(&self, x: ArrayView2<'_, f64>, horizons: &[f64]) -> Array2<f64> {
        let scaled = self.scaler.transform(x);
        match &self.model {
            FittedModel::Rsf(model) => model.survival_probs(scaled.view(), horizons),
            FittedModel::Gbsa(model) => model.survival_probs(scaled.view(), horizons),
            FittedModel::Coxnet(model) => model.survival_probs(scaled.view(), horizons),
        }
    }
}

/// exp with the argument clamped to a safe range.
pub(crate) fn safe_exp(v: f64) -> f64 {
    v.clamp(-700.0, 700.0).exp()
}

/// Breslow estimate of the baseline cumulative hazard given per-subject
/// log-hazard predictions on the training data. With all-zero predictions
/// this reduces to the Nelson-Aalen estimator.
pub(crate) fn breslow_baseline(labels: &SurvivalLabels, log_hazard: &Array1<f64>) -> StepFunction {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_unstable_by(|&a, &b| labels.time()[a].total_cmp(&labels.time()[b]));

    let weights: Vec<f64> = order.iter().map(|&i| safe_exp(log_hazard[i])).collect();
    let mut suffix = vec![0.0; order.len() + 1];
    for k in (0..order.len()).rev() {
        suffix[k] = suffix[k + 1] + weights[k];
    }

    let mut times = Vec::new();
    let mut values = Vec::new();
    let mut cum = 0.0;
    let mut k = 0;
    while k < order.len() {
        let t = labels.time()[order[k]];
        let mut end = k;
        let mut d = 0usize;
        while end < order.len() && labels.time()[order[end]] == t {
            if labels.is_event(order[end]) {
                d += 1;
            }
            end += 1;
        }
        if d > 0 {
            cum += d as f64 / suffix[k];
            times.push(t);
            values.push(cum);
        }
        k = end;
    }
    StepFunction::new(times, values, 0.0)
}

/// S(t | x) = exp(-H0(t) * exp(eta)) for each subject row and horizon.
pub(crate) fn survival_from_baseline(
    baseline: &StepFunction,
    eta: &Array1<f64>,
    horizons: &[f64],
) -> Array2<f64> {
    let mut probs = Array2::zeros((eta.len(), horizons.len()));
    for (i, &e) in eta.iter().enumerate() {
        let hazard_scale = safe_exp(e);
        for (k, &t) in horizons.iter().enumerate() {
            probs[[i, k]] = (-baseline.eval(t) * hazard_scale).exp();
        }
    }
    probs
}
