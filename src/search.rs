//! Cross-validated grid search over nested feature sets.
//!
//! One sweep covers one (model family, outcome) pair: feature sets outer,
//! hyperparameter assignments inner, five stratified folds per assignment.
//! The fold partition is derived once per feature set from the labels and
//! the fixed study seed, so every family and assignment is scored against
//! identical partitions. Degenerate feature sets are skipped and failed
//! folds are dropped; neither stops the sweep.

use ndarray::{Array2, Axis};
use thiserror::Error;

use crate::config::{ConfigError, OutcomeSpec, StudyConfig};
use crate::data::{CohortTable, DataError};
use crate::folds::{self, FoldError, FoldPlan};
use crate::grid::ParamAssignment;
use crate::models::{ModelError, ModelFamily, ModelSpec};
use crate::survival::SurvivalLabels;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One row of a sweep's result table. Statistics are rounded to four
/// decimal places at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRecord {
    pub model: String,
    pub outcome: String,
    pub feature_set: String,
    pub params: String,
    pub mean_cindex: f64,
    pub std_cindex: f64,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn evaluate_assignment(
    x: &Array2<f64>,
    labels: &SurvivalLabels,
    plan: &FoldPlan,
    spec: &ModelSpec,
    combo_name: &str,
    assignment: &ParamAssignment,
) -> Vec<f64> {
    let mut scores = Vec::with_capacity(plan.n_folds());
    for fold in 0..plan.n_folds() {
        let (train_rows, test_rows) = plan.split(fold);
        let x_train = x.select(Axis(0), &train_rows);
        let x_test = x.select(Axis(0), &test_rows);
        let y_train = labels.select(&train_rows);
        let y_test = labels.select(&test_rows);

        let fold_result = spec
            .fit(x_train.view(), &y_train)
            .and_then(|pipeline| pipeline.score(x_test.view(), &y_test));
        match fold_result {
            Ok(score) => scores.push(score),
            Err(e) => {
                println!("{combo_name} | Params={assignment} | Error: {e}");
                log::warn!(
                    "fold {fold} failed for feature set '{combo_name}', params {assignment}: {e}"
                );
            }
        }
    }
    scores
}

/// Fold partition for one (outcome, feature set) pair, derived from the
/// pair's eligible labels and the fixed study seed alone. Every family
/// scoring the pair in a sweep gets the identical partition.
pub fn fold_plan(labels: &SurvivalLabels) -> Result<FoldPlan, FoldError> {
    folds::stratified_k_folds(labels.event(), folds::DEFAULT_FOLDS, folds::STUDY_SEED)
}

/// Runs the full sweep for one family and outcome, returning records ranked
/// by mean concordance, best first (ties keep insertion order).
pub fn run_grid_search(
    table: &CohortTable,
    config: &StudyConfig,
    family: ModelFamily,
    outcome: &OutcomeSpec,
) -> Result<Vec<PerformanceRecord>, SearchError> {
    // A malformed grid is a configuration error and fatal, so every
    // assignment is resolved before any fitting starts.
    let specs: Vec<(ParamAssignment, ModelSpec)> = config
        .grids
        .for_family(family)
        .expand()
        .into_iter()
        .map(|assignment| {
            ModelSpec::from_assignment(family, &assignment).map(|spec| (assignment, spec))
        })
        .collect::<Result<_, ModelError>>()?;

    println!("Model: {family} | Outcome: {}", outcome.name);

    let mut records = Vec::new();
    for combo in &config.combos {
        let columns = config.combo_columns(combo)?;
        let eligible =
            table.eligible_rows(&outcome.time_column, &outcome.event_column, &columns)?;
        if eligible.is_empty() || !table.has_event_variation(&outcome.event_column, &eligible)? {
            println!("Skipping feature set '{}' due to insufficient variation", combo.name);
            log::warn!(
                "outcome '{}', feature set '{}': no usable rows or a single outcome class",
                outcome.name,
                combo.name
            );
            continue;
        }

        let labels = SurvivalLabels::from_table(
            table,
            &outcome.time_column,
            &outcome.event_column,
            &eligible,
        )?;
        let x = table.feature_matrix(&columns, &eligible)?;

        let plan = match fold_plan(&labels) {
            Ok(plan) => plan,
            Err(e) => {
                println!("Skipping feature set '{}': {e}", combo.name);
                log::warn!("outcome '{}', feature set '{}': {e}", outcome.name, combo.name);
                continue;
            }
        };

        for (assignment, spec) in &specs {
            let scores = evaluate_assignment(&x, &labels, &plan, spec, &combo.name, assignment);
            if scores.is_empty() {
                log::warn!(
                    "feature set '{}', params {assignment}: every fold failed, omitting",
                    combo.name
                );
                continue;
            }
            let (mean, std) = mean_and_std(&scores);
            records.push(PerformanceRecord {
                model: family.key().to_string(),
                outcome: outcome.name.clone(),
                feature_set: combo.name.clone(),
                params: assignment.to_string(),
                mean_cindex: round4(mean),
                std_cindex: round4(std),
            });
        }

        println!("Done with feature set: {}", combo.name);
        println!("{}", "=".repeat(50));
    }

    records.sort_by(|a, b| b.mean_cindex.total_cmp(&a.mean_cindex));
    Ok(records)
}
