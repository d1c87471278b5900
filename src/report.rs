//! CSV result tables for the grid search and the held-out evaluation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::holdout::HoldoutReport;
use crate::models::ModelFamily;
use crate::search::PerformanceRecord;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: csv::Error },
}

fn ensure_dir(out_dir: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(out_dir).map_err(|source| ReportError::CreateDir {
        path: out_dir.to_path_buf(),
        source,
    })
}

fn cell(v: f64) -> String {
    if v.is_finite() { v.to_string() } else { "NaN".to_string() }
}

/// Writes one sweep's ranked records to `{family}_{outcome}_gridsearch.csv`.
/// The header is written even when no feature set produced a record.
pub fn write_gridsearch_csv(
    out_dir: &Path,
    family: ModelFamily,
    outcome_name: &str,
    records: &[PerformanceRecord],
) -> Result<PathBuf, ReportError> {
    ensure_dir(out_dir)?;
    let path = out_dir.join(format!("{}_{}_gridsearch.csv", family.key(), outcome_name));
    let write = |path: &Path| -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record([
            "Model",
            "Outcome",
            "Feature_Set",
            "Params",
            "Mean_Cindex",
            "Std_Cindex",
        ])?;
        for record in records {
            wtr.write_record([
                record.model.as_str(),
                record.outcome.as_str(),
                record.feature_set.as_str(),
                record.params.as_str(),
                &cell(record.mean_cindex),
                &cell(record.std_cindex),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    };
    write(&path).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    println!("Saved to: {}", path.display());
    Ok(path)
}

/// Writes the held-out AUC and Brier curves to `{outcome}_metrics.csv`,
/// one row per horizon. Undefined metrics appear as `NaN`.
pub fn write_metrics_csv(out_dir: &Path, report: &HoldoutReport) -> Result<PathBuf, ReportError> {
    ensure_dir(out_dir)?;
    let path = out_dir.join(format!("{}_metrics.csv", report.outcome));
    let write = |path: &Path| -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_path(path)?;
        let mut header = vec!["Time".to_string()];
        for curve in &report.curves {
            header.push(format!("{}_AUC", curve.family.key()));
            header.push(format!("{}_Brier", curve.family.key()));
        }
        wtr.write_record(&header)?;
        for (i, t) in report.horizons.iter().enumerate() {
            let mut row = vec![cell(*t)];
            for curve in &report.curves {
                row.push(cell(curve.auc[i]));
                row.push(cell(curve.brier[i]));
            }
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    };
    write(&path).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub fn runtime_summary(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    format!(
        "Total runtime: {:.2} seconds ({:.2} minutes)",
        seconds,
        seconds / 60.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holdout::FamilyCurves;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample_records() -> Vec<PerformanceRecord> {
        vec![
            PerformanceRecord {
                model: "Coxnet".to_string(),
                outcome: "cirrhosis".to_string(),
                feature_set: "b".to_string(),
                params: "l1_ratio=0.5".to_string(),
                mean_cindex: 0.7321,
                std_cindex: 0.0213,
            },
            PerformanceRecord {
                model: "Coxnet".to_string(),
                outcome: "cirrhosis".to_string(),
                feature_set: "a".to_string(),
                params: "l1_ratio=1".to_string(),
                mean_cindex: 0.7015,
                std_cindex: 0.0302,
            },
        ]
    }

    #[test]
    fn gridsearch_csv_has_exact_header_and_ranked_rows() {
        let dir = tempdir().unwrap();
        let path = write_gridsearch_csv(
            dir.path(),
            ModelFamily::Coxnet,
            "cirrhosis",
            &sample_records(),
        )
        .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "Coxnet_cirrhosis_gridsearch.csv"
        );
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Model,Outcome,Feature_Set,Params,Mean_Cindex,Std_Cindex"
        );
        assert_eq!(lines.next().unwrap(), "Coxnet,cirrhosis,b,l1_ratio=0.5,0.7321,0.0213");
        assert_eq!(lines.next().unwrap(), "Coxnet,cirrhosis,a,l1_ratio=1,0.7015,0.0302");
        assert!(lines.next().is_none());
    }

    #[test]
    fn multi_param_assignments_are_quoted() {
        let dir = tempdir().unwrap();
        let mut records = sample_records();
        records[0].params = "min_samples_leaf=5, min_samples_split=10".to_string();
        let path =
            write_gridsearch_csv(dir.path(), ModelFamily::Rsf, "cirrhosis", &records).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"min_samples_leaf=5, min_samples_split=10\""));
    }

    #[test]
    fn empty_sweep_still_writes_the_header() {
        let dir = tempdir().unwrap();
        let path = write_gridsearch_csv(dir.path(), ModelFamily::Gbsa, "ascites", &[]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "Model,Outcome,Feature_Set,Params,Mean_Cindex,Std_Cindex");
    }

    #[test]
    fn metrics_csv_interleaves_auc_and_brier_per_family() {
        let dir = tempdir().unwrap();
        let report = HoldoutReport {
            outcome: "ascites".to_string(),
            horizons: vec![1.0, 3.0],
            curves: vec![
                FamilyCurves {
                    family: ModelFamily::Rsf,
                    auc: array![0.8, f64::NAN],
                    brier: array![0.15, f64::NAN],
                },
                FamilyCurves {
                    family: ModelFamily::Gbsa,
                    auc: array![0.75, 0.7],
                    brier: array![0.2, 0.22],
                },
                FamilyCurves {
                    family: ModelFamily::Coxnet,
                    auc: array![0.7, 0.68],
                    brier: array![0.18, 0.19],
                },
            ],
        };
        let path = write_metrics_csv(dir.path(), &report).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "ascites_metrics.csv");
        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Time,RSF_AUC,RSF_Brier,GBSA_AUC,GBSA_Brier,Coxnet_AUC,Coxnet_Brier"
        );
        assert_eq!(lines.next().unwrap(), "1,0.8,0.15,0.75,0.2,0.7,0.18");
        assert_eq!(lines.next().unwrap(), "3,NaN,NaN,0.7,0.22,0.68,0.19");
    }

    #[test]
    fn output_directory_is_created_on_demand() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("results").join("run1");
        write_gridsearch_csv(&nested, ModelFamily::Coxnet, "cirrhosis", &[]).unwrap();
        assert!(nested.join("Coxnet_cirrhosis_gridsearch.csv").exists());
    }

    #[test]
    fn runtime_summary_rounds_to_two_decimals() {
        let text = runtime_summary(Duration::from_millis(90_131));
        assert_eq!(text, "Total runtime: 90.13 seconds (1.50 minutes)");
    }
}
