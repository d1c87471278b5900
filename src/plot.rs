//! Two-panel SVG chart of the held-out AUC and Brier curves.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use plotters::coord::Shift;
use plotters::prelude::*;
use thiserror::Error;

use crate::holdout::{FamilyCurves, HoldoutReport};
use crate::models::ModelFamily;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
}

fn family_color(family: ModelFamily) -> RGBColor {
    match family {
        ModelFamily::Rsf => RED,
        ModelFamily::Gbsa => BLUE,
        ModelFamily::Coxnet => GREEN,
    }
}

fn finite_mean(values: &Array1<f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

fn finite_points(horizons: &[f64], values: &Array1<f64>) -> Vec<(f64, f64)> {
    horizons
        .iter()
        .zip(values.iter())
        .filter(|(_, v)| v.is_finite())
        .map(|(&t, &v)| (t, v))
        .collect()
}

fn draw_panel(
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    horizons: &[f64],
    curves: &[FamilyCurves],
    title: &str,
    metric: &str,
    values: impl Fn(&FamilyCurves) -> &Array1<f64>,
    y_max: f64,
) -> Result<(), String> {
    let x_min = horizons.first().copied().unwrap_or(0.0);
    let x_max = horizons.last().copied().unwrap_or(1.0);
    let pad = ((x_max - x_min) * 0.05).max(0.5);

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((x_min - pad)..(x_max + pad), 0.0..y_max)
        .map_err(|e| e.to_string())?;

    chart
        .configure_mesh()
        .x_desc("Time (years)")
        .y_desc(metric)
        .draw()
        .map_err(|e| e.to_string())?;

    for curve in curves {
        let color = family_color(curve.family);
        let points = finite_points(horizons, values(curve));
        let label = format!("{} ({metric}={:.2})", curve.family, finite_mean(values(curve)));
        chart
            .draw_series(LineSeries::new(points.clone(), color.stroke_width(2)))
            .map_err(|e| e.to_string())?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
        chart
            .draw_series(points.iter().map(|&(x, y)| Circle::new((x, y), 3, color.filled())))
            .map_err(|e| e.to_string())?;
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8).filled())
        .border_style(BLACK.stroke_width(1))
        .draw()
        .map_err(|e| e.to_string())?;
    Ok(())
}

fn draw(path: &Path, report: &HoldoutReport) -> Result<(), String> {
    let root = SVGBackend::new(path, (1400, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| e.to_string())?;
    let panels = root.split_evenly((1, 2));

    draw_panel(
        &panels[0],
        &report.horizons,
        &report.curves,
        "Time-dependent AUC",
        "AUC",
        |curve| &curve.auc,
        1.0,
    )?;

    let brier_max = report
        .curves
        .iter()
        .flat_map(|curve| curve.brier.iter().copied())
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    draw_panel(
        &panels[1],
        &report.horizons,
        &report.curves,
        "Brier Score",
        "Brier",
        |curve| &curve.brier,
        (brier_max * 1.1).max(0.25),
    )?;

    root.present().map_err(|e| e.to_string())
}

/// Renders `{outcome}_auc_brier.svg`: AUC on the left, Brier on the right,
/// one line per family with the curve mean in the legend. Horizons where a
/// metric is undefined are left out of the lines.
pub fn render_auc_brier_chart(
    out_dir: &Path,
    report: &HoldoutReport,
) -> Result<PathBuf, PlotError> {
    fs::create_dir_all(out_dir).map_err(|source| PlotError::CreateDir {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let path = out_dir.join(format!("{}_auc_brier.svg", report.outcome));
    draw(&path, report).map_err(|message| PlotError::Render {
        path: path.clone(),
        message,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample_report() -> HoldoutReport {
        HoldoutReport {
            outcome: "cirrhosis".to_string(),
            horizons: vec![1.0, 3.0, 5.0],
            curves: vec![
                FamilyCurves {
                    family: ModelFamily::Rsf,
                    auc: array![0.82, 0.79, 0.75],
                    brier: array![0.12, 0.15, 0.18],
                },
                FamilyCurves {
                    family: ModelFamily::Gbsa,
                    auc: array![0.8, 0.77, f64::NAN],
                    brier: array![0.13, 0.16, f64::NAN],
                },
                FamilyCurves {
                    family: ModelFamily::Coxnet,
                    auc: array![0.74, 0.72, 0.7],
                    brier: array![0.14, 0.17, 0.2],
                },
            ],
        }
    }

    #[test]
    fn chart_is_written_with_titles_and_legends() {
        let dir = tempdir().unwrap();
        let path = render_auc_brier_chart(dir.path(), &sample_report()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "cirrhosis_auc_brier.svg"
        );
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("<?xml") || text.contains("<svg"));
        assert!(text.contains("Time-dependent AUC"));
        assert!(text.contains("Brier Score"));
        assert!(text.contains("RSF (AUC=0.79)"));
        // The NaN horizon is excluded from the legend mean.
        assert!(text.contains("GBSA (AUC=0.79)"));
        assert!(text.contains("Coxnet (Brier=0.17)"));
    }

    #[test]
    fn all_nan_curves_still_render() {
        let dir = tempdir().unwrap();
        let nan = Array1::from_elem(3, f64::NAN);
        let report = HoldoutReport {
            outcome: "ascites".to_string(),
            horizons: vec![1.0, 3.0, 5.0],
            curves: vec![
                FamilyCurves {
                    family: ModelFamily::Rsf,
                    auc: nan.clone(),
                    brier: nan.clone(),
                },
                FamilyCurves {
                    family: ModelFamily::Gbsa,
                    auc: nan.clone(),
                    brier: nan.clone(),
                },
                FamilyCurves {
                    family: ModelFamily::Coxnet,
                    auc: nan.clone(),
                    brier: nan,
                },
            ],
        };
        let path = render_auc_brier_chart(dir.path(), &report).unwrap();
        assert!(path.exists());
    }
}
