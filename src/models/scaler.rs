//! Column-wise standardization fitted on training data.

use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Centers each column at its training mean and divides by its training
/// standard deviation (population form). Zero-variance columns keep a
/// scale of 1 so constant features pass through centered instead of
/// producing NaN.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<'_, f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mean = x.sum_axis(Axis(0)) / n;
        let centered = &x - &mean;
        let var = centered.mapv(|v| v * v).sum_axis(Axis(0)) / n;
        let scale = var.mapv(|v| if v > 0.0 { v.sqrt() } else { 1.0 });
        StandardScaler { mean, scale }
    }

    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut scaled = x.to_owned();
        scaled -= &self.mean;
        scaled /= &self.scale;
        scaled
    }
}
