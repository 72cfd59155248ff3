//! Row normalization of spectrogram slices.

use ndarray::{Array2, ArrayView2};

/// Remove each row's mean and scale the row to unit L2 norm.
///
/// A constant row has zero residual norm; the division then produces a NaN
/// row (0/0) which is deliberately left to propagate into downstream
/// correlations rather than being guarded against.
pub(crate) fn normalize_rows(slice: ArrayView2<'_, f64>) -> Array2<f64> {
    let cols = slice.ncols();
    let mut out = slice.to_owned();
    for mut row in out.rows_mut() {
        let mean = row.iter().sum::<f64>() / cols as f64;
        let mut energy = 0.0f64;
        for v in row.iter_mut() {
            *v -= mean;
            energy += *v * *v;
        }
        let norm = energy.sqrt();
        for v in row.iter_mut() {
            *v /= norm;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn rows_end_up_zero_mean_and_unit_norm() {
        let input = arr2(&[[1.0, 2.0, 4.0, 8.0], [-3.0, 0.5, 2.5, 100.0]]);
        let out = normalize_rows(input.view());
        for row in out.rows() {
            let mean: f64 = row.iter().sum::<f64>() / row.len() as f64;
            let norm: f64 = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!(mean.abs() < 1e-9, "row mean {mean}");
            assert!((norm - 1.0).abs() < 1e-9, "row norm {norm}");
        }
    }

    #[test]
    fn constant_row_becomes_nan() {
        let input = arr2(&[[5.0, 5.0, 5.0], [1.0, 2.0, 3.0]]);
        let out = normalize_rows(input.view());
        assert!(out.row(0).iter().all(|v| v.is_nan()));
        assert!(out.row(1).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn normalization_is_shift_and_scale_invariant() {
        let base = arr2(&[[0.2, -0.4, 1.7, 0.9]]);
        let shifted = base.mapv(|v| 3.0 * v + 10.0);
        let a = normalize_rows(base.view());
        let b = normalize_rows(shifted.view());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }
}
