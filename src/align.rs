//! Time alignment of a reference signature against a spectrogram window.

use ndarray::ArrayView2;

/// Find the shift of `reference` (width `q`) inside `window` (width
/// `n >= q`) that maximizes the summed row correlation.
///
/// `reference` rows must already be zero-mean with unit energy. Window
/// slices are normalized on the fly; the per-row running sum and raw energy
/// are updated incrementally so each shift costs O(rows) beyond the dot
/// product. Shifts whose score is NaN (zero-variance rows) are excluded
/// from the maximum and ties resolve to the lowest shift. Returns 0 when no
/// shift yields a finite score or when `reference` is wider than `window`.
pub(crate) fn best_shift(window: ArrayView2<'_, f64>, reference: ArrayView2<'_, f64>) -> usize {
    let rows = window.nrows();
    debug_assert_eq!(rows, reference.nrows());
    let n = window.ncols();
    let q = reference.ncols();
    if q == 0 || q > n {
        return 0;
    }

    let mut sums = vec![0.0f64; rows];
    let mut energies = vec![0.0f64; rows];
    for (row_idx, row) in window.rows().into_iter().enumerate() {
        for &v in row.iter().take(q) {
            sums[row_idx] += v;
            energies[row_idx] += v * v;
        }
    }

    let mut best = 0usize;
    let mut best_score = f64::NAN;
    for shift in 0..=(n - q) {
        if shift > 0 {
            for row_idx in 0..rows {
                let dropped = window[(row_idx, shift - 1)];
                let added = window[(row_idx, shift + q - 1)];
                sums[row_idx] += added - dropped;
                energies[row_idx] += added * added - dropped * dropped;
            }
        }
        let mut score = 0.0f64;
        for row_idx in 0..rows {
            let mean = sums[row_idx] / q as f64;
            // Residual energy after removing the mean; drift can push this
            // slightly negative, in which case sqrt yields NaN and the
            // shift is skipped like any other degenerate one.
            let norm = (energies[row_idx] - q as f64 * mean * mean).sqrt();
            let mut dot = 0.0f64;
            for col in 0..q {
                dot += (window[(row_idx, shift + col)] - mean) * reference[(row_idx, col)];
            }
            score += dot / norm;
        }
        if score.is_nan() {
            continue;
        }
        if best_score.is_nan() || score > best_score {
            best_score = score;
            best = shift;
        }
    }
    best
}
