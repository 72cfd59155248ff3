//! Articulation Index band map over the 215 analysis bins.
//!
//! The 21 AI bands follow the table in Quackenbush, Barnwell and Clements,
//! "Objective measures of speech quality" (1988), p. 38. Band 21 collects
//! everything above band 20 and below 20 kHz.

use std::sync::LazyLock;

use ndarray::Array2;

use crate::spectrum::SPECTRUM_BINS;

/// Number of AI bands.
pub(crate) const BAND_COUNT: usize = 21;

/// Inclusive 1-based FFT bin limits of each AI band. Bins 1..=3 belong to
/// no band.
#[rustfmt::skip]
const BAND_LIMITS: [(usize, usize); BAND_COUNT] = [
    (4, 4), (5, 6), (7, 7), (8, 9), (10, 11),
    (12, 13), (14, 15), (16, 17), (18, 19), (20, 21),
    (22, 23), (24, 26), (27, 28), (29, 31), (32, 35),
    (36, 40), (41, 45), (46, 52), (53, 62), (63, 76),
    (77, 215),
];

pub(crate) struct BandMap {
    /// `21 x 215` matrix with a 1 where a bin belongs to a band.
    pub(crate) matrix: Array2<f64>,
    /// Row sums of `matrix`; the averaging divisor for each band.
    pub(crate) bins_per_band: [f64; BAND_COUNT],
}

/// The band map is a fixed constant; build it once.
pub(crate) static BAND_MAP: LazyLock<BandMap> = LazyLock::new(BandMap::build);

impl BandMap {
    fn build() -> Self {
        let mut matrix = Array2::zeros((BAND_COUNT, SPECTRUM_BINS));
        let mut bins_per_band = [0.0f64; BAND_COUNT];
        for (band, &(first, last)) in BAND_LIMITS.iter().enumerate() {
            for bin in first..=last {
                matrix[(band, bin - 1)] = 1.0;
            }
            bins_per_band[band] = (last - first + 1) as f64;
        }
        Self {
            matrix,
            bins_per_band,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_bin_above_three_is_in_exactly_one_band() {
        let map = &*BAND_MAP;
        for bin in 0..SPECTRUM_BINS {
            let column_sum: f64 = map.matrix.column(bin).sum();
            if bin < 3 {
                assert_eq!(column_sum, 0.0, "bin {} should be unassigned", bin + 1);
            } else {
                assert_eq!(column_sum, 1.0, "bin {} should be in one band", bin + 1);
            }
        }
    }

    #[test]
    fn row_sums_match_band_widths() {
        let map = &*BAND_MAP;
        for (band, &(first, last)) in BAND_LIMITS.iter().enumerate() {
            let row_sum: f64 = map.matrix.row(band).sum();
            assert_eq!(row_sum, (last - first + 1) as f64);
            assert_eq!(row_sum, map.bins_per_band[band]);
        }
        // The catch-all band spans bins 77..=215.
        assert_eq!(map.bins_per_band[BAND_COUNT - 1], 139.0);
    }

    #[test]
    fn band_widths_sum_to_covered_bins() {
        let total: f64 = BAND_MAP.bins_per_band.iter().sum();
        assert_eq!(total, (SPECTRUM_BINS - 3) as f64);
    }
}
