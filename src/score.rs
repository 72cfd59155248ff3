//! Trial scoring and batch estimation.
//!
//! A trial compares one clip against the six candidate-word templates of
//! its talker/batch group: align, normalize, correlate per bin, aggregate
//! per AI band, then let the 16 strongest band ranks vote for a word. A
//! batch averages trial successes and corrects the mean for guessing.

use std::borrow::Cow;
use std::cmp::Ordering;

use ndarray::{Array2, s};
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::align::best_shift;
use crate::bands::BAND_MAP;
use crate::files::{FILE_COUNT, guess_correction};
use crate::normalize::normalize_rows;
use crate::spectrum::{SPECTRUM_BINS, spectrogram};
use crate::templates::{TemplateError, TemplateStore, WORDS_PER_GROUP, load_templates};

/// Minimum clip length in samples; shorter clips are zero-padded up to it.
pub(crate) const MIN_CLIP_LEN: usize = 42_000;
/// Spectrogram rows used for time alignment, chosen for cross-talker
/// robustness and speed.
const ALIGN_ROWS: std::ops::Range<usize> = 6..9;
/// Clips whose minimum normalized autocorrelation is at or above this are
/// treated as non-speech.
const SPEECH_GATE: f64 = -0.1;
/// Number of top-ranked AI bands that vote for a word.
const RANKS: usize = 16;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("batch shape mismatch: {clips} clips vs {file_numbers} file numbers")]
    BatchShape { clips: usize, file_numbers: usize },
}

/// Result of a batch of trials.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchScore {
    /// Mean trial success corrected for guessing. NaN when any trial was
    /// invalid: the mean deliberately does not skip NaN, matching the
    /// reference implementation.
    pub phi_hat: f64,
    /// Per-trial success values in steps of 1/16, or NaN for an invalid
    /// trial (empty clip or undefined file number).
    pub success: Vec<f64>,
}

/// Scores batches of clips against an explicit template store.
pub struct Estimator<'a> {
    store: &'a TemplateStore,
    verbose: bool,
}

impl<'a> Estimator<'a> {
    pub fn new(store: &'a TemplateStore) -> Self {
        Self {
            store,
            verbose: false,
        }
    }

    /// Emit per-trial progress and non-speech warnings through `tracing`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Score a batch of clips. `clips` and `file_numbers` must have the
    /// same length; a `None` or out-of-range file number marks that trial
    /// invalid without failing the batch.
    pub fn process<C: AsRef<[f32]>>(
        &self,
        clips: &[C],
        file_numbers: &[Option<u32>],
    ) -> Result<BatchScore, ProcessError> {
        if clips.len() != file_numbers.len() {
            return Err(ProcessError::BatchShape {
                clips: clips.len(),
                file_numbers: file_numbers.len(),
            });
        }
        let mut success = Vec::with_capacity(clips.len());
        for (index, (clip, &file_number)) in clips.iter().zip(file_numbers).enumerate() {
            success.push(self.score_trial(index, clips.len(), clip.as_ref(), file_number));
        }
        // The mean is not NaN-skipping: one invalid trial poisons the
        // aggregate, as in the reference implementation.
        let mean = success.iter().sum::<f64>() / success.len() as f64;
        Ok(BatchScore {
            phi_hat: guess_correction(mean),
            success,
        })
    }

    /// Single-clip convenience; builds a one-element batch.
    pub fn process_one(&self, clip: &[f32], file_number: u32) -> Result<BatchScore, ProcessError> {
        self.process(&[clip], &[Some(file_number)])
    }

    fn score_trial(
        &self,
        index: usize,
        total: usize,
        clip: &[f32],
        file_number: Option<u32>,
    ) -> f64 {
        if clip.is_empty() {
            return f64::NAN;
        }
        let Some(file_number) = file_number.filter(|n| (1..=FILE_COUNT).contains(n)) else {
            return f64::NAN;
        };
        let padded = pad_clip(clip);

        // Periodic signals (speech) show anticorrelation in the full
        // autocorrelation; noise does not. NaN appears when the zero-lag
        // energy used for normalization is zero.
        let autocorr_min = min_normalized_autocorrelation(&padded);
        if !(autocorr_min < SPEECH_GATE) {
            if self.verbose {
                warn!(clip = index, "speech not detected");
            }
            return 0.0;
        }
        if self.verbose {
            debug!(clip = index + 1, total, "scoring clip");
        }

        let x = spectrogram(&padded);
        let correct_word = ((file_number - 1) % WORDS_PER_GROUP as u32) as usize;
        let x_align = x.slice(s![ALIGN_ROWS, ..]);

        // Per-bin correlation against each of the six candidate templates.
        let mut per_bin = Array2::<f64>::zeros((SPECTRUM_BINS, WORDS_PER_GROUP));
        for word in 0..WORDS_PER_GROUP {
            let template = self.store.template(file_number, word);
            let q = template.ncols();
            if q > x.ncols() {
                // The clip is shorter than this candidate's template; no
                // alignment can cover it, so the word cannot win any rank.
                per_bin.column_mut(word).fill(f64::NAN);
                continue;
            }
            let shift = best_shift(x_align, template.slice(s![ALIGN_ROWS, ..]));
            let window = normalize_rows(x.slice(s![.., shift..shift + q]));
            for bin in 0..SPECTRUM_BINS {
                let mut corr = 0.0f64;
                for col in 0..q {
                    corr += window[(bin, col)] * template[(bin, col)];
                }
                per_bin[(bin, word)] = corr;
            }
        }

        // Aggregate per AI band (a NaN bin poisons the whole column, as in
        // the reference matrix product), then clamp negatives to zero while
        // letting NaN through.
        let band_map = &*BAND_MAP;
        let mut aggregated = band_map.matrix.dot(&per_bin);
        for (band, mut row) in aggregated.rows_mut().into_iter().enumerate() {
            for value in row.iter_mut() {
                *value /= band_map.bins_per_band[band];
                if *value < 0.0 {
                    *value = 0.0;
                }
            }
        }

        // Per word, sort band scores descending with NaN ordered first and
        // keep the 16 strongest ranks.
        let mut ranked = [[f64::NAN; WORDS_PER_GROUP]; RANKS];
        for word in 0..WORDS_PER_GROUP {
            let mut scores: Vec<f64> = aggregated.column(word).to_vec();
            scores.sort_by(compare_descending_nan_first);
            for (rank, row) in ranked.iter_mut().enumerate() {
                row[word] = scores[rank];
            }
        }

        // Each rank votes for the word with the largest score there.
        let votes = ranked
            .iter()
            .filter(|row| pick_word(row) == Some(correct_word))
            .count();
        votes as f64 / RANKS as f64
    }
}

/// Estimate intelligibility for a batch of clips using the bundled
/// templates, loading them on first use.
///
/// Returns the guess-corrected aggregate and the raw per-trial successes.
pub fn process<C: AsRef<[f32]>>(
    clips: &[C],
    file_numbers: &[Option<u32>],
    verbose: bool,
) -> Result<BatchScore, ProcessError> {
    let store = load_templates()?;
    Estimator::new(store).verbose(verbose).process(clips, file_numbers)
}

/// Single-clip convenience over [`process`].
pub fn process_one(clip: &[f32], file_number: u32, verbose: bool) -> Result<BatchScore, ProcessError> {
    process(&[clip], &[Some(file_number)], verbose)
}

fn pad_clip(clip: &[f32]) -> Cow<'_, [f32]> {
    if clip.len() >= MIN_CLIP_LEN {
        Cow::Borrowed(clip)
    } else {
        let mut padded = clip.to_vec();
        padded.resize(MIN_CLIP_LEN, 0.0);
        Cow::Owned(padded)
    }
}

/// Minimum of the full normalized autocorrelation of `clip`.
///
/// Computed through an FFT sized to at least twice the clip so the circular
/// correlation equals the linear one; the direct O(L^2) form is too slow at
/// the 42000-sample minimum. Returns NaN for a zero-energy clip.
fn min_normalized_autocorrelation(clip: &[f32]) -> f64 {
    let mut energy = 0.0f64;
    for &v in clip {
        energy += (v as f64) * (v as f64);
    }
    if clip.is_empty() || energy == 0.0 {
        return f64::NAN;
    }

    let fft_len = (2 * clip.len()).next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);
    let mut buffer = vec![Complex::default(); fft_len];
    for (cell, &v) in buffer.iter_mut().zip(clip) {
        *cell = Complex::new(v as f64, 0.0);
    }
    forward.process(&mut buffer);
    for cell in buffer.iter_mut() {
        *cell = Complex::new(cell.norm_sqr(), 0.0);
    }
    inverse.process(&mut buffer);

    // Lags beyond +-(L-1) hold only rounding noise near zero, which cannot
    // move a minimum taken against the -0.1 gate.
    let scale = fft_len as f64 * energy;
    let mut min = f64::INFINITY;
    for cell in &buffer {
        let value = cell.re / scale;
        if value < min {
            min = value;
        }
    }
    min
}

/// Descending order with NaN sorted first, matching the reference's
/// ascending sort plus flip where NaN lands on top.
fn compare_descending_nan_first(a: &f64, b: &f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => b.total_cmp(a),
    }
}

/// Index of the largest finite score, first max on ties; `None` when every
/// candidate is NaN.
fn pick_word(scores: &[f64; WORDS_PER_GROUP]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (word, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((word, score)),
        }
    }
    best.map(|(word, _)| word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_store() -> TemplateStore {
        let entries = (0..FILE_COUNT as usize)
            .map(|_| Array2::zeros((SPECTRUM_BINS, 3)))
            .collect();
        TemplateStore::from_entries(entries).unwrap()
    }

    #[test]
    fn silence_scores_zero_without_error() {
        let store = stub_store();
        let score = Estimator::new(&store)
            .process_one(&vec![0.0f32; 50_000], 1)
            .unwrap();
        assert_eq!(score.success, vec![0.0]);
        assert!((score.phi_hat - guess_correction(0.0)).abs() < 1e-12);
    }

    #[test]
    fn low_level_noise_is_gated_as_non_speech() {
        // A positive-biased, aperiodic signal has no anticorrelation.
        let clip: Vec<f32> = (0..50_000).map(|i| 0.5 + ((i % 13) as f32) * 1e-3).collect();
        let store = stub_store();
        let score = Estimator::new(&store).process_one(&clip, 10).unwrap();
        assert_eq!(score.success, vec![0.0]);
    }

    #[test]
    fn empty_clip_yields_nan_trial() {
        let store = stub_store();
        let score = Estimator::new(&store)
            .process(&[Vec::<f32>::new()], &[Some(5)])
            .unwrap();
        assert!(score.success[0].is_nan());
        assert!(score.phi_hat.is_nan());
    }

    #[test]
    fn undefined_file_number_yields_nan_trial() {
        let store = stub_store();
        let estimator = Estimator::new(&store);
        let clip = vec![0.0f32; 42_000];
        let missing = estimator.process(&[clip.clone()], &[None]).unwrap();
        assert!(missing.success[0].is_nan());
        let out_of_range = estimator.process(&[clip], &[Some(1201)]).unwrap();
        assert!(out_of_range.success[0].is_nan());
    }

    #[test]
    fn nan_trial_poisons_batch_mean() {
        let store = stub_store();
        let clips = vec![vec![0.0f32; 42_000], Vec::new(), vec![0.0f32; 42_000]];
        let numbers = vec![Some(1), Some(2), Some(3)];
        let score = Estimator::new(&store).process(&clips, &numbers).unwrap();
        assert_eq!(score.success.len(), 3);
        assert_eq!(score.success[0], 0.0);
        assert!(score.success[1].is_nan());
        assert_eq!(score.success[2], 0.0);
        assert!(score.phi_hat.is_nan());
    }

    #[test]
    fn mismatched_batch_lengths_are_an_error() {
        let store = stub_store();
        let err = Estimator::new(&store)
            .process(&[vec![0.0f32; 100]], &[Some(1), Some(2)])
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::BatchShape {
                clips: 1,
                file_numbers: 2
            }
        ));
    }

    #[test]
    fn sine_passes_the_speech_gate() {
        let clip: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * std::f64::consts::PI * 650.0 * i as f64 / 48_000.0).sin() as f32)
            .collect();
        let min = min_normalized_autocorrelation(&clip);
        assert!(min < SPEECH_GATE, "autocorrelation min {min}");
    }

    #[test]
    fn zero_energy_autocorrelation_is_nan() {
        assert!(min_normalized_autocorrelation(&[0.0; 1000]).is_nan());
        assert!(min_normalized_autocorrelation(&[]).is_nan());
    }

    #[test]
    fn autocorrelation_matches_direct_computation_on_short_input() {
        let clip: Vec<f32> = (0..64).map(|i| ((i * 7 % 11) as f32 - 5.0) * 0.1).collect();
        let fast = min_normalized_autocorrelation(&clip);
        let energy: f64 = clip.iter().map(|&v| (v as f64) * (v as f64)).sum();
        let mut direct = f64::INFINITY;
        for lag in 0..clip.len() {
            let mut sum = 0.0f64;
            for i in lag..clip.len() {
                sum += (clip[i] as f64) * (clip[i - lag] as f64);
            }
            direct = direct.min(sum / energy);
        }
        assert!((fast - direct).abs() < 1e-9, "fast {fast} direct {direct}");
    }

    #[test]
    fn pad_clip_extends_short_clips_with_zeros() {
        let padded = pad_clip(&[1.0, 2.0]);
        assert_eq!(padded.len(), MIN_CLIP_LEN);
        assert_eq!(&padded[..2], &[1.0, 2.0]);
        assert!(padded[2..].iter().all(|&v| v == 0.0));

        let long = vec![0.5f32; MIN_CLIP_LEN + 10];
        assert_eq!(pad_clip(&long).len(), long.len());
    }

    #[test]
    fn pick_word_ignores_nan_and_takes_first_max() {
        assert_eq!(pick_word(&[0.1, f64::NAN, 0.9, 0.9, 0.0, 0.2]), Some(2));
        assert_eq!(pick_word(&[f64::NAN; 6]), None);
        assert_eq!(pick_word(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0]), Some(0));
    }

    #[test]
    fn descending_sort_puts_nan_first() {
        let mut values = vec![0.3, f64::NAN, 0.9, 0.0];
        values.sort_by(compare_descending_nan_first);
        assert!(values[0].is_nan());
        assert_eq!(&values[1..], &[0.9, 0.3, 0.0]);
    }
}
