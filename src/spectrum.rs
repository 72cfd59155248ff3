//! Time-frequency analysis: windowed 512-point FFT magnitude spectrogram.

use ndarray::Array2;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

/// Analysis window length in samples.
pub(crate) const WINDOW_LEN: usize = 512;
/// Hop between successive frames (75% overlap).
pub(crate) const HOP_LEN: usize = WINDOW_LEN / 4;
/// FFT bins kept from each frame; bin 215 sits just below 20 kHz at 48 kHz.
pub const SPECTRUM_BINS: usize = 215;
/// Magnitude exponent approximating perceived loudness (Stevens' law).
const LOUDNESS_EXPONENT: f64 = 0.6;

/// Number of analysis frames produced for `len` input samples.
pub(crate) fn frame_count(len: usize) -> usize {
    len.saturating_sub(WINDOW_LEN).div_ceil(HOP_LEN) + 1
}

/// Compressed-magnitude spectrogram of a clip: `215 x frames`, `|FFT|^0.6`
/// per bin.
///
/// The clip is zero-padded on the right so the final window is full. Pure
/// and deterministic; no state is retained between calls.
pub fn spectrogram(samples: &[f32]) -> Array2<f64> {
    let nframes = frame_count(samples.len());
    let padded_len = (nframes - 1) * HOP_LEN + WINDOW_LEN;
    let mut padded = vec![0.0f64; padded_len];
    for (cell, &sample) in padded.iter_mut().zip(samples) {
        *cell = sample as f64;
    }

    let window = raised_cosine_window();
    let fft = FftPlanner::<f64>::new().plan_fft_forward(WINDOW_LEN);
    let mut buffer = vec![Complex::default(); WINDOW_LEN];
    let mut out = Array2::zeros((SPECTRUM_BINS, nframes));
    for frame in 0..nframes {
        let start = frame * HOP_LEN;
        for (cell, (&sample, &win)) in buffer
            .iter_mut()
            .zip(padded[start..start + WINDOW_LEN].iter().zip(window.iter()))
        {
            *cell = Complex::new(sample * win, 0.0);
        }
        fft.process(&mut buffer);
        for bin in 0..SPECTRUM_BINS {
            out[(bin, frame)] = buffer[bin].norm().powf(LOUDNESS_EXPONENT);
        }
    }
    out
}

/// Periodic raised-cosine window, `w[i] = 0.5 - 0.5 cos(2 pi i / 512)`.
///
/// The denominator is the window length, not length minus one; the reference
/// algorithm uses the periodic variant.
fn raised_cosine_window() -> [f64; WINDOW_LEN] {
    let mut window = [0.0f64; WINDOW_LEN];
    for (i, w) in window.iter_mut().enumerate() {
        let phase = 2.0 * std::f64::consts::PI * i as f64 / WINDOW_LEN as f64;
        *w = 0.5 - 0.5 * phase.cos();
    }
    window
}
