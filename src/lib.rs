//! ABC-MRT16: objective estimation of speech intelligibility.
//!
//! The Modified Rhyme Test (MRT) measures speech intelligibility with human
//! listeners picking one of six rhyming words. ABC-MRT16 replaces the
//! listening panel with a signal-processing estimate: each clip is compared
//! against precomputed time-frequency templates for the six candidate words
//! and scored through Articulation Index band correlations.
//!
//! The main entry point is [`process`] (or [`Estimator`] for an explicit
//! template store). Clips must be sampled at [`SAMPLE_RATE`]; decoding and
//! resampling are the caller's concern.

/// Time alignment of reference signatures against spectrograms.
mod align;
/// Articulation Index band map over the analysis bins.
mod bands;
/// File-number mapping for the 1200 talker/batch/word recordings.
pub mod files;
/// Row normalization of spectrogram slices.
mod normalize;
/// Trial scoring and batch estimation.
pub mod score;
/// Time-frequency analysis.
pub mod spectrum;
/// Lazy store of the reference templates.
pub mod templates;

pub use files::{FILE_COUNT, FileNumberError, file_order, file_to_number, guess_correction, number_to_file};
pub use score::{BatchScore, Estimator, ProcessError, process, process_one};
pub use templates::{TemplateError, TemplateStore, load_templates};

/// Sample rate the estimator expects, in Hz.
pub const SAMPLE_RATE: u32 = 48_000;
