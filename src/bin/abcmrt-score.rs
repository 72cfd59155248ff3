//! Command-line scorer: estimate MRT intelligibility for WAV clips.
//!
//! File numbers are derived from the file names, which must contain the
//! `{talker}_b{batch}_w{word}` pattern. Clips are expected at 48 kHz;
//! resampling is out of scope here.

use std::path::PathBuf;

use abcmrt::{SAMPLE_RATE, file_to_number, process};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut verbose = false;
    let mut paths: Vec<PathBuf> = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(());
            }
            "-v" | "--verbose" => verbose = true,
            _ => paths.push(PathBuf::from(arg)),
        }
    }
    if paths.is_empty() {
        return Err(help_text());
    }

    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut clips = Vec::with_capacity(paths.len());
    let mut numbers = Vec::with_capacity(paths.len());
    for path in &paths {
        clips.push(read_wav_mono(path)?);
        let number = file_to_number(path);
        if number.is_none() {
            eprintln!(
                "warning: no file number in {}; trial will be NaN",
                path.display()
            );
        }
        numbers.push(number);
    }

    let score = process(&clips, &numbers, verbose).map_err(|err| err.to_string())?;
    for (path, success) in paths.iter().zip(&score.success) {
        println!("{}\t{success}", path.display());
    }
    println!("phi_hat\t{}", score.phi_hat);
    Ok(())
}

fn read_wav_mono(path: &PathBuf) -> Result<Vec<f32>, String> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|err| format!("failed to open {}: {err}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE {
        eprintln!(
            "warning: {} is sampled at {} Hz, expected {SAMPLE_RATE} Hz",
            path.display(),
            spec.sample_rate
        );
    }
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?,
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|sample| sample.map(|v| v as f32))
            .collect::<Result<_, _>>()
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?,
    };
    if spec.channels <= 1 {
        return Ok(samples);
    }
    // Downmix interleaved channels by averaging each frame.
    let channels = spec.channels as usize;
    let frames = samples.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for frame in 0..frames {
        let start = frame * channels;
        let sum: f32 = samples[start..start + channels].iter().sum();
        mono.push(sum / channels as f32);
    }
    Ok(mono)
}

fn help_text() -> String {
    [
        "abcmrt-score: estimate MRT speech intelligibility for WAV clips",
        "",
        "Usage: abcmrt-score [-v|--verbose] <clip.wav> [more.wav ...]",
        "",
        "File names must contain {talker}_b{batch}_w{word}, e.g. M3_b24_w2.wav.",
        "Prints one success value per clip and the guess-corrected aggregate.",
    ]
    .join("\n")
}
