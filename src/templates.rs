//! Lazy store of the 1200 pre-normalized time-frequency reference templates.
//!
//! Each template is the row-normalized compressed-magnitude spectrogram of
//! one talker/word source recording (zero mean and unit energy per row,
//! applied when the resource was packaged). The store is loaded at most once
//! per process and is immutable afterwards, so unsynchronized concurrent
//! reads are safe.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use ndarray::Array2;
use thiserror::Error;

use crate::files::FILE_COUNT;
use crate::spectrum::SPECTRUM_BINS;

/// Candidate words per batch; templates come in groups of six.
pub const WORDS_PER_GROUP: usize = 6;

/// Environment variable overriding the bundled template resource path.
pub const TEMPLATE_PATH_VAR: &str = "ABCMRT_TEMPLATES";

const MAGIC: &[u8; 8] = b"ABCMRT16";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template resource {path}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("malformed template resource: {message}")]
    Malformed { message: String },
}

/// The 1200 reference templates, indexed by file number.
#[derive(Debug)]
pub struct TemplateStore {
    entries: Vec<Array2<f64>>,
}

impl TemplateStore {
    /// Build a store from in-memory entries.
    ///
    /// Exactly 1200 entries are required, each with 215 rows and at least
    /// one frame. Rows are assumed to be pre-normalized (zero mean, unit
    /// energy); that property is a contract with the packager and is not
    /// re-checked here.
    pub fn from_entries(entries: Vec<Array2<f64>>) -> Result<Self, TemplateError> {
        if entries.len() != FILE_COUNT as usize {
            return Err(TemplateError::Malformed {
                message: format!("expected {FILE_COUNT} templates, got {}", entries.len()),
            });
        }
        for (index, entry) in entries.iter().enumerate() {
            if entry.nrows() != SPECTRUM_BINS || entry.ncols() == 0 {
                return Err(TemplateError::Malformed {
                    message: format!(
                        "template {} has shape {}x{}, expected {SPECTRUM_BINS} rows and at least one frame",
                        index + 1,
                        entry.nrows(),
                        entry.ncols()
                    ),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Deserialize the store from a packaged resource file.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let bytes = fs::read(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Parse the binary resource encoding: the `ABCMRT16` magic, a `u32`
    /// entry count, then per entry a `u32` frame count followed by
    /// `215 * frames` row-major little-endian `f32` values.
    pub fn parse(bytes: &[u8]) -> Result<Self, TemplateError> {
        let mut reader = ByteReader { bytes, pos: 0 };
        let magic = reader.take(MAGIC.len())?;
        if magic != MAGIC {
            return Err(TemplateError::Malformed {
                message: "bad magic; not an ABC-MRT16 template resource".into(),
            });
        }
        let count = reader.read_u32()?;
        if count != FILE_COUNT {
            return Err(TemplateError::Malformed {
                message: format!("resource declares {count} templates, expected {FILE_COUNT}"),
            });
        }
        let mut entries = Vec::with_capacity(count as usize);
        for index in 0..count {
            let frames = reader.read_u32()? as usize;
            if frames == 0 {
                return Err(TemplateError::Malformed {
                    message: format!("template {} has zero frames", index + 1),
                });
            }
            let mut data = Vec::with_capacity(SPECTRUM_BINS * frames);
            for _ in 0..SPECTRUM_BINS * frames {
                data.push(reader.read_f32()? as f64);
            }
            let entry = Array2::from_shape_vec((SPECTRUM_BINS, frames), data).map_err(|err| {
                TemplateError::Malformed {
                    message: format!("template {}: {err}", index + 1),
                }
            })?;
            entries.push(entry);
        }
        if reader.pos != bytes.len() {
            return Err(TemplateError::Malformed {
                message: format!("{} trailing bytes after last template", bytes.len() - reader.pos),
            });
        }
        Self::from_entries(entries)
    }

    /// Serialize the store into the binary resource encoding accepted by
    /// [`TemplateStore::parse`].
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self
            .entries
            .iter()
            .map(|entry| 4 + 4 * entry.len())
            .sum();
        let mut bytes = Vec::with_capacity(MAGIC.len() + 4 + payload);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            bytes.extend_from_slice(&(entry.ncols() as u32).to_le_bytes());
            for row in entry.rows() {
                for &value in row.iter() {
                    bytes.extend_from_slice(&(value as f32).to_le_bytes());
                }
            }
        }
        bytes
    }

    /// Template for candidate word `word` (0..=5) in the group of six
    /// sharing `file_number`'s talker and batch.
    ///
    /// # Panics
    ///
    /// Panics if `file_number` is outside `1..=1200` or `word` is 6 or
    /// more; the scorer validates both before calling.
    pub fn template(&self, file_number: u32, word: usize) -> &Array2<f64> {
        assert!(
            (1..=FILE_COUNT).contains(&file_number) && word < WORDS_PER_GROUP,
            "file number {file_number} word {word} out of range"
        );
        let group_start = ((file_number - 1) / WORDS_PER_GROUP as u32) as usize * WORDS_PER_GROUP;
        &self.entries[group_start + word]
    }
}

static STORE: OnceLock<TemplateStore> = OnceLock::new();
static LOAD_LOCK: Mutex<()> = Mutex::new(());

/// Resolved location of the bundled template resource.
pub fn default_resource_path() -> PathBuf {
    std::env::var_os(TEMPLATE_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/abcmrt_templates.bin")
        })
}

/// Load the bundled templates if they are not loaded yet. Idempotent.
///
/// First access populates the process-wide store under a lock so concurrent
/// callers never observe a half-built cache; a missing or malformed
/// resource is a fatal error and is not retried here (the next call will
/// attempt the load again since nothing was stored).
pub fn load_templates() -> Result<&'static TemplateStore, TemplateError> {
    if let Some(store) = STORE.get() {
        return Ok(store);
    }
    let _guard = LOAD_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    if let Some(store) = STORE.get() {
        return Ok(store);
    }
    let store = TemplateStore::load(&default_resource_path())?;
    Ok(STORE.get_or_init(|| store))
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], TemplateError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(TemplateError::Malformed {
                message: format!("truncated resource at byte {}", self.pos),
            });
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, TemplateError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> Result<f32, TemplateError> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
