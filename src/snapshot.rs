//! Persisted classifier parameters.
//!
//! Snapshots are `safetensors` files. Saves go to a temporary file in the
//! target directory which is then renamed over the canonical path, so a crash
//! mid-save leaves the previous snapshot intact.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use candle_core::{Device, Tensor};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    labels::CLASS_COUNT,
    model::{Classifier, ClassifierError, OUTPUT_WEIGHT},
};

/// Errors produced while loading or saving a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access snapshot at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot at {path} expected SHA-256 {expected} but found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("snapshot at {path} does not contain \"{name}\"")]
    MissingTensor { path: PathBuf, name: String },
    #[error("snapshot scores {actual} classes but the vocabulary has {expected}")]
    OutputWidthMismatch { expected: usize, actual: usize },
    #[error("failed to read or write snapshot tensors: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Canonical on-disk location of the classifier parameters.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store backed by the snapshot file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a snapshot has been written yet.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads the snapshot into a new classifier.
    ///
    /// The file is read once; the digest, the output-width check and the
    /// parameters all come from that one buffer. When `expected_sha256` is
    /// given the digest must match before any tensor is decoded. The output
    /// layer width is checked against the vocabulary so a snapshot trained on
    /// a different label list is refused.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::ChecksumMismatch`] on a digest mismatch,
    /// [`SnapshotError::OutputWidthMismatch`] when the snapshot scores a
    /// different number of classes, and I/O or tensor errors otherwise.
    pub fn load(
        &self,
        device: &Device,
        expected_sha256: Option<&str>,
    ) -> Result<Classifier, SnapshotError> {
        let bytes = fs::read(&self.path).map_err(|source| self.io_error(source))?;
        let digest = sha256_hex(&bytes);
        if let Some(expected) = expected_sha256 {
            let expected = normalise_hex(expected);
            if digest != expected {
                return Err(SnapshotError::ChecksumMismatch {
                    path: self.path.clone(),
                    expected,
                    actual: digest,
                });
            }
        }
        let tensors = candle_core::safetensors::load_buffer(&bytes, device)?;
        self.check_output_width(&tensors)?;

        let classifier = Classifier::new(device)?;
        classifier.load_parameters(&tensors)?;
        info!(path = %self.path.display(), sha256 = %digest, "loaded classifier snapshot");
        Ok(classifier)
    }

    /// Loads the snapshot, or writes freshly initialised parameters when no
    /// snapshot exists yet.
    ///
    /// # Errors
    ///
    /// Propagates [`SnapshotStore::load`] and [`SnapshotStore::save`] errors.
    pub fn load_or_initialise(
        &self,
        device: &Device,
        expected_sha256: Option<&str>,
    ) -> Result<Classifier, SnapshotError> {
        if self.exists() {
            return self.load(device, expected_sha256);
        }
        let classifier = Classifier::new(device)?;
        self.save(&classifier)?;
        info!(path = %self.path.display(), "initialised fresh classifier snapshot");
        Ok(classifier)
    }

    /// Writes the classifier parameters, replacing any previous snapshot.
    ///
    /// The staging file is flushed to disk before the rename and the
    /// directory entry afterwards, so a power loss leaves either the old or
    /// the new snapshot in place. Returns the SHA-256 digest of the new
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns I/O errors when the temporary file cannot be created, synced
    /// or renamed, and tensor errors when serialisation fails. The previous
    /// snapshot is untouched on every error path before the rename.
    pub fn save(&self, classifier: &Classifier) -> Result<String, SnapshotError> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;

        let staging = tempfile::Builder::new()
            .prefix(".snapshot-")
            .suffix(".safetensors")
            .tempfile_in(dir)
            .map_err(|source| self.io_error(source))?;
        classifier.varmap().save(staging.path())?;
        staging
            .as_file()
            .sync_all()
            .map_err(|source| self.io_error(source))?;
        let digest = compute_sha256(staging.path())?;
        staging
            .persist(&self.path)
            .map_err(|err| self.io_error(err.error))?;
        sync_dir(dir).map_err(|source| SnapshotError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        debug!(path = %self.path.display(), sha256 = %digest, "saved classifier snapshot");
        Ok(digest)
    }

    fn check_output_width(&self, tensors: &HashMap<String, Tensor>) -> Result<(), SnapshotError> {
        let weight = tensors
            .get(OUTPUT_WEIGHT)
            .ok_or_else(|| SnapshotError::MissingTensor {
                path: self.path.clone(),
                name: OUTPUT_WEIGHT.to_owned(),
            })?;
        let actual = weight.dims().first().copied().unwrap_or_default();
        if actual == CLASS_COUNT {
            Ok(())
        } else {
            Err(SnapshotError::OutputWidthMismatch {
                expected: CLASS_COUNT,
                actual,
            })
        }
    }

    fn io_error(&self, source: std::io::Error) -> SnapshotError {
        SnapshotError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Computes the SHA-256 digest of the file at `path`.
///
/// # Errors
///
/// Returns I/O errors from opening or reading the file.
pub fn compute_sha256(path: &Path) -> Result<String, SnapshotError> {
    let io_error = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = reader.read(&mut buffer).map_err(io_error)?;
        if read == 0 {
            break;
        }
        let chunk = buffer.get(..read).ok_or_else(|| {
            io_error(std::io::Error::other(
                "read reported bytes beyond buffer length",
            ))
        })?;
        hasher.update(chunk);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Flushes the directory entry of a completed rename.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directory handles cannot be synced portably outside unix.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn normalise_hex(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}
