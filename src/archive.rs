//! Durable storage of corrected examples for offline retraining.
//!
//! Each accepted example becomes two files sharing a random identifier:
//! `<id>.png` holding the uploaded bytes verbatim and `<id>.label.txt` holding
//! the label. Files are created with create-new semantics, so concurrent
//! writers can never replace each other's artefacts. The archive never touches
//! the shared model.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::labels::{ClassLabel, LabelError};

const IMAGE_SUFFIX: &str = ".png";
const LABEL_SUFFIX: &str = ".label.txt";

/// Errors returned by [`FeedbackArchive`].
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("invalid label: {0}")]
    InvalidLabel(#[from] LabelError),
    #[error("failed to write feedback artefact at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A stored (image, label) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedExample {
    pub id: String,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
    pub label: ClassLabel,
}

/// Feedback store rooted at a base directory.
#[derive(Debug, Clone)]
pub struct FeedbackArchive {
    base_dir: PathBuf,
}

impl FeedbackArchive {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Validates `label` and writes the example.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidLabel`] before anything is written when
    /// the label is outside the vocabulary, and [`ArchiveError::Io`] when the
    /// directory or either file cannot be created.
    pub fn store(&self, image_bytes: &[u8], label: &str) -> Result<ArchivedExample, ArchiveError> {
        let label: ClassLabel = label.parse().inspect_err(|err| {
            warn!(error = %err, "rejected feedback label");
        })?;
        self.store_label(image_bytes, label)
    }

    /// As [`FeedbackArchive::store`] for an already validated label.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] on filesystem failures. A failed
    /// submission leaves neither file behind.
    pub fn store_label(
        &self,
        image_bytes: &[u8],
        label: ClassLabel,
    ) -> Result<ArchivedExample, ArchiveError> {
        fs::create_dir_all(&self.base_dir).map_err(|source| ArchiveError::Io {
            path: self.base_dir.clone(),
            source,
        })?;
        self.store_with_id(Uuid::new_v4().simple().to_string(), image_bytes, label)
    }

    /// Writes both files for `id`; on failure neither file is left behind.
    fn store_with_id(
        &self,
        id: String,
        image_bytes: &[u8],
        label: ClassLabel,
    ) -> Result<ArchivedExample, ArchiveError> {
        let image_path = self.base_dir.join(format!("{id}{IMAGE_SUFFIX}"));
        let label_path = self.base_dir.join(format!("{id}{LABEL_SUFFIX}"));

        write_new(&image_path, image_bytes)?;
        if let Err(err) = write_new(&label_path, label.as_str().as_bytes()) {
            discard(&image_path);
            return Err(err);
        }
        info!(%id, %label, "archived feedback example");
        Ok(ArchivedExample {
            id,
            image_path,
            label_path,
            label,
        })
    }

    /// Lists complete examples, sorted by identifier.
    ///
    /// Images without a readable, valid label file are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Io`] if the base directory cannot be read. A
    /// missing directory yields an empty list.
    pub fn entries(&self) -> Result<Vec<ArchivedExample>, ArchiveError> {
        let read_dir = match fs::read_dir(&self.base_dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Io {
                    path: self.base_dir.clone(),
                    source,
                });
            }
        };
        let mut entries: Vec<ArchivedExample> = read_dir
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let id = name.strip_suffix(IMAGE_SUFFIX)?.to_owned();
                self.load_entry(id)
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    fn load_entry(&self, id: String) -> Option<ArchivedExample> {
        let label_path = self.base_dir.join(format!("{id}{LABEL_SUFFIX}"));
        let label = fs::read_to_string(&label_path).ok()?.parse().ok()?;
        Some(ArchivedExample {
            image_path: self.base_dir.join(format!("{id}{IMAGE_SUFFIX}")),
            label_path,
            label,
            id,
        })
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
    let io_error = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_error)?;
    if let Err(source) = file.write_all(bytes) {
        drop(file);
        discard(path);
        return Err(io_error(source));
    }
    Ok(())
}

/// Removes a file this archive created for a submission that failed.
fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!(
            path = %path.display(),
            error = %err,
            "failed to remove partial feedback artefact"
        );
    }
}
