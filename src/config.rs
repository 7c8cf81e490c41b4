//! Service configuration types and serialisation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::adapter::FineTuneConfig;

/// Default snapshot location.
pub const DEFAULT_MODEL_PATH: &str = "model/sketch_iq.safetensors";

/// Default feedback archive directory.
pub const DEFAULT_FEEDBACK_DIR: &str = "feedback";

/// Configuration for a [`SketchService`](crate::SketchService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SketchConfig {
    /// Snapshot loaded at start-up and overwritten by each fine-tune.
    pub model_path: PathBuf,
    /// Optional SHA-256 the snapshot must match at start-up.
    pub model_sha256: Option<String>,
    /// Base directory of the feedback archive.
    pub feedback_dir: PathBuf,
    /// Write fresh parameters when no snapshot exists instead of failing.
    pub initialise_missing_model: bool,
    pub fine_tune: FineTuneConfig,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            model_sha256: None,
            feedback_dir: PathBuf::from(DEFAULT_FEEDBACK_DIR),
            initialise_missing_model: false,
            fine_tune: FineTuneConfig::default(),
        }
    }
}

impl SketchConfig {
    /// Ensure the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is empty, the digest is not 64 hex digits,
    /// or the fine-tune settings are invalid.
    #[must_use = "Validation should not be ignored"]
    pub fn validate(self) -> Result<Self, String> {
        if self.model_path.as_os_str().is_empty() {
            return Err("model_path must not be empty".into());
        }
        if self.feedback_dir.as_os_str().is_empty() {
            return Err("feedback_dir must not be empty".into());
        }
        if let Some(digest) = &self.model_sha256 {
            let digest = digest.trim();
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("model_sha256 must be 64 hexadecimal digits".into());
            }
        }
        let fine_tune = self.fine_tune.validate()?;
        Ok(Self { fine_tune, ..self })
    }
}
