//! CLI argument types and layered configuration for the `sketchiq` binary.
//! Loads from CLI args, environment (prefix `SKETCHIQ_`), and optional config
//! files.

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use ortho_config::OrthoError;
use serde::Deserialize;
use std::path::PathBuf;

use crate::config::SketchConfig;

/// Command-line arguments for the `sketchiq` binary.
///
/// Values are loaded from command line arguments, environment variables
/// (prefixed with `SKETCHIQ_`), and an optional configuration file, in that
/// order of precedence.
///
/// # Examples
///
/// Parse flags directly:
/// ```
/// use sketch_iq::cli::SketchArgs;
/// use ortho_config::OrthoConfig;
///
/// let args = SketchArgs::load_from_iter(["sketchiq", "--fine-tune=true"])
///     .expect("load args from CLI iterator");
/// assert!(args.fine_tune);
/// ```
///
/// Load from a configuration file:
/// ```
/// use sketch_iq::cli::SketchArgs;
/// use ortho_config::OrthoConfig;
/// use std::io::Write;
/// use tempfile::NamedTempFile;
///
/// let mut file = NamedTempFile::new().expect("create temp file");
/// writeln!(file, "label = \"cat\"").expect("write config");
/// let path = file.path().to_str().expect("path str");
/// let args = SketchArgs::load_from_iter(["sketchiq", "--config-path", path])
///     .expect("load args from config path");
/// assert_eq!(args.label.as_deref(), Some("cat"));
/// ```
#[derive(Debug, Deserialize, ortho_config::OrthoConfig)]
#[ortho_config(prefix = "SKETCHIQ")]
pub struct SketchArgs {
    /// Snapshot file to load (and overwrite on fine-tune).
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// SHA-256 the snapshot must match at start-up.
    #[serde(default)]
    pub model_sha256: Option<String>,

    /// Directory receiving archived feedback examples.
    #[serde(default)]
    pub feedback_dir: Option<PathBuf>,

    /// Image to classify.
    #[serde(default)]
    pub image: Option<PathBuf>,

    /// Corrected label for `image`; archives the example as feedback.
    #[serde(default)]
    pub label: Option<String>,

    /// Also apply an immediate online fine-tune with `label`.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub fine_tune: bool,

    /// Write a freshly initialised snapshot when none exists.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub init_model: bool,

    /// Optional path to a configuration file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl SketchArgs {
    /// Load configuration solely from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if any variable cannot be parsed.
    pub fn load_from_env() -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Env::prefixed("SKETCHIQ_"))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if the file cannot be read or parsed.
    pub fn load_from_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from environment variables and a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if either source contains invalid values.
    pub fn load_from_env_and_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SKETCHIQ_"))
            .extract()
            .map_err(Into::into)
    }

    /// Service configuration implied by these arguments.
    #[must_use]
    pub fn service_config(&self) -> SketchConfig {
        let defaults = SketchConfig::default();
        SketchConfig {
            model_path: self.model_path.clone().unwrap_or(defaults.model_path),
            model_sha256: self.model_sha256.clone(),
            feedback_dir: self.feedback_dir.clone().unwrap_or(defaults.feedback_dir),
            initialise_missing_model: self.init_model,
            ..SketchConfig::default()
        }
    }
}
