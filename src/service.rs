//! Entry points for the request boundary.
//!
//! [`SketchService`] owns the guarded model and hands the boundary three
//! operations: prediction, feedback archiving, and explicit fine-tuning.
//! Feedback submission only archives; it never triggers a fine-tune.

use std::sync::Arc;

use candle_core::Device;
use thiserror::Error;

use crate::{
    adapter::{Adapter, FineTuneError, FineTuneReport},
    archive::{ArchiveError, ArchivedExample, FeedbackArchive},
    config::SketchConfig,
    guard::{GuardError, InferenceGuard, ModelState},
    labels::{ClassLabel, LabelError},
    normalise::{DecodeError, decode_image, normalise},
    predictor::{PredictError, Prediction, Predictor},
    snapshot::{SnapshotError, SnapshotStore},
};

/// Any failure surfaced to the boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    InvalidLabel(#[from] LabelError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error(transparent)]
    FineTune(#[from] FineTuneError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl ServiceError {
    /// `true` when the caller sent bad input (4xx), `false` for server faults
    /// (5xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Decode(_)
            | Self::InvalidLabel(_)
            | Self::Predict(PredictError::Decode(_))
            | Self::FineTune(FineTuneError::InvalidLabel(_))
            | Self::Archive(ArchiveError::InvalidLabel(_)) => true,
            Self::Config(_)
            | Self::Predict(_)
            | Self::FineTune(_)
            | Self::Archive(_)
            | Self::Snapshot(_) => false,
        }
    }
}

impl From<GuardError> for ServiceError {
    fn from(err: GuardError) -> Self {
        Self::Predict(PredictError::Guard(err))
    }
}

/// Shared sketch recognition core.
#[derive(Debug, Clone)]
pub struct SketchService {
    guard: Arc<InferenceGuard>,
    predictor: Predictor,
    adapter: Adapter,
    archive: FeedbackArchive,
}

impl SketchService {
    /// Validates `config`, loads the snapshot once, and wires the components
    /// around a single guard.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] for invalid settings and
    /// [`ServiceError::Snapshot`] when the snapshot cannot be loaded.
    pub fn open(config: SketchConfig) -> Result<Self, ServiceError> {
        let config = config.validate().map_err(ServiceError::Config)?;
        let device = Device::Cpu;
        let snapshots = SnapshotStore::new(&config.model_path);
        let expected = config.model_sha256.as_deref();
        let classifier = if config.initialise_missing_model {
            snapshots.load_or_initialise(&device, expected)?
        } else {
            snapshots.load(&device, expected)?
        };
        let guard = Arc::new(InferenceGuard::new(ModelState::new(classifier)));
        Ok(Self {
            predictor: Predictor::new(Arc::clone(&guard)),
            adapter: Adapter::new(Arc::clone(&guard), snapshots, config.fine_tune),
            archive: FeedbackArchive::new(config.feedback_dir),
            guard,
        })
    }

    /// Ranks the top labels for an uploaded image.
    ///
    /// # Errors
    ///
    /// See [`Predictor::predict`].
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, ServiceError> {
        Ok(self.predictor.predict(image_bytes)?)
    }

    /// Archives a corrected example for the offline retraining job.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidLabel`] for labels outside the
    /// vocabulary (nothing is written) and [`ServiceError::Archive`] on
    /// storage failures.
    pub fn submit_feedback(
        &self,
        image_bytes: &[u8],
        label: &str,
    ) -> Result<ArchivedExample, ServiceError> {
        let label: ClassLabel = label.parse()?;
        Ok(self.archive.store_label(image_bytes, label)?)
    }

    /// Applies an immediate correction to the live model.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidLabel`] or [`ServiceError::Decode`] for
    /// bad input, before the model is touched, and
    /// [`ServiceError::FineTune`] when training or persistence fails.
    pub fn fine_tune(
        &self,
        image_bytes: &[u8],
        label: &str,
    ) -> Result<FineTuneReport, ServiceError> {
        let label: ClassLabel = label.parse()?;
        let tensor = normalise(&decode_image(image_bytes)?);
        Ok(self.adapter.fine_tune_label(&tensor, label)?)
    }

    #[must_use]
    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    #[must_use]
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    #[must_use]
    pub fn archive(&self) -> &FeedbackArchive {
        &self.archive
    }

    /// Guard shared by the predictor and adapter.
    #[must_use]
    pub fn guard(&self) -> &Arc<InferenceGuard> {
        &self.guard
    }
}
