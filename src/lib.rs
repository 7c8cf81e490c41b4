//! Sketch recognition core.
//!
//! Decodes and normalises hand-drawn canvases, ranks them against a closed
//! vocabulary with a small convolutional network, and applies single-example
//! corrections to the live model behind one exclusive guard.

pub mod adapter;
pub mod archive;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod guard;
pub mod labels;
pub mod model;
pub mod normalise;
pub mod predictor;
pub mod service;
pub mod snapshot;
#[cfg(feature = "cli")]
pub mod telemetry;

pub use adapter::{Adapter, FineTuneConfig, FineTuneError, FineTuneReport};
pub use archive::{ArchiveError, ArchivedExample, FeedbackArchive};
#[cfg(feature = "cli")]
pub use cli::SketchArgs;
pub use config::SketchConfig;
pub use guard::{GuardError, InferenceGuard, ModelState};
pub use labels::{CLASS_COUNT, ClassLabel, LabelError};
pub use model::{Classifier, ClassifierError, Mode};
pub use normalise::{DecodeError, NormalisedTensor, RawImage, decode_image, normalise};
pub use predictor::{LabelConfidence, PredictError, Prediction, Predictor, TOP_K};
pub use service::{ServiceError, SketchService};
pub use snapshot::{SnapshotError, SnapshotStore};

pub mod tests;
