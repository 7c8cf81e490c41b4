//! Online fine-tuning on a single corrected example.
//!
//! A correction is a short nudge: a handful of Adam steps at a small learning
//! rate with a fresh optimiser every call, followed by an in-place snapshot
//! overwrite. The whole procedure runs inside the [`InferenceGuard`], so no
//! prediction can interleave with the mode switch or a half-applied step.

use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    guard::{GuardError, InferenceGuard, ModelState},
    labels::{ClassLabel, LabelError},
    model::{ClassifierError, Mode},
    normalise::NormalisedTensor,
    snapshot::{SnapshotError, SnapshotStore},
};

/// Default number of gradient steps per correction.
pub const DEFAULT_STEPS: usize = 25;

/// Default Adam learning rate per correction.
pub const DEFAULT_LEARNING_RATE: f64 = 1e-4;

/// Errors returned by [`Adapter::fine_tune`].
#[derive(Debug, Error)]
pub enum FineTuneError {
    #[error("invalid label: {0}")]
    InvalidLabel(#[from] LabelError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Guard(#[from] GuardError),
}

impl From<candle_core::Error> for FineTuneError {
    fn from(err: candle_core::Error) -> Self {
        Self::Classifier(ClassifierError::Tensor(err))
    }
}

/// Step count and learning rate of one correction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FineTuneConfig {
    /// Gradient steps; zero is treated as one.
    pub steps: usize,
    pub learning_rate: f64,
}

impl Default for FineTuneConfig {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS,
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }
}

impl FineTuneConfig {
    /// Ensure the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if `steps` is zero or `learning_rate` is not a
    /// positive finite number.
    #[must_use = "Validation should not be ignored"]
    pub fn validate(self) -> Result<Self, String> {
        if self.steps == 0 {
            Err("steps must be greater than 0".into())
        } else if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            Err("learning_rate must be a positive finite number".into())
        } else {
            Ok(self)
        }
    }
}

/// Outcome of a completed correction.
#[derive(Debug, Clone, PartialEq)]
pub struct FineTuneReport {
    pub label: ClassLabel,
    pub steps: usize,
    /// Cross-entropy of the final step.
    pub final_loss: f32,
    /// SHA-256 of the snapshot written afterwards.
    pub snapshot_sha256: String,
}

/// Applies single-example corrections to the shared model.
#[derive(Debug, Clone)]
pub struct Adapter {
    guard: Arc<InferenceGuard>,
    snapshots: SnapshotStore,
    config: FineTuneConfig,
}

impl Adapter {
    #[must_use]
    pub fn new(
        guard: Arc<InferenceGuard>,
        snapshots: SnapshotStore,
        config: FineTuneConfig,
    ) -> Self {
        Self {
            guard,
            snapshots,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> FineTuneConfig {
        self.config
    }

    /// Fine-tunes on `tensor` towards `label` and persists the result.
    ///
    /// The label is validated before the lock is taken; an unknown label
    /// leaves the model and the snapshot untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FineTuneError::InvalidLabel`] for labels outside the
    /// vocabulary, [`FineTuneError::Snapshot`] when persisting fails, and
    /// classifier or guard errors otherwise.
    pub fn fine_tune(
        &self,
        tensor: &NormalisedTensor,
        label: &str,
    ) -> Result<FineTuneReport, FineTuneError> {
        let label: ClassLabel = label.parse().inspect_err(|err| {
            warn!(error = %err, "rejected fine-tune label");
        })?;
        self.fine_tune_label(tensor, label)
    }

    /// As [`Adapter::fine_tune`] for an already validated label.
    ///
    /// # Errors
    ///
    /// See [`Adapter::fine_tune`].
    pub fn fine_tune_label(
        &self,
        tensor: &NormalisedTensor,
        label: ClassLabel,
    ) -> Result<FineTuneReport, FineTuneError> {
        let steps = self.config.steps.max(1);
        let learning_rate = self.config.learning_rate;
        info!(%label, steps, learning_rate, "starting online fine-tune");
        self.guard.with_exclusive_access(|state| {
            let previous = state.set_mode(Mode::Train);
            let trained = train_steps(state, tensor, label, steps, learning_rate);
            state.set_mode(Mode::Eval);
            let outcome = trained.and_then(|final_loss| {
                let snapshot_sha256 = self.snapshots.save(state.classifier())?;
                Ok(FineTuneReport {
                    label,
                    steps,
                    final_loss,
                    snapshot_sha256,
                })
            });
            state.set_mode(previous);
            let report = outcome?;
            info!(
                label = %report.label,
                steps = report.steps,
                final_loss = report.final_loss,
                sha256 = %report.snapshot_sha256,
                "applied online fine-tune"
            );
            Ok(report)
        })
    }
}

fn train_steps(
    state: &ModelState,
    tensor: &NormalisedTensor,
    label: ClassLabel,
    steps: usize,
    learning_rate: f64,
) -> Result<f32, FineTuneError> {
    let classifier = state.classifier();
    let device = classifier.device();
    let input = tensor.to_tensor(device)?;
    #[expect(
        clippy::cast_possible_truncation,
        reason = "class index is below the vocabulary size"
    )]
    let target = Tensor::new(&[label.index() as u32], device)?;
    let mut optimiser = AdamW::new(
        classifier.parameters(),
        ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..ParamsAdamW::default()
        },
    )?;

    let mut final_loss = 0.0;
    for _ in 0..steps {
        let logits = classifier.forward(&input, state.mode())?;
        let loss = candle_nn::loss::cross_entropy(&logits, &target)?;
        optimiser.backward_step(&loss)?;
        final_loss = loss.to_scalar::<f32>()?;
    }
    Ok(final_loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_match_reference_nudge() {
        let config = FineTuneConfig::default();
        assert_eq!(config.steps, 25);
        assert!((config.learning_rate - 1e-4).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(FineTuneConfig { steps: 0, learning_rate: 1e-4 })]
    #[case(FineTuneConfig { steps: 5, learning_rate: 0.0 })]
    #[case(FineTuneConfig { steps: 5, learning_rate: f64::NAN })]
    fn validate_rejects_bad_values(#[case] config: FineTuneConfig) {
        assert!(config.validate().is_err());
    }

    #[rstest]
    fn deserialise_partial_config() {
        let config: FineTuneConfig =
            serde_json::from_str(r#"{"steps":10}"#).unwrap_or_else(|e| panic!("json: {e}"));
        assert_eq!(config.steps, 10);
        assert!((config.learning_rate - DEFAULT_LEARNING_RATE).abs() < f64::EPSILON);
    }
}
