//! Ranked label predictions for a sketch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    guard::{GuardError, InferenceGuard},
    labels::ClassLabel,
    model::{ClassifierError, Mode},
    normalise::{DecodeError, NormalisedTensor, RawImage, decode_image, normalise},
};

/// Number of ranked entries in a [`Prediction`].
pub const TOP_K: usize = 3;

/// Errors returned by [`Predictor`].
#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Guard(#[from] GuardError),
}

impl From<candle_core::Error> for PredictError {
    fn from(err: candle_core::Error) -> Self {
        Self::Classifier(ClassifierError::Tensor(err))
    }
}

/// One ranked label with its confidence percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfidence {
    pub label: ClassLabel,
    /// Softmax probability as a percentage in `[0, 100]`, two decimals.
    pub confidence: f32,
}

/// Top-ranked labels, highest confidence first.
///
/// Serialises as `{"predictions": [{"label": ..., "confidence": ...}, ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predictions: Vec<LabelConfidence>,
}

impl Prediction {
    /// Highest ranked entry.
    #[must_use]
    pub fn top(&self) -> Option<&LabelConfidence> {
        self.predictions.first()
    }

    /// Zero-based rank of `label`, if it made the cut.
    #[must_use]
    pub fn rank_of(&self, label: ClassLabel) -> Option<usize> {
        self.predictions.iter().position(|entry| entry.label == label)
    }
}

/// Runs normalisation and guarded scoring.
#[derive(Debug, Clone)]
pub struct Predictor {
    guard: Arc<InferenceGuard>,
}

impl Predictor {
    #[must_use]
    pub fn new(guard: Arc<InferenceGuard>) -> Self {
        Self { guard }
    }

    /// Decodes and classifies an uploaded image.
    ///
    /// # Errors
    ///
    /// Returns [`PredictError::Decode`] when `bytes` is not an image; the
    /// model is never touched on that path.
    pub fn predict(&self, bytes: &[u8]) -> Result<Prediction, PredictError> {
        let image = decode_image(bytes)?;
        self.predict_image(&image)
    }

    /// Classifies an already decoded image.
    ///
    /// # Errors
    ///
    /// See [`Predictor::predict_tensor`].
    pub fn predict_image(&self, image: &RawImage) -> Result<Prediction, PredictError> {
        self.predict_tensor(&normalise(image))
    }

    /// Classifies a normalised canvas.
    ///
    /// # Errors
    ///
    /// Returns [`PredictError::Guard`] if the model lock is poisoned and
    /// [`PredictError::Classifier`] on a shape contract violation or backend
    /// failure.
    pub fn predict_tensor(&self, tensor: &NormalisedTensor) -> Result<Prediction, PredictError> {
        let probabilities = self.probabilities(tensor)?;
        let prediction = rank(&probabilities);
        if let Some(top) = prediction.top() {
            debug!(label = %top.label, confidence = top.confidence, "classified sketch");
        }
        Ok(prediction)
    }

    /// Softmax probabilities for every class, in vocabulary order.
    ///
    /// # Errors
    ///
    /// As for [`Predictor::predict_tensor`].
    pub fn probabilities(&self, tensor: &NormalisedTensor) -> Result<Vec<f32>, PredictError> {
        self.guard.with_exclusive_access(|state| {
            let classifier = state.classifier();
            let input = tensor.to_tensor(classifier.device())?;
            let logits = classifier.forward(&input, Mode::Eval)?;
            let probabilities = candle_nn::ops::softmax_last_dim(&logits)?;
            Ok(probabilities.squeeze(0)?.to_vec1::<f32>()?)
        })
    }
}

/// Picks the [`TOP_K`] most probable classes. Equal probabilities keep
/// vocabulary order.
fn rank(probabilities: &[f32]) -> Prediction {
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| {
        let pa = probabilities.get(a).copied().unwrap_or_default();
        let pb = probabilities.get(b).copied().unwrap_or_default();
        pb.total_cmp(&pa)
    });
    let predictions = order
        .into_iter()
        .filter_map(|index| {
            let label = ClassLabel::from_index(index)?;
            let probability = probabilities.get(index).copied()?;
            Some(LabelConfidence {
                label,
                confidence: as_percentage(probability),
            })
        })
        .take(TOP_K)
        .collect();
    Prediction { predictions }
}

#[expect(clippy::float_arithmetic, reason = "percentage rounding")]
fn as_percentage(probability: f32) -> f32 {
    (probability * 10_000.0).round() / 100.0
}
