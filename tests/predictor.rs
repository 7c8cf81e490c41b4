//! Prediction determinism, ordering, and snapshot round-trips.

use std::sync::Arc;

use candle_core::Device;
use rstest::rstest;
use sketch_iq::{
    InferenceGuard, ModelState, PredictError, Predictor, SnapshotStore, TOP_K,
    normalise::normalise,
};
mod support;
use support::{Workspace, blank_canvas, diagonal_canvas, png_bytes, square_canvas, workspace};

#[rstest]
fn repeated_predictions_are_identical(workspace: Workspace) {
    let bytes = png_bytes(&square_canvas(64, 6));
    let first = workspace.service.predict(&bytes);
    let second = workspace.service.predict(&bytes);
    match (first, second) {
        (Ok(a), Ok(b)) => assert_eq!(a, b),
        (a, b) => panic!("prediction failed: {a:?} / {b:?}"),
    }
}

#[rstest]
fn predictions_are_ranked_and_bounded(workspace: Workspace) {
    for image in [square_canvas(64, 6), diagonal_canvas(50), blank_canvas(30, 30)] {
        let prediction = workspace
            .service
            .predict(&png_bytes(&image))
            .unwrap_or_else(|e| panic!("predict: {e}"));
        assert_eq!(prediction.predictions.len(), TOP_K);
        let confidences: Vec<f32> = prediction
            .predictions
            .iter()
            .map(|entry| entry.confidence)
            .collect();
        assert!(confidences.windows(2).all(|pair| pair[0] >= pair[1]));
        assert!(confidences.iter().all(|c| (0.0..=100.0).contains(c)));
        assert!(confidences.iter().sum::<f32>() <= 100.0 + 0.015);
    }
}

#[rstest]
fn undecodable_upload_is_a_client_error(workspace: Workspace) {
    let err = workspace
        .service
        .predict(b"not an image")
        .err()
        .unwrap_or_else(|| panic!("expected decode failure"));
    assert!(err.is_client_error());
    assert!(matches!(
        err,
        sketch_iq::ServiceError::Predict(PredictError::Decode(_))
    ));
}

#[rstest]
fn reloaded_snapshot_predicts_identically(workspace: Workspace) {
    let tensor = normalise(&diagonal_canvas(40));
    let before = workspace
        .service
        .predictor()
        .probabilities(&tensor)
        .unwrap_or_else(|e| panic!("probabilities: {e}"));

    let store = SnapshotStore::new(workspace.config().model_path);
    let classifier = store
        .load(&Device::Cpu, None)
        .unwrap_or_else(|e| panic!("reload: {e}"));
    let reloaded = Predictor::new(Arc::new(InferenceGuard::new(ModelState::new(classifier))));
    let after = reloaded
        .probabilities(&tensor)
        .unwrap_or_else(|e| panic!("probabilities: {e}"));

    assert_eq!(before, after);
}
