//! Convolutional sketch classifier.
//!
//! Two conv/pool blocks followed by a dropout-regularised dense head:
//!
//! ```text
//! (1,1,28,28) -> conv3x3(32) -> relu -> pool2 -> conv3x3(64) -> relu -> pool2
//!             -> flatten(3136) -> linear(128) -> relu -> dropout -> linear(25)
//! ```
//!
//! Whether dropout is active is decided by the [`Mode`] passed to
//! [`Classifier::forward`], never by state stored on the network.

use std::{collections::HashMap, fmt};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Dropout, Linear, VarBuilder, VarMap};
use thiserror::Error;

use crate::{labels::CLASS_COUNT, normalise::CANVAS_SIDE};

const CONV1_CHANNELS: usize = 32;
const CONV2_CHANNELS: usize = 64;
const HIDDEN_UNITS: usize = 128;
const DROPOUT_RATE: f32 = 0.3;
const POOLED_SIDE: usize = CANVAS_SIDE / 4;

/// Name of the output layer weight inside a parameter snapshot.
pub const OUTPUT_WEIGHT: &str = "fc2.weight";

/// Errors raised while scoring or training the network.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("classifier expected {expected:?} but received {actual:?}")]
    ShapeContractViolation {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("parameter set is missing \"{name}\"")]
    MissingParameter { name: String },
    #[error("parameter store lock poisoned")]
    ParametersPoisoned,
}

/// Evaluation or training behaviour of the stochastic layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Deterministic scoring; dropout disabled.
    #[default]
    Eval,
    /// Dropout enabled for gradient steps.
    Train,
}

impl Mode {
    const fn is_train(self) -> bool {
        matches!(self, Self::Train)
    }
}

/// Learned parameters plus the layers that read them.
///
/// Layers hold handles into the [`VarMap`], so loading new values into the map
/// or stepping an optimiser over [`Classifier::parameters`] updates the network
/// in place.
pub struct Classifier {
    varmap: VarMap,
    device: Device,
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    dropout: Dropout,
    fc2: Linear,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("device", &self.device)
            .field("parameters", &self.varmap.all_vars().len())
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Builds a network with freshly initialised parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::Tensor`] if parameter allocation fails.
    pub fn new(device: &Device) -> Result<Self, ClassifierError> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(1, CONV1_CHANNELS, 3, conv_cfg, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(
            CONV1_CHANNELS,
            CONV2_CHANNELS,
            3,
            conv_cfg,
            vb.pp("conv2"),
        )?;
        let fc1 = candle_nn::linear(
            CONV2_CHANNELS * POOLED_SIDE * POOLED_SIDE,
            HIDDEN_UNITS,
            vb.pp("fc1"),
        )?;
        let fc2 = candle_nn::linear(HIDDEN_UNITS, CLASS_COUNT, vb.pp("fc2"))?;
        Ok(Self {
            varmap,
            device: device.clone(),
            conv1,
            conv2,
            fc1,
            dropout: Dropout::new(DROPOUT_RATE),
            fc2,
        })
    }

    /// Device holding the parameters.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Parameter store backing the layers.
    #[must_use]
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Overwrites every parameter with the tensor of the same name.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::MissingParameter`] when `tensors` lacks a
    /// parameter and [`ClassifierError::Tensor`] on a shape or dtype mismatch.
    /// Parameters already overwritten stay overwritten on error.
    pub fn load_parameters(
        &self,
        tensors: &HashMap<String, Tensor>,
    ) -> Result<(), ClassifierError> {
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| ClassifierError::ParametersPoisoned)?;
        for (name, var) in vars.iter() {
            let tensor = tensors
                .get(name)
                .ok_or_else(|| ClassifierError::MissingParameter { name: name.clone() })?;
            var.set(&tensor.to_device(&self.device)?)?;
        }
        Ok(())
    }

    /// Trainable parameters, for optimiser construction.
    #[must_use]
    pub fn parameters(&self) -> Vec<candle_core::Var> {
        self.varmap.all_vars()
    }

    /// Scores a `(1, 1, 28, 28)` input and returns `(1, CLASS_COUNT)` logits.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifierError::ShapeContractViolation`] when the input or
    /// output shape deviates from the contract and
    /// [`ClassifierError::Tensor`] on backend failures.
    pub fn forward(&self, input: &Tensor, mode: Mode) -> Result<Tensor, ClassifierError> {
        let expected_in = [1, 1, CANVAS_SIDE, CANVAS_SIDE];
        if input.dims() != expected_in {
            return Err(ClassifierError::ShapeContractViolation {
                expected: expected_in.to_vec(),
                actual: input.dims().to_vec(),
            });
        }
        let xs = self.conv1.forward(input)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;
        let xs = xs.flatten_from(1)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.dropout.forward(&xs, mode.is_train())?;
        let logits = self.fc2.forward(&xs)?;

        let expected_out = [1, CLASS_COUNT];
        if logits.dims() != expected_out {
            return Err(ClassifierError::ShapeContractViolation {
                expected: expected_out.to_vec(),
                actual: logits.dims().to_vec(),
            });
        }
        Ok(logits)
    }

    /// Raw per-class scores for one input, in vocabulary order.
    ///
    /// # Errors
    ///
    /// Propagates [`Classifier::forward`] failures.
    pub fn scores(&self, input: &Tensor, mode: Mode) -> Result<Vec<f32>, ClassifierError> {
        Ok(self.forward(input, mode)?.squeeze(0)?.to_vec1::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn classifier() -> Classifier {
        Classifier::new(&Device::Cpu).unwrap_or_else(|e| panic!("build classifier: {e}"))
    }

    fn canvas(value: f32) -> Tensor {
        Tensor::full(value, (1, 1, CANVAS_SIDE, CANVAS_SIDE), &Device::Cpu)
            .unwrap_or_else(|e| panic!("canvas tensor: {e}"))
    }

    #[rstest]
    fn emits_one_score_per_class(classifier: Classifier) {
        let scores = classifier
            .scores(&canvas(0.5), Mode::Eval)
            .unwrap_or_else(|e| panic!("forward: {e}"));
        assert_eq!(scores.len(), CLASS_COUNT);
    }

    #[rstest]
    fn evaluation_is_deterministic(classifier: Classifier) {
        let input = canvas(1.0);
        let first = classifier.scores(&input, Mode::Eval);
        let second = classifier.scores(&input, Mode::Eval);
        match (first, second) {
            (Ok(a), Ok(b)) => assert_eq!(a, b),
            _ => panic!("forward failed"),
        }
    }

    #[rstest]
    fn rejects_wrong_input_shape(classifier: Classifier) {
        let input = Tensor::zeros((1, 1, 14, 14), DType::F32, &Device::Cpu)
            .unwrap_or_else(|e| panic!("tensor: {e}"));
        let err = classifier.forward(&input, Mode::Eval);
        assert!(matches!(
            err,
            Err(ClassifierError::ShapeContractViolation { .. })
        ));
    }

    #[rstest]
    fn names_output_layer(classifier: Classifier) {
        let data = classifier
            .varmap()
            .data()
            .lock()
            .unwrap_or_else(|e| panic!("varmap lock: {e}"));
        let weight = data
            .get(OUTPUT_WEIGHT)
            .unwrap_or_else(|| panic!("missing {OUTPUT_WEIGHT}"));
        assert_eq!(weight.dims(), &[CLASS_COUNT, HIDDEN_UNITS]);
    }

    fn parameters_of(classifier: &Classifier) -> HashMap<String, Tensor> {
        classifier
            .varmap()
            .data()
            .lock()
            .unwrap_or_else(|e| panic!("varmap lock: {e}"))
            .iter()
            .map(|(name, var)| {
                let tensor = var
                    .as_tensor()
                    .copy()
                    .unwrap_or_else(|e| panic!("copy {name}: {e}"));
                (name.clone(), tensor)
            })
            .collect()
    }

    #[rstest]
    fn load_parameters_reproduces_source(classifier: Classifier) {
        let target = Classifier::new(&Device::Cpu).unwrap_or_else(|e| panic!("build: {e}"));
        target
            .load_parameters(&parameters_of(&classifier))
            .unwrap_or_else(|e| panic!("load: {e}"));
        let input = canvas(1.0);
        assert_eq!(
            target.scores(&input, Mode::Eval).ok(),
            classifier.scores(&input, Mode::Eval).ok()
        );
    }

    #[rstest]
    fn load_parameters_names_missing_tensor(classifier: Classifier) {
        let mut tensors = parameters_of(&classifier);
        tensors.remove(OUTPUT_WEIGHT);
        let err = classifier.load_parameters(&tensors);
        assert!(matches!(
            err,
            Err(ClassifierError::MissingParameter { name }) if name == OUTPUT_WEIGHT
        ));
    }
}
