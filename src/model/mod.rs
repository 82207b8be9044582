//! Model hyperparameters and access to the local weight vector.
//!
//! The protocol does not train models. It only needs to read a participant's weights as a flat
//! vector, overwrite them with the decrypted average and (re)initialize them from the
//! [`Hyperparameters`] distributed by the coordinator. These three operations form the
//! [`ModelAccessor`] capability.

mod dense;

pub use self::dense::DenseNetwork;

/// The largest number of parameters a model may have.
pub const MAX_PARAMETERS: usize = 1 << 24;

use std::convert::TryFrom;

use derive_more::Display;
use thiserror::Error;
use validator::{Validate, ValidationError};

#[derive(Error, Debug, PartialEq, Eq)]
/// Errors related to the local weight vector.
pub enum ModelError {
    #[error("expected {expected} weights but got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("the model has not been initialized")]
    Uninitialized,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The activation function of the hidden layers.
pub enum Activation {
    Sigmoid,
    Relu,
    Tanh,
    Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_hyperparameters"))]
/// The hyperparameters a coordinator hands out to the participants of its session.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [model]
/// input_dims = 4
/// output_dims = 1
/// layers = 1
/// neurons = 5
/// learning_rate = 0.01
/// iterations = 5
/// activation = "sigmoid"
/// batch_size = 64
/// ```
pub struct Hyperparameters {
    /// The number of input features.
    #[validate(range(min = 1))]
    pub input_dims: u32,
    /// The number of outputs.
    #[validate(range(min = 1))]
    pub output_dims: u32,
    /// The number of hidden layers.
    pub layers: u32,
    /// The number of neurons of each hidden layer.
    #[validate(range(min = 1))]
    pub neurons: u32,
    pub learning_rate: f64,
    /// The number of local training iterations per round.
    pub iterations: u32,
    pub activation: Activation,
    #[validate(range(min = 1))]
    pub batch_size: u32,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            input_dims: 4,
            output_dims: 1,
            layers: 1,
            neurons: 5,
            learning_rate: 0.01,
            iterations: 5,
            activation: Activation::Sigmoid,
            batch_size: 64,
        }
    }
}

fn validate_hyperparameters(params: &Hyperparameters) -> Result<(), ValidationError> {
    if !(params.learning_rate.is_finite() && params.learning_rate > 0.) {
        return Err(ValidationError::new("learning rate must be positive"));
    }
    match params.checked_parameter_count() {
        Some(count) if count <= MAX_PARAMETERS => Ok(()),
        _ => Err(ValidationError::new("model has too many parameters")),
    }
}

impl Hyperparameters {
    /// Gets the sizes of all layers, from the input to the output layer.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.layers as usize + 2);
        sizes.push(self.input_dims as usize);
        sizes.extend(std::iter::repeat(self.neurons as usize).take(self.layers as usize));
        sizes.push(self.output_dims as usize);
        sizes
    }

    /// Gets the number of parameters (weights and biases) of the network described by these
    /// hyperparameters.
    ///
    /// Saturates at `usize::MAX`. Validated hyperparameters never exceed [`MAX_PARAMETERS`].
    pub fn parameter_count(&self) -> usize {
        self.checked_parameter_count().unwrap_or(usize::MAX)
    }

    /// Gets the number of parameters, or `None` if it overflows.
    pub fn checked_parameter_count(&self) -> Option<usize> {
        let dense = |fan_in: u64, fan_out: u64| -> Option<u64> {
            fan_in.checked_mul(fan_out)?.checked_add(fan_out)
        };
        let input = u64::from(self.input_dims);
        let output = u64::from(self.output_dims);
        let neurons = u64::from(self.neurons);
        let count = match u64::from(self.layers) {
            0 => dense(input, output)?,
            layers => dense(neurons, neurons)?
                .checked_mul(layers - 1)?
                .checked_add(dense(input, neurons)?)?
                .checked_add(dense(neurons, output)?)?,
        };
        usize::try_from(count).ok()
    }
}

/// Access to the weights of the model trained locally by a participant.
pub trait ModelAccessor: Send + 'static {
    /// Gets the current weights as a flat vector.
    fn weights(&self) -> Vec<f64>;

    /// Overwrites the current weights.
    ///
    /// # Errors
    /// Fails if `weights` does not fit the shape of the model.
    fn set_weights(&mut self, weights: Vec<f64>) -> Result<(), ModelError>;

    /// (Re)initializes the model with the given hyperparameters.
    fn init(&mut self, hyperparameters: &Hyperparameters);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_count() {
        // 4 -> 5 -> 1
        assert_eq!(Hyperparameters::default().parameter_count(), 4 * 5 + 5 + 5 + 1);

        let params = Hyperparameters {
            layers: 0,
            ..Hyperparameters::default()
        };
        assert_eq!(params.layer_sizes(), vec![4, 1]);
        assert_eq!(params.parameter_count(), 5);
    }

    #[test]
    fn test_validate_hyperparameters() {
        assert!(Hyperparameters::default().validate().is_ok());

        let params = Hyperparameters {
            input_dims: 0,
            ..Hyperparameters::default()
        };
        assert!(params.validate().is_err());

        let params = Hyperparameters {
            learning_rate: 0.,
            ..Hyperparameters::default()
        };
        assert!(params.validate().is_err());

        let params = Hyperparameters {
            learning_rate: f64::NAN,
            ..Hyperparameters::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_the_parameter_count() {
        let huge = Hyperparameters {
            input_dims: u32::MAX,
            ..Hyperparameters::default()
        };
        assert!(huge.checked_parameter_count().unwrap() > MAX_PARAMETERS);
        assert!(huge.validate().is_err());

        let deep = Hyperparameters {
            layers: u32::MAX,
            neurons: u32::MAX,
            ..Hyperparameters::default()
        };
        assert_eq!(deep.checked_parameter_count(), None);
        assert_eq!(deep.parameter_count(), usize::MAX);
        assert!(deep.validate().is_err());

        let many_layers = Hyperparameters {
            layers: u32::MAX,
            ..Hyperparameters::default()
        };
        assert!(many_layers.validate().is_err());

        // 4 -> 2048 -> 2048 -> 1
        let large = Hyperparameters {
            layers: 2,
            neurons: 2048,
            ..Hyperparameters::default()
        };
        assert_eq!(
            large.parameter_count(),
            4 * 2048 + 2048 + 2048 * 2048 + 2048 + 2048 + 1
        );
        assert!(large.validate().is_ok());
    }
}
