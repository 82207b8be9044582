use rand::{distributions::Uniform, Rng};

use super::{Hyperparameters, ModelAccessor, ModelError};

#[derive(Debug, Clone, Default)]
/// The parameters of a fully connected feed-forward network.
///
/// The weights are laid out layer after layer; within a layer the `fan_in * fan_out` weight
/// matrix (row-major) comes first, followed by the `fan_out` biases.
pub struct DenseNetwork {
    hyperparameters: Option<Hyperparameters>,
    weights: Vec<f64>,
}

impl DenseNetwork {
    /// Creates an uninitialized network without any weights.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the hyperparameters the network was last initialized with.
    pub fn hyperparameters(&self) -> Option<&Hyperparameters> {
        self.hyperparameters.as_ref()
    }

    fn init_with<R: Rng + ?Sized>(&mut self, hyperparameters: &Hyperparameters, rng: &mut R) {
        let mut weights = Vec::with_capacity(hyperparameters.parameter_count());
        for pair in hyperparameters.layer_sizes().windows(2) {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            // Xavier/Glorot uniform initialization
            let limit = (6. / (fan_in + fan_out) as f64).sqrt();
            let distribution = Uniform::new_inclusive(-limit, limit);
            weights.extend((0..fan_in * fan_out).map(|_| rng.sample(distribution)));
            weights.extend(std::iter::repeat(0.).take(fan_out));
        }
        self.weights = weights;
        self.hyperparameters = Some(*hyperparameters);
    }
}

impl ModelAccessor for DenseNetwork {
    fn weights(&self) -> Vec<f64> {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: Vec<f64>) -> Result<(), ModelError> {
        let expected = self
            .hyperparameters
            .as_ref()
            .ok_or(ModelError::Uninitialized)?
            .parameter_count();
        if weights.len() != expected {
            return Err(ModelError::LengthMismatch {
                expected,
                actual: weights.len(),
            });
        }
        self.weights = weights;
        Ok(())
    }

    fn init(&mut self, hyperparameters: &Hyperparameters) {
        self.init_with(hyperparameters, &mut rand::thread_rng());
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    #[test]
    fn test_init() {
        let params = Hyperparameters::default();
        let mut network = DenseNetwork::new();
        assert!(network.weights().is_empty());

        network.init_with(&params, &mut ChaCha20Rng::from_seed([7; 32]));
        let weights = network.weights();
        assert_eq!(weights.len(), params.parameter_count());

        // the biases of the hidden layer are zero
        assert!(weights[20..25].iter().all(|bias| *bias == 0.));
        // the weights are within the xavier bound of the first layer
        let limit = (6_f64 / 9.).sqrt();
        assert!(weights[..20].iter().all(|w| w.abs() <= limit));
        assert_eq!(network.hyperparameters(), Some(&params));
    }

    #[test]
    fn test_set_weights() {
        let mut network = DenseNetwork::new();
        assert_eq!(
            network.set_weights(vec![1.]),
            Err(ModelError::Uninitialized)
        );

        let params = Hyperparameters {
            layers: 0,
            ..Hyperparameters::default()
        };
        network.init(&params);
        assert_eq!(
            network.set_weights(vec![1., 2.]),
            Err(ModelError::LengthMismatch {
                expected: 5,
                actual: 2
            })
        );

        let weights = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        network.set_weights(weights.clone()).unwrap();
        assert_eq!(network.weights(), weights);
    }
}
