//! Insecure stand-ins for the capabilities consumed by the protocol.
//!
//! **Never use [`PlainCrypto`] outside of tests: its ciphertexts are the plain weights.**

use crate::{
    crypto::{Ciphertext, CryptoError, CryptoFacade},
    model::{Hyperparameters, ModelAccessor, ModelError},
};

#[derive(Debug, Clone, Copy, Default)]
/// A pass-through crypto facade whose ciphertexts are the serialized plaintexts.
pub struct PlainCrypto;

impl PlainCrypto {
    fn unpack(ciphertext: &Ciphertext) -> Result<Vec<f64>, CryptoError> {
        Ok(bincode::deserialize(ciphertext.as_bytes())?)
    }

    fn pack(weights: &[f64]) -> Result<Ciphertext, CryptoError> {
        Ok(bincode::serialize(weights)?.into())
    }
}

impl CryptoFacade for PlainCrypto {
    type Plaintext = Vec<f64>;

    fn encode(&self, weights: &[f64]) -> Result<Vec<f64>, CryptoError> {
        match weights.iter().find(|weight| !weight.is_finite()) {
            Some(weight) => Err(CryptoError::NonFinite(*weight)),
            None => Ok(weights.to_vec()),
        }
    }

    fn decode(&self, plaintext: &Vec<f64>) -> Result<Vec<f64>, CryptoError> {
        Ok(plaintext.clone())
    }

    fn encrypt(&self, plaintext: &Vec<f64>) -> Result<Ciphertext, CryptoError> {
        Self::pack(plaintext)
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Vec<f64>, CryptoError> {
        Self::unpack(ciphertext)
    }

    fn add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, CryptoError> {
        let lhs = Self::unpack(lhs)?;
        let rhs = Self::unpack(rhs)?;
        if lhs.len() != rhs.len() {
            return Err(CryptoError::LengthMismatch {
                lhs: lhs.len(),
                rhs: rhs.len(),
            });
        }
        let sum: Vec<f64> = lhs.iter().zip(rhs.iter()).map(|(l, r)| l + r).collect();
        Self::pack(&sum)
    }

    fn scale(&self, ciphertext: &Ciphertext, scalar: f64) -> Result<Ciphertext, CryptoError> {
        let scaled: Vec<f64> = Self::unpack(ciphertext)?
            .iter()
            .map(|weight| weight * scalar)
            .collect();
        Self::pack(&scaled)
    }
}

#[derive(Debug, Clone, Default)]
/// A model whose weights are fixed at creation and only change through
/// [`ModelAccessor::set_weights()`].
pub struct VectorModel {
    weights: Vec<f64>,
    hyperparameters: Option<Hyperparameters>,
    inits: usize,
}

impl VectorModel {
    pub fn new(weights: Vec<f64>) -> Self {
        Self {
            weights,
            ..Self::default()
        }
    }

    /// Gets the number of times the model has been initialized.
    pub fn inits(&self) -> usize {
        self.inits
    }

    pub fn hyperparameters(&self) -> Option<&Hyperparameters> {
        self.hyperparameters.as_ref()
    }
}

impl ModelAccessor for VectorModel {
    fn weights(&self) -> Vec<f64> {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: Vec<f64>) -> Result<(), ModelError> {
        if weights.len() != self.weights.len() {
            return Err(ModelError::LengthMismatch {
                expected: self.weights.len(),
                actual: weights.len(),
            });
        }
        self.weights = weights;
        Ok(())
    }

    fn init(&mut self, hyperparameters: &Hyperparameters) {
        self.hyperparameters = Some(*hyperparameters);
        self.inits += 1;
    }
}
