#![allow(dead_code)]

use std::{future::Future, sync::Arc, time::Duration};

use hefl::{
    crypto::{KeySeed, Paillier},
    model::{Hyperparameters, ModelAccessor, ModelError},
    transport::Transport,
    Node,
    NodeHandle,
    PeerAddress,
    Protocol,
    Roles,
};
use tokio::task::JoinHandle;
use tracing_subscriber::*;

pub fn enable_logging() {
    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .try_init();
}

/// A model whose weights only change when an aggregate is applied.
#[derive(Debug, Default)]
pub struct FixedModel {
    weights: Vec<f64>,
    hyperparameters: Option<Hyperparameters>,
}

impl FixedModel {
    pub fn new(weights: Vec<f64>) -> Self {
        Self {
            weights,
            hyperparameters: None,
        }
    }

    pub fn hyperparameters(&self) -> Option<&Hyperparameters> {
        self.hyperparameters.as_ref()
    }
}

impl ModelAccessor for FixedModel {
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
    }
}

pub type TestProtocol = Protocol<Paillier, FixedModel>;

pub fn crypto() -> Paillier {
    Paillier::from_seed(&KeySeed([42; 32]), 256, 24).unwrap()
}

pub fn hyperparameters() -> Hyperparameters {
    Hyperparameters {
        neurons: 8,
        ..Hyperparameters::default()
    }
}

/// Spawns a node running on `transport`.
pub fn spawn<T: Transport>(
    address: PeerAddress,
    roles: Roles,
    weights: Vec<f64>,
    transport: T,
) -> (NodeHandle, JoinHandle<TestProtocol>) {
    let protocol = Protocol::new(
        address,
        roles,
        hyperparameters(),
        crypto(),
        FixedModel::new(weights),
    );
    let (node, handle) = Node::new(protocol, Arc::new(transport));
    (handle, tokio::spawn(node.run()))
}

/// Awaits a future, failing the test if it takes too long.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(30), future)
        .await
        .expect("timed out")
}

pub fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "{:?} != {:?}", actual, expected);
    }
}
