//! # hefl: federated averaging over encrypted weights
//!
//! Every node of a `hefl` session trains a local model and contributes its parameters to a
//! shared average, without the coordinating peer ever seeing a plaintext weight. Weight vectors
//! are encrypted under an additively homomorphic scheme before they leave a participant; the
//! coordinator sums the ciphertexts, scales the sum by `1/N` and sends the encrypted average
//! back to every contributor, which decrypts it and applies it to its model.
//!
//! ## Crate layout
//!
//! - [`message`]: the [`Envelope`] exchanged between nodes and its wire encoding.
//! - [`crypto`]: the [`CryptoFacade`] capability and its [`Paillier`] implementation.
//! - [`model`]: the [`ModelAccessor`] capability, the [`Hyperparameters`] handed out by the
//!   coordinator and a [`DenseNetwork`] parameter store.
//! - [`protocol`]: the per-node protocol state machine, with the coordinator-side membership
//!   registry and secure aggregator.
//! - [`transport`]: the [`Transport`] capability with an in-process and a TCP implementation.
//! - [`node`]: the single processing path that ties a protocol state machine to a transport.
//! - [`settings`]: loading and validation of the node configuration.
//!
//! [`Envelope`]: crate::message::Envelope
//! [`CryptoFacade`]: crate::crypto::CryptoFacade
//! [`Paillier`]: crate::crypto::Paillier
//! [`ModelAccessor`]: crate::model::ModelAccessor
//! [`Hyperparameters`]: crate::model::Hyperparameters
//! [`DenseNetwork`]: crate::model::DenseNetwork
//! [`Transport`]: crate::transport::Transport

#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate tracing;

pub mod common;
pub mod crypto;
pub mod message;
pub mod model;
pub mod node;
pub mod protocol;
pub mod settings;
pub mod transport;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use self::{
    common::{PeerAddress, Roles},
    node::{Node, NodeError, NodeHandle},
    protocol::{Protocol, ProtocolError, SessionState},
};
