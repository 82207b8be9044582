use displaydoc::Display;
use thiserror::Error;

use crate::{
    common::PeerAddress,
    crypto::CryptoError,
    message::MessageKind,
    model::ModelError,
    protocol::{AggregationError, SessionState},
    transport::TransportError,
};

/// Reasons for which an inbound envelope is dropped without any change of state.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The envelope kind is unset.
    UnsetKind,
    /// The payload does not match the envelope kind {0}.
    PayloadMismatch(MessageKind),
    /// The envelope is addressed to {0}.
    Misaddressed(PeerAddress),
    /// The node is not a coordinator.
    NotCoordinator,
    /// The node is not a participant.
    NotParticipant,
    /// Unexpected {kind} envelope in session state {state}.
    UnexpectedMessage {
        kind: MessageKind,
        state: SessionState,
    },
    /// Unexpected envelope from {0}, which is not the coordinator of the session.
    UnexpectedSender(PeerAddress),
    /// {0} is not a member of the session.
    UnknownParticipant(PeerAddress),
    /// Invalid hyperparameters: {0}.
    InvalidParams(String),
}

/// Errors which can occur while the protocol state machine handles an envelope or a local
/// operation.
#[derive(Debug, Display, Error)]
pub enum ProtocolError {
    /// Protocol violation: {0}.
    Violation(#[from] ProtocolViolation),
    /// Cannot {operation} in session state {state}.
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    /// {0} is not the coordinator of the session.
    UnknownCoordinator(PeerAddress),
    /// Transport failure: {0}.
    Transport(#[from] TransportError),
    /// The round was aborted: {0}.
    Aggregation(#[from] AggregationError),
    /// Crypto failure: {0}.
    Crypto(#[from] CryptoError),
    /// Model failure: {0}.
    Model(#[from] ModelError),
}
