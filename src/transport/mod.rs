//! Delivery of envelopes between nodes.
//!
//! The protocol only needs two operations from the network, sending an envelope to a peer and
//! receiving the next inbound envelope, which form the [`Transport`] capability. Two
//! implementations are provided:
//!
//! - [`MemoryTransport`]: endpoints of an in-process [`MemoryNetwork`], for tests and
//!   simulations.
//! - [`TcpTransport`]: one length-prefixed frame per envelope over TCP, acknowledged by the
//!   receiver.

mod memory;
mod tcp;

pub use self::{
    memory::{MemoryNetwork, MemoryTransport},
    tcp::TcpTransport,
};

use displaydoc::Display;
use thiserror::Error;

use crate::{
    common::PeerAddress,
    message::{Envelope, WireError},
};

/// Errors which can occur while sending or receiving envelopes.
#[derive(Debug, Display, Error)]
pub enum TransportError {
    /// Unknown peer {0}.
    UnknownPeer(PeerAddress),
    /// The transport is closed.
    Closed,
    /// IO error: {0}.
    Io(#[from] std::io::Error),
    /// Timed out while talking to {0}.
    Timeout(PeerAddress),
    /// Invalid frame: {0}.
    Wire(#[from] WireError),
    /// A frame of {0} bytes exceeds the frame size limit.
    FrameTooLarge(usize),
    /// {0} did not acknowledge the envelope.
    MissingAck(PeerAddress),
}

/// Reliable delivery of envelopes to named peers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends an envelope to `destination`.
    async fn send(&self, destination: &PeerAddress, envelope: Envelope)
        -> Result<(), TransportError>;

    /// Receives the next inbound envelope.
    ///
    /// Implementations must be cancel safe: if the future is dropped before completion, no
    /// envelope is lost.
    async fn receive(&self) -> Result<Envelope, TransportError>;
}
