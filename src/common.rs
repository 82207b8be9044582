use std::net::SocketAddr;

use bitflags::bitflags;
use derive_more::{Display, From, Into};

#[derive(
    Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Clone, Display, From, Into, Serialize, Deserialize,
)]
/// The address of a peer node.
///
/// Addresses are opaque to the protocol: they only identify a peer and are handed to the
/// transport as is. The TCP transport interprets them as `host:port` endpoints.
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(address: SocketAddr) -> Self {
        Self(address.to_string())
    }
}

impl AsRef<str> for PeerAddress {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

bitflags! {
    /// The roles a node plays in a training session.
    ///
    /// A node can be a participant and a coordinator at the same time.
    #[derive(Default)]
    pub struct Roles: u8 {
        /// The node trains a local model and contributes encrypted weights.
        const PARTICIPANT = 0b0000_0001;
        /// The node registers participants and aggregates their contributions.
        const COORDINATOR = 0b0000_0010;
    }
}

impl Roles {
    pub fn is_participant(self) -> bool {
        self.contains(Roles::PARTICIPANT)
    }

    pub fn is_coordinator(self) -> bool {
        self.contains(Roles::COORDINATOR)
    }
}
