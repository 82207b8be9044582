//! The wire representation of envelopes.
//!
//! Envelopes are serialized with `bincode`: the source and destination as length-prefixed
//! strings, the kind as a tag, followed by the kind-dependent payload (hyperparameters as a fixed
//! record, ciphertexts as a length-prefixed blob).

use bincode::Options;
use thiserror::Error;

use super::Envelope;

#[derive(Error, Debug)]
/// Errors related to the wire representation of envelopes.
pub enum WireError {
    #[error("failed to serialize envelope: {0}")]
    Serialize(bincode::Error),

    #[error("failed to deserialize envelope: {0}")]
    Deserialize(bincode::Error),
}

fn options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(limit)
}

/// Serializes an envelope.
pub fn to_bytes(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    options(u64::MAX)
        .serialize(envelope)
        .map_err(WireError::Serialize)
}

/// Deserializes an envelope, allocating at most `limit` bytes.
///
/// Trailing bytes are rejected.
pub fn from_bytes(bytes: &[u8], limit: u64) -> Result<Envelope, WireError> {
    options(limit)
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(WireError::Deserialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::PeerAddress,
        message::{MessageKind, Payload},
        model::Hyperparameters,
    };

    #[test]
    fn test_envelope_layout() {
        let envelope = Envelope::join(PeerAddress::from("a"), PeerAddress::from("bc"));
        let bytes = to_bytes(&envelope).unwrap();
        #[rustfmt::skip]
        let expected = vec![
            1, 0, 0, 0, 0, 0, 0, 0, b'a', // source
            2, 0, 0, 0, 0, 0, 0, 0, b'b', b'c', // destination
            0, 0, 0, 0, // kind
            0, 0, 0, 0, // payload
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_mismatched_envelope_survives_the_wire() {
        // classification, not decoding, rejects mismatched payloads
        let envelope = Envelope::new_unchecked(
            PeerAddress::from("a"),
            PeerAddress::from("b"),
            MessageKind::Result,
            Payload::Params(Hyperparameters::default()),
        );
        let bytes = to_bytes(&envelope).unwrap();
        assert_eq!(from_bytes(&bytes, 1024).unwrap(), envelope);
    }

    #[test]
    fn test_from_bytes_rejects_invalid_input() {
        let envelope = Envelope::ack(PeerAddress::from("a"), PeerAddress::from("b"));
        let mut bytes = to_bytes(&envelope).unwrap();

        assert!(from_bytes(&bytes[..bytes.len() - 1], 1024).is_err());
        assert!(from_bytes(&bytes, 4).is_err());

        bytes.push(0);
        assert!(from_bytes(&bytes, 1024).is_err());
    }
}
