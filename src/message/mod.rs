//! The envelopes exchanged between nodes.
//!
//! An [`Envelope`] is an addressed unit of protocol communication. Its [`MessageKind`] determines
//! which [`Payload`] it must carry:
//!
//! | kind             | payload                      |
//! |------------------|------------------------------|
//! | `Join`           | none                         |
//! | `Params`         | [`Hyperparameters`]          |
//! | `EncryptedChunk` | [`Ciphertext`]               |
//! | `Result`         | [`Ciphertext`]               |
//! | `Ack`            | none                         |
//! | `Unset`          | none                         |
//!
//! Envelopes received from the wire are not trusted to respect this table, hence they are
//! classified into a [`Message`] before the protocol acts upon them.

pub mod wire;

pub use self::wire::WireError;

use derive_more::Display;

use crate::{
    common::PeerAddress,
    crypto::Ciphertext,
    model::Hyperparameters,
    protocol::ProtocolViolation,
};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The kind of an envelope.
pub enum MessageKind {
    Join,
    Params,
    EncryptedChunk,
    Result,
    Ack,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The payload of an envelope.
pub enum Payload {
    Empty,
    Params(Hyperparameters),
    Ciphertext(Ciphertext),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// An addressed protocol message.
pub struct Envelope {
    source: PeerAddress,
    destination: PeerAddress,
    kind: MessageKind,
    payload: Payload,
}

impl Envelope {
    /// Creates an envelope without checking that the payload matches the kind.
    pub fn new_unchecked(
        source: PeerAddress,
        destination: PeerAddress,
        kind: MessageKind,
        payload: Payload,
    ) -> Self {
        Self {
            source,
            destination,
            kind,
            payload,
        }
    }

    pub fn join(source: PeerAddress, destination: PeerAddress) -> Self {
        Self::new_unchecked(source, destination, MessageKind::Join, Payload::Empty)
    }

    pub fn params(
        source: PeerAddress,
        destination: PeerAddress,
        hyperparameters: Hyperparameters,
    ) -> Self {
        Self::new_unchecked(
            source,
            destination,
            MessageKind::Params,
            Payload::Params(hyperparameters),
        )
    }

    pub fn encrypted_chunk(
        source: PeerAddress,
        destination: PeerAddress,
        ciphertext: Ciphertext,
    ) -> Self {
        Self::new_unchecked(
            source,
            destination,
            MessageKind::EncryptedChunk,
            Payload::Ciphertext(ciphertext),
        )
    }

    pub fn result(source: PeerAddress, destination: PeerAddress, ciphertext: Ciphertext) -> Self {
        Self::new_unchecked(
            source,
            destination,
            MessageKind::Result,
            Payload::Ciphertext(ciphertext),
        )
    }

    pub fn ack(source: PeerAddress, destination: PeerAddress) -> Self {
        Self::new_unchecked(source, destination, MessageKind::Ack, Payload::Empty)
    }

    pub fn source(&self) -> &PeerAddress {
        &self.source
    }

    pub fn destination(&self) -> &PeerAddress {
        &self.destination
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Classifies the envelope, consuming it.
    ///
    /// # Errors
    /// Fails if the kind is `Unset` or if the payload does not match the kind.
    pub fn into_message(self) -> Result<Message, ProtocolViolation> {
        use MessageKind as K;
        use Payload as P;

        let kind = self.kind;
        Ok(match (kind, self.payload) {
            (K::Join, P::Empty) => Message::Join,
            (K::Params, P::Params(params)) => Message::Params(params),
            (K::EncryptedChunk, P::Ciphertext(ciphertext)) => Message::EncryptedChunk(ciphertext),
            (K::Result, P::Ciphertext(ciphertext)) => Message::Result(ciphertext),
            (K::Ack, P::Empty) => Message::Ack,
            (K::Unset, _) => return Err(ProtocolViolation::UnsetKind),
            (kind, _) => return Err(ProtocolViolation::PayloadMismatch(kind)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A classified envelope, whose content is guaranteed to match its kind.
pub enum Message {
    Join,
    Params(Hyperparameters),
    EncryptedChunk(Ciphertext),
    Result(Ciphertext),
    Ack,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Join => MessageKind::Join,
            Message::Params(_) => MessageKind::Params,
            Message::EncryptedChunk(_) => MessageKind::EncryptedChunk,
            Message::Result(_) => MessageKind::Result,
            Message::Ack => MessageKind::Ack,
        }
    }
}
