use std::collections::BTreeMap;

use displaydoc::Display;
use thiserror::Error;

use crate::{
    common::PeerAddress,
    crypto::{Ciphertext, CryptoError, CryptoFacade},
    protocol::MembershipRegistry,
};

/// Errors which abort an aggregation round.
#[derive(Debug, Display, Error)]
pub enum AggregationError {
    /// There is no contribution to aggregate.
    Empty,
    /// Failed to add the contribution of {participant}: {source}.
    Addition {
        participant: PeerAddress,
        source: CryptoError,
    },
    /// Failed to scale the sum of the contributions: {0}.
    Scaling(CryptoError),
}

#[derive(Debug, Clone, PartialEq)]
/// The encrypted average of a round and the participants it is sent back to.
pub struct Aggregate {
    pub ciphertext: Ciphertext,
    pub recipients: Vec<PeerAddress>,
}

#[derive(Debug, Default)]
/// Buffers the encrypted contributions of the active round.
///
/// Contributions are kept sorted by address, so that the homomorphic sum is folded in the same
/// order whatever the order of arrival.
pub struct SecureAggregator {
    buffer: BTreeMap<PeerAddress, Ciphertext>,
}

impl SecureAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers the contribution of a participant, replacing its previous contribution to the
    /// round if any.
    pub fn submit(&mut self, participant: PeerAddress, ciphertext: Ciphertext) -> Option<Ciphertext> {
        self.buffer.insert(participant, ciphertext)
    }

    /// Checks whether every member of the registry and nobody else contributed to the round.
    pub fn is_complete(&self, registry: &MembershipRegistry) -> bool {
        !self.buffer.is_empty()
            && self.buffer.len() == registry.size()
            && registry
                .addresses()
                .iter()
                .all(|address| self.buffer.contains_key(address))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Gets the participants who contributed to the active round, in ascending order.
    pub fn contributors(&self) -> impl Iterator<Item = &PeerAddress> {
        self.buffer.keys()
    }

    /// Sums the buffered contributions and scales the sum by `1 / participants`.
    ///
    /// The buffer is emptied whether the aggregation succeeds or not.
    ///
    /// # Errors
    /// Fails if the buffer is empty or if a homomorphic operation fails.
    pub fn aggregate<C>(
        &mut self,
        crypto: &C,
        participants: usize,
    ) -> Result<Aggregate, AggregationError>
    where
        C: CryptoFacade + ?Sized,
    {
        let buffer = std::mem::take(&mut self.buffer);
        let recipients: Vec<PeerAddress> = buffer.keys().cloned().collect();

        let mut contributions = buffer.into_iter();
        let (_, first) = contributions.next().ok_or(AggregationError::Empty)?;
        let sum = contributions.try_fold(first, |sum, (participant, ciphertext)| {
            crypto
                .add(&sum, &ciphertext)
                .map_err(|source| AggregationError::Addition {
                    participant,
                    source,
                })
        })?;
        let ciphertext = crypto
            .scale(&sum, 1. / participants as f64)
            .map_err(AggregationError::Scaling)?;

        Ok(Aggregate {
            ciphertext,
            recipients,
        })
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
