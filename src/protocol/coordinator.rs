use std::collections::VecDeque;

use crate::{
    common::PeerAddress,
    crypto::{Ciphertext, CryptoFacade},
    model::Hyperparameters,
    protocol::{Aggregate, AggregationError, MembershipRegistry, ProtocolViolation, SecureAggregator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The outcome of a join request.
pub enum JoinOutcome {
    /// The address has been registered. `first` is set for the first member of the session.
    Registered { first: bool },
    /// The address was already registered.
    Duplicate,
    /// A round is in flight: the address is registered once the round closes.
    Deferred,
}

#[derive(Debug)]
/// A closed aggregation round.
pub struct RoundClose {
    /// The aggregate, or the reason the round was aborted.
    pub outcome: Result<Aggregate, AggregationError>,
    /// The deferred joiners registered when the round closed.
    pub admitted: Vec<PeerAddress>,
}

#[derive(Debug)]
/// The coordinator side of a training session.
pub struct Coordinator {
    hyperparameters: Hyperparameters,
    registry: MembershipRegistry,
    aggregator: SecureAggregator,
    deferred: VecDeque<PeerAddress>,
    round: u64,
    last_aggregate: Option<Ciphertext>,
}

impl Coordinator {
    pub fn new(hyperparameters: Hyperparameters) -> Self {
        Self {
            hyperparameters,
            registry: MembershipRegistry::new(),
            aggregator: SecureAggregator::new(),
            deferred: VecDeque::new(),
            round: 0,
            last_aggregate: None,
        }
    }

    /// Gets the hyperparameters handed out to the participants.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &SecureAggregator {
        &self.aggregator
    }

    /// Gets the addresses waiting for the active round to close.
    pub fn deferred(&self) -> impl Iterator<Item = &PeerAddress> {
        self.deferred.iter()
    }

    /// Gets the number of completed rounds.
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Gets the aggregate of the last completed round.
    pub fn last_aggregate(&self) -> Option<&Ciphertext> {
        self.last_aggregate.as_ref()
    }

    /// Checks whether a round is in flight, ie. whether contributions have been buffered.
    pub fn round_in_flight(&self) -> bool {
        self.registry.is_sealed()
    }

    pub fn join(&mut self, address: PeerAddress) -> JoinOutcome {
        if self.registry.contains(&address) {
            return JoinOutcome::Duplicate;
        }
        if self.round_in_flight() {
            if !self.deferred.contains(&address) {
                self.deferred.push_back(address);
            }
            return JoinOutcome::Deferred;
        }
        let first = self.registry.is_empty();
        self.registry.register(address);
        JoinOutcome::Registered { first }
    }

    /// Buffers the contribution of a member and closes the round if every member contributed.
    ///
    /// # Errors
    /// Fails if the contributor is not a member of the session.
    pub fn contribute<C>(
        &mut self,
        crypto: &C,
        participant: PeerAddress,
        ciphertext: Ciphertext,
    ) -> Result<Option<RoundClose>, ProtocolViolation>
    where
        C: CryptoFacade + ?Sized,
    {
        if !self.registry.contains(&participant) {
            return Err(ProtocolViolation::UnknownParticipant(participant));
        }
        if self.aggregator.submit(participant.clone(), ciphertext).is_some() {
            debug!("{} replaced its contribution", participant);
        }
        self.registry.seal();

        if !self.aggregator.is_complete(&self.registry) {
            debug!(
                "{} of {} contributions received",
                self.aggregator.len(),
                self.registry.size()
            );
            return Ok(None);
        }

        let outcome = self.aggregator.aggregate(crypto, self.registry.size());
        if let Ok(aggregate) = &outcome {
            self.round += 1;
            self.last_aggregate = Some(aggregate.ciphertext.clone());
        }
        Ok(Some(RoundClose {
            outcome,
            admitted: self.close_round(),
        }))
    }

    /// Unseals the registry and registers the deferred joiners in order of arrival.
    fn close_round(&mut self) -> Vec<PeerAddress> {
        self.aggregator.clear();
        self.registry.unseal();
        let admitted: Vec<PeerAddress> = self.deferred.drain(..).collect();
        for address in &admitted {
            self.registry.register(address.clone());
        }
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::CryptoError, testutils::PlainCrypto};

    fn plain(weights: &[f64]) -> Ciphertext {
        crate::crypto::seal(&PlainCrypto, weights).unwrap()
    }

    fn open(ciphertext: &Ciphertext) -> Vec<f64> {
        crate::crypto::open(&PlainCrypto, ciphertext).unwrap()
    }

    #[test]
    fn test_join() {
        let mut coordinator = Coordinator::new(Hyperparameters::default());
        assert_eq!(
            coordinator.join("a".into()),
            JoinOutcome::Registered { first: true }
        );
        assert_eq!(
            coordinator.join("b".into()),
            JoinOutcome::Registered { first: false }
        );
        assert_eq!(coordinator.join("a".into()), JoinOutcome::Duplicate);
        assert_eq!(coordinator.registry().size(), 2);
    }

    #[test]
    fn test_round() {
        let mut coordinator = Coordinator::new(Hyperparameters::default());
        coordinator.join("a".into());
        coordinator.join("b".into());

        let close = coordinator
            .contribute(&PlainCrypto, "b".into(), plain(&[3., 4.]))
            .unwrap();
        assert!(close.is_none());
        assert!(coordinator.round_in_flight());

        let close = coordinator
            .contribute(&PlainCrypto, "a".into(), plain(&[1., 2.]))
            .unwrap()
            .unwrap();
        let aggregate = close.outcome.unwrap();
        assert_eq!(open(&aggregate.ciphertext), vec![2., 3.]);
        assert_eq!(aggregate.recipients.len(), 2);
        assert!(close.admitted.is_empty());

        assert_eq!(coordinator.round(), 1);
        assert_eq!(coordinator.last_aggregate(), Some(&aggregate.ciphertext));
        assert!(coordinator.aggregator().is_empty());
        assert!(!coordinator.round_in_flight());
    }

    #[test]
    fn test_contribution_from_non_member() {
        let mut coordinator = Coordinator::new(Hyperparameters::default());
        coordinator.join("a".into());
        assert_eq!(
            coordinator
                .contribute(&PlainCrypto, "x".into(), plain(&[1.]))
                .unwrap_err(),
            ProtocolViolation::UnknownParticipant("x".into())
        );
        assert!(coordinator.aggregator().is_empty());
        assert!(!coordinator.round_in_flight());
    }

    #[test]
    fn test_joiners_are_deferred_while_a_round_is_in_flight() {
        let mut coordinator = Coordinator::new(Hyperparameters::default());
        coordinator.join("a".into());
        coordinator.join("b".into());
        coordinator
            .contribute(&PlainCrypto, "a".into(), plain(&[1.]))
            .unwrap();

        assert_eq!(coordinator.join("c".into()), JoinOutcome::Deferred);
        assert_eq!(coordinator.join("c".into()), JoinOutcome::Deferred);
        assert_eq!(coordinator.registry().size(), 2);
        assert_eq!(coordinator.deferred().count(), 1);

        let close = coordinator
            .contribute(&PlainCrypto, "b".into(), plain(&[3.]))
            .unwrap()
            .unwrap();
        assert_eq!(close.outcome.unwrap().recipients.len(), 2);
        assert_eq!(close.admitted, vec![PeerAddress::from("c")]);
        assert_eq!(coordinator.registry().size(), 3);
        assert_eq!(coordinator.deferred().count(), 0);
    }

    #[test]
    fn test_aborted_round() {
        let mut coordinator = Coordinator::new(Hyperparameters::default());
        coordinator.join("a".into());
        coordinator.join("b".into());
        coordinator
            .contribute(&PlainCrypto, "a".into(), plain(&[1., 2.]))
            .unwrap();
        coordinator.join("c".into());

        // contributions of different lengths cannot be added
        let close = coordinator
            .contribute(&PlainCrypto, "b".into(), plain(&[1.]))
            .unwrap()
            .unwrap();
        assert!(matches!(
            close.outcome,
            Err(AggregationError::Addition {
                source: CryptoError::LengthMismatch { .. },
                ..
            })
        ));
        assert_eq!(close.admitted, vec![PeerAddress::from("c")]);
        assert!(coordinator.aggregator().is_empty());
        assert_eq!(coordinator.round(), 0);
        assert!(coordinator.last_aggregate().is_none());
        assert_eq!(
            coordinator.registry().addresses(),
            &[
                PeerAddress::from("a"),
                PeerAddress::from("b"),
                PeerAddress::from("c")
            ]
        );
    }
}
