//! The protocol state machine run by every node.
//!
//! The [`Protocol`] does not perform any IO. It is fed inbound envelopes through
//! [`Protocol::handle()`] and local operations through [`Protocol::join()`] and
//! [`Protocol::contribute()`], and it emits [`Event`]s, to be collected with
//! [`Protocol::next_event()`], for everything the node has to do in response.
//!
//! # Participant
//!
//! ```text
//!            join            Params            contribute
//! Unjoined ------> AwaitingParams ------> Ready ----------> AwaitingResult
//!                                           ^                     |
//!                                           +---------------------+
//!                                                   Result
//! ```
//!
//! # Coordinator
//!
//! A coordinator registers the senders of `Join` envelopes in its [`MembershipRegistry`] and
//! answers them with the session hyperparameters. The `EncryptedChunk`s of the members are
//! buffered by the [`SecureAggregator`] until every member contributed, at which point the
//! contributions are summed and averaged homomorphically and the encrypted average is sent
//! back to every contributor.

mod aggregator;
mod coordinator;
mod error;
mod participant;
mod registry;

pub use self::{
    aggregator::{Aggregate, AggregationError, SecureAggregator},
    coordinator::{Coordinator, JoinOutcome, RoundClose},
    error::{ProtocolError, ProtocolViolation},
    participant::SessionState,
    registry::MembershipRegistry,
};

use std::collections::VecDeque;

use validator::Validate;

use self::participant::Participant;
use crate::{
    common::{PeerAddress, Roles},
    crypto::{self, Ciphertext, CryptoFacade},
    message::{Envelope, Message, MessageKind},
    model::{Hyperparameters, ModelAccessor},
};

#[derive(Debug, Clone, PartialEq)]
/// Events emitted by the state machine.
pub enum Event {
    /// An envelope must be sent to its destination.
    Send(Envelope),
    /// The session state of the participant changed.
    SessionChanged(SessionState),
}

/// The protocol state machine of a node.
pub struct Protocol<C, M> {
    identity: PeerAddress,
    roles: Roles,
    participant: Participant,
    /// Present iff the node acts as a coordinator.
    coordinator: Option<Coordinator>,
    crypto: C,
    model: M,
    events: VecDeque<Event>,
}

impl<C, M> Protocol<C, M>
where
    C: CryptoFacade,
    M: ModelAccessor,
{
    /// Creates the state machine of the node `identity`.
    ///
    /// If the node acts as a coordinator, it hands `hyperparameters` out to its participants.
    pub fn new(
        identity: PeerAddress,
        roles: Roles,
        hyperparameters: Hyperparameters,
        crypto: C,
        model: M,
    ) -> Self {
        let coordinator = if roles.is_coordinator() {
            Some(Coordinator::new(hyperparameters))
        } else {
            None
        };
        Self {
            identity,
            roles,
            participant: Participant::default(),
            coordinator,
            crypto,
            model,
            events: VecDeque::new(),
        }
    }

    pub fn identity(&self) -> &PeerAddress {
        &self.identity
    }

    pub fn roles(&self) -> Roles {
        self.roles
    }

    /// Gets the session state of the participant role.
    pub fn session(&self) -> SessionState {
        self.participant.state
    }

    /// Gets the coordinator the participant joined.
    pub fn joined_coordinator(&self) -> Option<&PeerAddress> {
        self.participant.coordinator.as_ref()
    }

    /// Gets the coordinator state, if the node acts as a coordinator.
    pub fn coordinator(&self) -> Option<&Coordinator> {
        self.coordinator.as_ref()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Gets the current weights of the local model.
    pub fn weights(&self) -> Vec<f64> {
        self.model.weights()
    }

    /// Retrieves the next pending event.
    pub fn next_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Creates the `Join` envelope for `coordinator`.
    ///
    /// The state does not change until [`Protocol::joined()`] confirms that the envelope has been
    /// sent.
    ///
    /// # Errors
    /// Fails if the node is not a participant or has already joined a session.
    pub fn join(&self, coordinator: &PeerAddress) -> Result<Envelope, ProtocolError> {
        self.check_participant("join", &[SessionState::Unjoined])?;
        Ok(Envelope::join(self.identity.clone(), coordinator.clone()))
    }

    /// Records that the `Join` envelope has been sent to `coordinator`.
    pub fn joined(&mut self, coordinator: PeerAddress) {
        info!("joined the session of {}", coordinator);
        self.participant.coordinator = Some(coordinator);
        self.set_session(SessionState::AwaitingParams);
    }

    /// Encrypts the current weights into an `EncryptedChunk` envelope for `coordinator`.
    ///
    /// The state does not change until [`Protocol::contributed()`] confirms that the envelope
    /// has been sent.
    ///
    /// # Errors
    /// Fails if the participant has not received the hyperparameters yet, if `coordinator` is
    /// not the coordinator it joined or if the weights cannot be encrypted.
    pub fn contribute(&self, coordinator: &PeerAddress) -> Result<Envelope, ProtocolError> {
        // a participant whose round was aborted contributes again
        self.check_participant(
            "contribute",
            &[SessionState::Ready, SessionState::AwaitingResult],
        )?;
        if !self.participant.is_coordinator(coordinator) {
            return Err(ProtocolError::UnknownCoordinator(coordinator.clone()));
        }
        let ciphertext = crypto::seal(&self.crypto, &self.model.weights())?;
        Ok(Envelope::encrypted_chunk(
            self.identity.clone(),
            coordinator.clone(),
            ciphertext,
        ))
    }

    /// Records that the `EncryptedChunk` envelope has been sent.
    pub fn contributed(&mut self) {
        self.set_session(SessionState::AwaitingResult);
    }

    /// Handles an inbound envelope.
    ///
    /// # Errors
    /// Fails with a [`ProtocolViolation`] if the envelope is malformed or unexpected, in which
    /// case it is dropped without any change of state. Fails with an [`AggregationError`] if the
    /// envelope closed a round which could not be aggregated.
    pub fn handle(&mut self, envelope: Envelope) -> Result<(), ProtocolError> {
        if envelope.destination() != &self.identity {
            return Err(ProtocolViolation::Misaddressed(envelope.destination().clone()).into());
        }
        let source = envelope.source().clone();
        match envelope.into_message()? {
            Message::Join => self.handle_join(source),
            Message::Params(hyperparameters) => self.handle_params(source, hyperparameters),
            Message::EncryptedChunk(ciphertext) => self.handle_chunk(source, ciphertext),
            Message::Result(ciphertext) => self.handle_result(source, ciphertext),
            Message::Ack => {
                trace!("ignoring ack from {}", source);
                Ok(())
            }
        }
    }
}

impl<C, M> Protocol<C, M>
where
    C: CryptoFacade,
    M: ModelAccessor,
{
    fn emit_event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    fn set_session(&mut self, state: SessionState) {
        if self.participant.state != state {
            debug!("session state: {} -> {}", self.participant.state, state);
            self.participant.state = state;
            self.emit_event(Event::SessionChanged(state));
        }
    }

    fn check_participant(
        &self,
        operation: &'static str,
        expected: &[SessionState],
    ) -> Result<(), ProtocolError> {
        if !self.roles.is_participant() {
            return Err(ProtocolViolation::NotParticipant.into());
        }
        if !expected.contains(&self.participant.state) {
            return Err(ProtocolError::InvalidState {
                operation,
                state: self.participant.state,
            });
        }
        Ok(())
    }

    /// Checks that a message for the participant role comes from the joined coordinator while
    /// the participant is in one of the `expected` states.
    fn check_inbound(
        &self,
        source: &PeerAddress,
        kind: MessageKind,
        expected: &[SessionState],
    ) -> Result<(), ProtocolViolation> {
        if !self.roles.is_participant() {
            return Err(ProtocolViolation::NotParticipant);
        }
        let state = self.participant.state;
        if !expected.contains(&state) {
            return Err(ProtocolViolation::UnexpectedMessage { kind, state });
        }
        if !self.participant.is_coordinator(source) {
            return Err(ProtocolViolation::UnexpectedSender(source.clone()));
        }
        Ok(())
    }

    fn handle_join(&mut self, source: PeerAddress) -> Result<(), ProtocolError> {
        let Self {
            identity,
            coordinator,
            model,
            events,
            ..
        } = self;
        let coordinator = coordinator
            .as_mut()
            .ok_or(ProtocolViolation::NotCoordinator)?;

        match coordinator.join(source.clone()) {
            JoinOutcome::Registered { first } => {
                if first {
                    debug!("first member, initializing the session model");
                    model.init(coordinator.hyperparameters());
                }
                info!(
                    "registered {} ({} members)",
                    source,
                    coordinator.registry().size()
                );
            }
            JoinOutcome::Duplicate => {
                debug!("{} already joined, sending the hyperparameters again", source);
            }
            JoinOutcome::Deferred => {
                info!("round in flight, deferring the registration of {}", source);
                return Ok(());
            }
        }
        events.push_back(Event::Send(Envelope::params(
            identity.clone(),
            source,
            *coordinator.hyperparameters(),
        )));
        Ok(())
    }

    fn handle_params(
        &mut self,
        source: PeerAddress,
        hyperparameters: Hyperparameters,
    ) -> Result<(), ProtocolError> {
        self.check_inbound(
            &source,
            MessageKind::Params,
            &[SessionState::AwaitingParams, SessionState::Ready],
        )?;
        hyperparameters
            .validate()
            .map_err(|e| ProtocolViolation::InvalidParams(e.to_string()))?;

        self.model.init(&hyperparameters);
        self.set_session(SessionState::Ready);
        Ok(())
    }

    fn handle_chunk(
        &mut self,
        source: PeerAddress,
        ciphertext: Ciphertext,
    ) -> Result<(), ProtocolError> {
        let Self {
            identity,
            coordinator,
            crypto,
            events,
            ..
        } = self;
        let coordinator = coordinator
            .as_mut()
            .ok_or(ProtocolViolation::NotCoordinator)?;

        let RoundClose { outcome, admitted } =
            match coordinator.contribute(&*crypto, source, ciphertext)? {
                Some(close) => close,
                None => return Ok(()),
            };

        if let Ok(aggregate) = &outcome {
            info!(
                "round {} completed with {} contributions",
                coordinator.round(),
                aggregate.recipients.len()
            );
            for recipient in &aggregate.recipients {
                events.push_back(Event::Send(Envelope::result(
                    identity.clone(),
                    recipient.clone(),
                    aggregate.ciphertext.clone(),
                )));
            }
        }
        for address in admitted {
            info!("registered deferred joiner {}", address);
            events.push_back(Event::Send(Envelope::params(
                identity.clone(),
                address,
                *coordinator.hyperparameters(),
            )));
        }
        outcome.map(|_| ()).map_err(Into::into)
    }

    fn handle_result(
        &mut self,
        source: PeerAddress,
        ciphertext: Ciphertext,
    ) -> Result<(), ProtocolError> {
        self.check_inbound(&source, MessageKind::Result, &[SessionState::AwaitingResult])?;

        let weights = crypto::open(&self.crypto, &ciphertext)?;
        self.model.set_weights(weights)?;
        info!("applied the aggregate of {}", source);
        self.set_session(SessionState::Ready);
        Ok(())
    }
}
