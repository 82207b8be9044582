use derive_more::Display;

use crate::common::PeerAddress;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
/// The session state of a participant.
pub enum SessionState {
    /// The participant has not joined any session.
    Unjoined,
    /// The participant sent a join request and waits for the hyperparameters.
    AwaitingParams,
    /// The participant is initialized and can contribute.
    Ready,
    /// The participant contributed and waits for the aggregate.
    AwaitingResult,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Unjoined
    }
}

#[derive(Debug, Default)]
/// The participant side of a training session.
pub(crate) struct Participant {
    pub state: SessionState,
    pub coordinator: Option<PeerAddress>,
}

impl Participant {
    /// Checks whether `address` is the coordinator this participant joined.
    pub fn is_coordinator(&self, address: &PeerAddress) -> bool {
        self.coordinator.as_ref() == Some(address)
    }
}
