use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::{Transport, TransportError};
use crate::{common::PeerAddress, message::Envelope};

type Mailboxes = HashMap<PeerAddress, mpsc::UnboundedSender<Envelope>>;

#[derive(Debug, Clone, Default)]
/// An in-process network of addressed mailboxes.
pub struct MemoryNetwork {
    mailboxes: Arc<Mutex<Mailboxes>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the endpoint of `address`, replacing any previous endpoint with this address.
    pub fn endpoint(&self, address: PeerAddress) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.clone(), tx);
        MemoryTransport {
            address,
            network: self.clone(),
            inbound: AsyncMutex::new(rx),
        }
    }

    fn deliver(&self, destination: &PeerAddress, envelope: Envelope) -> Result<(), TransportError> {
        let mailboxes = self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner);
        mailboxes
            .get(destination)
            .ok_or_else(|| TransportError::UnknownPeer(destination.clone()))?
            .send(envelope)
            .map_err(|_| TransportError::UnknownPeer(destination.clone()))
    }
}

#[derive(Debug)]
/// The endpoint of a node on a [`MemoryNetwork`].
pub struct MemoryTransport {
    address: PeerAddress,
    network: MemoryNetwork,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl MemoryTransport {
    pub fn address(&self) -> &PeerAddress {
        &self.address
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        destination: &PeerAddress,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        trace!("{} -> {}: {}", self.address, destination, envelope.kind());
        self.network.deliver(destination, envelope)
    }

    async fn receive(&self) -> Result<Envelope, TransportError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive() {
        let network = MemoryNetwork::new();
        let a = network.endpoint("a".into());
        let b = network.endpoint("b".into());

        let envelope = Envelope::join(a.address().clone(), b.address().clone());
        a.send(b.address(), envelope.clone()).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), envelope);

        // sending to oneself
        let envelope = Envelope::ack(a.address().clone(), a.address().clone());
        a.send(a.address(), envelope.clone()).await.unwrap();
        assert_eq!(a.receive().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let network = MemoryNetwork::new();
        let a = network.endpoint("a".into());
        let envelope = Envelope::join("a".into(), "b".into());
        assert!(matches!(
            a.send(&"b".into(), envelope.clone()).await,
            Err(TransportError::UnknownPeer(_))
        ));

        let b = network.endpoint("b".into());
        drop(b);
        assert!(matches!(
            a.send(&"b".into(), envelope).await,
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_is_cancel_safe() {
        let network = MemoryNetwork::new();
        let a = network.endpoint("a".into());

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), a.receive()).await;
        assert!(timed_out.is_err());

        let envelope = Envelope::join("b".into(), "a".into());
        network.deliver(&"a".into(), envelope.clone()).unwrap();
        assert_eq!(a.receive().await.unwrap(), envelope);
    }
}
