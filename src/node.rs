//! The processing path of a node.
//!
//! A [`Node`] owns the [`Protocol`] state machine of a node and feeds it, one at a time and in
//! order of arrival, with the envelopes received from its [`Transport`] and with the local
//! operations submitted through its [`NodeHandle`]s. The envelopes emitted by the state machine
//! in response to an inbound envelope are sent concurrently, without blocking the processing
//! path.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use displaydoc::Display;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, Span};

use crate::{
    common::PeerAddress,
    crypto::CryptoFacade,
    message::Envelope,
    model::ModelAccessor,
    protocol::{Event, Protocol, ProtocolError, SessionState},
    transport::{Transport, TransportError},
};

/// Errors returned to the users of a [`NodeHandle`].
#[derive(Debug, Display, Error)]
pub enum NodeError {
    /// The node has stopped.
    Stopped,
    /// The request failed: {0}.
    Protocol(#[from] ProtocolError),
}

struct ResponseReceiver<R>(oneshot::Receiver<R>);

fn response_channel<R>() -> (ResponseSender<R>, ResponseReceiver<R>) {
    let (tx, rx) = oneshot::channel::<R>();
    (ResponseSender(tx), ResponseReceiver(rx))
}

impl<R> Future for ResponseReceiver<R> {
    type Output = Result<R, NodeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().0)
            .poll(cx)
            .map_err(|_| NodeError::Stopped)
    }
}

struct ResponseSender<R>(oneshot::Sender<R>);

impl<R> ResponseSender<R> {
    fn send(self, response: R) {
        self.0.send(response).unwrap_or_else(|_| {
            warn!("failed to send response: receiver shut down");
        })
    }
}

type RequestMessage<P, R> = (P, ResponseSender<R>);

enum Request {
    Join(RequestMessage<PeerAddress, Result<(), ProtocolError>>),
    Contribute(RequestMessage<PeerAddress, Result<(), ProtocolError>>),
    Weights(ResponseSender<Vec<f64>>),
    Shutdown,
}

#[derive(Clone)]
/// A handle to submit local operations to a running [`Node`].
pub struct NodeHandle {
    identity: PeerAddress,
    requests: mpsc::Sender<Request>,
    session: watch::Receiver<SessionState>,
}

impl NodeHandle {
    /// Gets the address of the node.
    pub fn identity(&self) -> &PeerAddress {
        &self.identity
    }

    /// Joins the session of `coordinator`.
    ///
    /// Returns once the `Join` envelope has been sent. Use [`NodeHandle::wait_for()`] to wait
    /// for the hyperparameters.
    pub async fn join(&self, coordinator: PeerAddress) -> Result<(), NodeError> {
        let (tx, rx) = response_channel();
        self.request(Request::Join((coordinator, tx))).await?;
        Ok(rx.await??)
    }

    /// Contributes the encrypted local weights to the current round of `coordinator`.
    ///
    /// Returns once the `EncryptedChunk` envelope has been sent. Use
    /// [`NodeHandle::wait_for()`] to wait for the aggregate.
    pub async fn contribute(&self, coordinator: PeerAddress) -> Result<(), NodeError> {
        let (tx, rx) = response_channel();
        self.request(Request::Contribute((coordinator, tx))).await?;
        Ok(rx.await??)
    }

    /// Gets the current weights of the local model.
    pub async fn weights(&self) -> Result<Vec<f64>, NodeError> {
        let (tx, rx) = response_channel();
        self.request(Request::Weights(tx)).await?;
        rx.await
    }

    /// Stops the node once the envelope it is handling, if any, has been handled.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        self.request(Request::Shutdown).await
    }

    /// Gets the current session state of the node.
    pub fn session(&self) -> SessionState {
        *self.session.borrow()
    }

    /// Waits until the session state of the node is `state`.
    pub async fn wait_for(&self, state: SessionState) -> Result<(), NodeError> {
        let mut session = self.session.clone();
        loop {
            if *session.borrow_and_update() == state {
                return Ok(());
            }
            session.changed().await.map_err(|_| NodeError::Stopped)?;
        }
    }

    async fn request(&self, request: Request) -> Result<(), NodeError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| NodeError::Stopped)
    }
}

/// The single processing path of a node.
pub struct Node<T, C, M> {
    protocol: Protocol<C, M>,
    transport: Arc<T>,
    requests: mpsc::Receiver<Request>,
    session: watch::Sender<SessionState>,
}

impl<T, C, M> Node<T, C, M>
where
    T: Transport,
    C: CryptoFacade,
    M: ModelAccessor,
{
    pub fn new(protocol: Protocol<C, M>, transport: Arc<T>) -> (Self, NodeHandle) {
        let (requests_tx, requests_rx) = mpsc::channel(64);
        let (session_tx, session_rx) = watch::channel(protocol.session());
        let handle = NodeHandle {
            identity: protocol.identity().clone(),
            requests: requests_tx,
            session: session_rx,
        };
        let node = Self {
            protocol,
            transport,
            requests: requests_rx,
            session: session_tx,
        };
        (node, handle)
    }

    /// Runs the processing path until the node is shut down or the transport is closed.
    ///
    /// Returns the state machine of the node.
    pub async fn run(mut self) -> Protocol<C, M> {
        let span = info_span!("node", identity = %self.protocol.identity());
        async {
            info!("node started");
            // the node keeps serving its peers when all handles are gone
            let mut handles_gone = false;
            loop {
                tokio::select! {
                    biased;

                    request = self.requests.recv(), if !handles_gone => match request {
                        Some(Request::Shutdown) => break,
                        Some(request) => self.dispatch_request(request).await,
                        None => handles_gone = true,
                    },
                    envelope = self.transport.receive() => match envelope {
                        Ok(envelope) => self.handle_envelope(envelope),
                        Err(TransportError::Closed) => {
                            warn!("transport closed");
                            break;
                        }
                        Err(e) => warn!("failed to receive an envelope: {}", e),
                    },
                }
            }
            info!("node stopped");
        }
        .instrument(span)
        .await;
        self.protocol
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        let span = info_span!(
            "envelope",
            kind = %envelope.kind(),
            source = %envelope.source()
        );
        let _enter = span.enter();

        debug!("handling envelope");
        if let Err(e) = self.protocol.handle(envelope) {
            warn!("{}", e);
        }
        self.handle_protocol_events();
    }

    async fn dispatch_request(&mut self, request: Request) {
        match request {
            Request::Join((coordinator, response)) => {
                let result = self.join(coordinator).await;
                self.handle_protocol_events();
                response.send(result);
            }
            Request::Contribute((coordinator, response)) => {
                let result = self.contribute(coordinator).await;
                self.handle_protocol_events();
                response.send(result);
            }
            Request::Weights(response) => response.send(self.protocol.weights()),
            Request::Shutdown => {}
        }
    }

    async fn join(&mut self, coordinator: PeerAddress) -> Result<(), ProtocolError> {
        let envelope = self.protocol.join(&coordinator)?;
        self.transport.send(&coordinator, envelope).await?;
        self.protocol.joined(coordinator);
        Ok(())
    }

    async fn contribute(&mut self, coordinator: PeerAddress) -> Result<(), ProtocolError> {
        let envelope = self.protocol.contribute(&coordinator)?;
        self.transport.send(&coordinator, envelope).await?;
        self.protocol.contributed();
        Ok(())
    }

    /// Handle the pending state machine events.
    fn handle_protocol_events(&mut self) {
        while let Some(event) = self.protocol.next_event() {
            match event {
                Event::Send(envelope) => self.dispatch_send(envelope),
                Event::SessionChanged(state) => {
                    self.session.send_replace(state);
                }
            }
        }
    }

    /// Sends an envelope without waiting for the outcome.
    fn dispatch_send(&self, envelope: Envelope) {
        let transport = self.transport.clone();
        tokio::spawn(
            async move {
                let destination = envelope.destination().clone();
                let kind = envelope.kind();
                if let Err(e) = transport.send(&destination, envelope).await {
                    warn!("failed to send {} to {}: {}", kind, destination, e);
                }
            }
            .instrument(Span::current()),
        );
    }
}
