//! The TCP transport.
//!
//! Every envelope is sent over a fresh connection as a single frame:
//!
//! ```text
//! [4-byte LE length][bincode envelope]
//! ```
//!
//! The receiver answers every frame but `Ack` frames with an `Ack` frame on the same connection
//! and the sender reports success once it read the `Ack`. `Ack` frames never reach
//! [`Transport::receive()`].

use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tracing::Instrument;

use super::{Transport, TransportError};
use crate::{
    common::PeerAddress,
    message::{wire, Envelope, MessageKind},
    settings::TransportSettings,
};

/// A transport which listens for envelopes on a TCP socket.
pub struct TcpTransport {
    local_addr: SocketAddr,
    inbound: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    timeout: Duration,
    max_frame_size: usize,
    listener: JoinHandle<()>,
}

impl TcpTransport {
    /// Binds the listening socket and starts accepting connections.
    ///
    /// # Errors
    /// Fails if the socket cannot be bound.
    pub async fn bind(settings: &TransportSettings) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(settings.bind_address).await?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);

        let (tx, rx) = mpsc::unbounded_channel();
        let max_frame_size = settings.max_frame_size;
        let timeout = Duration::from_millis(settings.timeout);
        let listener = tokio::spawn(
            accept(listener, tx, timeout, max_frame_size)
                .instrument(info_span!("tcp_listener", %local_addr)),
        );
        Ok(Self {
            local_addr,
            inbound: Mutex::new(rx),
            timeout,
            max_frame_size,
            listener,
        })
    }

    /// Gets the address the transport listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        destination: &PeerAddress,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let timed_out = || TransportError::Timeout(destination.clone());

        let mut stream = timeout(self.timeout, TcpStream::connect(destination.as_str()))
            .await
            .map_err(|_| timed_out())??;
        write_frame(&mut stream, &envelope, self.max_frame_size).await?;
        if envelope.kind() == MessageKind::Ack {
            return Ok(());
        }

        let reply = timeout(self.timeout, read_frame(&mut stream, self.max_frame_size))
            .await
            .map_err(|_| timed_out())??;
        if reply.kind() != MessageKind::Ack {
            return Err(TransportError::MissingAck(destination.clone()));
        }
        trace!("{} acknowledged {}", destination, envelope.kind());
        Ok(())
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

async fn accept(
    listener: TcpListener,
    inbound: mpsc::UnboundedSender<Envelope>,
    timeout: Duration,
    max_frame_size: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let inbound = inbound.clone();
                tokio::spawn(
                    async move {
                        if let Err(e) =
                            serve(stream, peer, inbound, timeout, max_frame_size).await
                        {
                            warn!("dropping connection: {}", e);
                        }
                    }
                    .instrument(debug_span!("tcp_connection", %peer)),
                );
            }
            Err(e) => warn!("failed to accept a connection: {}", e),
        }
    }
}

/// Reads one envelope from the connection, forwards it and acknowledges it.
///
/// Reading the frame and writing the `Ack` are each bounded by `limit`.
async fn serve(
    mut stream: TcpStream,
    peer: SocketAddr,
    inbound: mpsc::UnboundedSender<Envelope>,
    limit: Duration,
    max_frame_size: usize,
) -> Result<(), TransportError> {
    let timed_out = || TransportError::Timeout(PeerAddress::from(peer));

    let envelope = timeout(limit, read_frame(&mut stream, max_frame_size))
        .await
        .map_err(|_| timed_out())??;
    if envelope.kind() == MessageKind::Ack {
        trace!("consumed ack from {}", envelope.source());
        return Ok(());
    }

    let ack = Envelope::ack(envelope.destination().clone(), envelope.source().clone());
    inbound.send(envelope).map_err(|_| TransportError::Closed)?;
    timeout(limit, write_frame(&mut stream, &ack, max_frame_size))
        .await
        .map_err(|_| timed_out())??;
    stream.shutdown().await?;
    Ok(())
}

pub(crate) async fn write_frame<W>(
    writer: &mut W,
    envelope: &Envelope,
    max_frame_size: usize,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = wire::to_bytes(envelope)?;
    if bytes.len() > max_frame_size {
        return Err(TransportError::FrameTooLarge(bytes.len()));
    }
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn read_frame<R>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Envelope, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut length = [0_u8; 4];
    reader.read_exact(&mut length).await?;
    let length = u32::from_le_bytes(length) as usize;
    if length > max_frame_size {
        return Err(TransportError::FrameTooLarge(length));
    }

    let mut bytes = vec![0_u8; length];
    reader.read_exact(&mut bytes).await?;
    Ok(wire::from_bytes(&bytes, max_frame_size as u64)?)
}
