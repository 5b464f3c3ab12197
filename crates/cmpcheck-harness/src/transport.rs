//! Transports delivering requests to a [`MockResponder`].
//!
//! [`LoopbackTransport`] calls the responder in-process. [`SimTransport`]
//! crosses a turmoil simulated network, one TCP connection per request,
//! with each message framed as a 4-byte big-endian length followed by the
//! encoded message.

use std::{
    io,
    sync::{MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use cmpcheck_core::{Transport, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::responder::{MockResponder, SharedResponder};

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 1 << 20;

fn lock(responder: &SharedResponder) -> MutexGuard<'_, MockResponder> {
    responder.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process delivery.
///
/// A silent responder never completes the call; the exchange runner's
/// response deadline ends the wait.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    responder: SharedResponder,
}

impl LoopbackTransport {
    /// Deliver to `responder`.
    pub fn new(responder: SharedResponder) -> Self {
        Self { responder }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError> {
        let reply = lock(&self.responder).handle(&request);
        match reply {
            Some(reply) => Ok(reply),
            None => std::future::pending().await,
        }
    }
}

/// Delivery over the turmoil simulated network.
///
/// A host without a listener refuses the connection. A host that has
/// stopped never answers, so the exchange runner's deadline ends the wait.
#[derive(Debug, Clone)]
pub struct SimTransport {
    peer: String,
}

impl SimTransport {
    /// Deliver to the host and port in `peer`, e.g. `"ca:8829"`.
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into() }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn send(&self, request: Bytes) -> Result<Bytes, TransportError> {
        let mut stream = turmoil::net::TcpStream::connect(self.peer.as_str()).await?;
        write_frame(&mut stream, &request).await?;
        Ok(read_frame(&mut stream).await?)
    }
}

/// Accept connections on `addr` and answer each framed request.
///
/// Runs until the listener fails. A request the responder does not answer
/// gets its connection closed without a reply.
pub async fn serve(addr: &str, responder: SharedResponder) -> io::Result<()> {
    let listener = turmoil::net::TcpListener::bind(addr).await?;
    tracing::debug!(addr, "responder listening");
    loop {
        let (mut stream, peer) = listener.accept().await?;
        let request = match read_frame(&mut stream).await {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(%peer, %err, "dropping connection");
                continue;
            },
        };
        let reply = lock(&responder).handle(&request);
        if let Some(reply) = reply {
            write_frame(&mut stream, &reply).await?;
        }
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "frame too large"));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Bytes> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Bytes::from(payload))
}
