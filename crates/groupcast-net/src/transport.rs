//! TCP transport helpers
//!
//! Every outbound connection attempt and write is bounded by a timeout so
//! that an unresponsive peer cannot park a task forever.

use crate::framing::{Frame, FrameCodec, FrameError};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Timed out talking to {0}")]
    Timeout(SocketAddr),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// A TCP stream speaking groupcast frames
pub type FramedStream = Framed<TcpStream, FrameCodec>;

/// Wrap a stream in the frame codec
pub fn framed(stream: TcpStream) -> FramedStream {
    Framed::new(stream, FrameCodec::new())
}

/// Dial `addr`, giving up after `limit`
pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream, TransportError> {
    match timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TransportError::Connect { addr, source }),
        Err(_) => Err(TransportError::Timeout(addr)),
    }
}

/// Bare reachability check: connect and immediately close
pub async fn probe(addr: SocketAddr, limit: Duration) -> bool {
    connect(addr, limit).await.is_ok()
}

/// Open a one-shot connection, write a single frame and close it
pub async fn send_frame(
    addr: SocketAddr,
    frame: Frame,
    limit: Duration,
) -> Result<(), TransportError> {
    let stream = connect(addr, limit).await?;
    let mut framed = framed(stream);

    match timeout(limit, async {
        framed.send(frame).await?;
        framed.close().await
    })
    .await
    {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Timeout(addr)),
    }
}

/// Write a frame on a connection that stays open
pub async fn write_frame(
    framed: &mut FramedStream,
    frame: Frame,
    limit: Duration,
) -> Result<(), TransportError> {
    match timeout(limit, framed.send(frame)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::Timeout(peer_of(framed))),
    }
}

fn peer_of(framed: &FramedStream) -> SocketAddr {
    framed
        .get_ref()
        .peer_addr()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
}

/// Read the next frame; `Ok(None)` on a clean end of stream
pub async fn next_frame(framed: &mut FramedStream) -> Result<Option<Frame>, TransportError> {
    match framed.next().await {
        Some(Ok(frame)) => Ok(Some(frame)),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}
