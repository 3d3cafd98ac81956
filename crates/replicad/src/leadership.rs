//! Leader flag and the control listener
//!
//! The control port answers two kinds of connections: health probes, which
//! connect and close without sending anything, and leader announcements,
//! which carry one `LeaderAnnounce` frame. A replica knows itself as the
//! local IP of the accepted connection plus its base port, which is the
//! address the gateway dialed.
//!
//! Each connection is handled on its own task, so announcements may be
//! applied out of order; one carrying an older term than the flag already
//! holds is dropped.

use groupcast_core::types::{LeaderAnnouncement, PeerAddress};
use groupcast_net::transport::{self, TransportError};
use groupcast_net::FrameError;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Control connection errors
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Announcement timed out")]
    Timeout,
}

#[derive(Debug, Default)]
struct LeaderState {
    term: Option<u64>,
    leader: Option<PeerAddress>,
    is_leader: bool,
}

/// The last announced leader and whether it is this replica.
///
/// Only a replica holding the flag originates gossip for posts it accepts.
#[derive(Debug, Default)]
pub struct LeaderFlag {
    state: RwLock<LeaderState>,
}

impl LeaderFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announcement; returns whether this replica now leads, or
    /// `None` when the announcement is older than the one already applied.
    pub fn apply(&self, announcement: LeaderAnnouncement, own: PeerAddress) -> Option<bool> {
        let announced = announcement.leader;
        let is_leader = announced == own;
        let mut state = self.state.write();
        if state.term.is_some_and(|current| announcement.term < current) {
            return None;
        }
        if state.is_leader != is_leader {
            if is_leader {
                info!("This replica ({}) is now the leader", own);
            } else {
                info!("Leadership moved to {}", announced);
            }
        }
        state.term = Some(announcement.term);
        state.leader = Some(announced);
        state.is_leader = is_leader;
        Some(is_leader)
    }

    pub fn is_leader(&self) -> bool {
        self.state.read().is_leader
    }

    pub fn leader(&self) -> Option<PeerAddress> {
        self.state.read().leader
    }

    pub fn term(&self) -> Option<u64> {
        self.state.read().term
    }
}

/// What a control connection turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Probe,
    Announce { leader: PeerAddress, is_leader: bool },
    Stale { term: u64 },
}

/// Serves the control port
pub struct ControlListener {
    flag: Arc<LeaderFlag>,
    base_port: u16,
    read_timeout: Duration,
}

impl ControlListener {
    pub fn new(flag: Arc<LeaderFlag>, base_port: u16, read_timeout: Duration) -> Self {
        Self {
            flag,
            base_port,
            read_timeout,
        }
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            let this = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = this.handle(stream).await {
                                    warn!("Control connection from {} failed: {}", remote, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }
    }

    /// Read at most one frame from the connection
    pub async fn handle(&self, stream: TcpStream) -> Result<ControlEvent, ControlError> {
        let own = PeerAddress::new(SocketAddr::new(stream.local_addr()?.ip(), self.base_port));
        let mut framed = transport::framed(stream);

        let frame = match timeout(self.read_timeout, transport::next_frame(&mut framed)).await {
            Ok(result) => result?,
            Err(_) => return Err(ControlError::Timeout),
        };
        let Some(frame) = frame else {
            trace!("Health probe");
            return Ok(ControlEvent::Probe);
        };

        let announcement = frame.into_leader()?;
        let leader = announcement.leader;
        match self.flag.apply(announcement, own) {
            Some(is_leader) => {
                debug!("Leader announced: {} term {} (self: {})", leader, announcement.term, own);
                Ok(ControlEvent::Announce { leader, is_leader })
            }
            None => {
                debug!("Ignoring stale announcement of {} (term {})", leader, announcement.term);
                Ok(ControlEvent::Stale {
                    term: announcement.term,
                })
            }
        }
    }
}
