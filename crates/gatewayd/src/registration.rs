//! Replica registration listener
//!
//! A replica announces itself by connecting and sending one `Register`
//! frame with its base port. The host part of its identity is the address
//! the connection was observed from.

use crate::election::LeaderElector;
use crate::membership::{Admission, MembershipTracker};
use groupcast_core::types::PeerAddress;
use groupcast_net::transport::{self, TransportError};
use groupcast_net::FrameError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Registration errors
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Connection closed before registering")]
    NoRegistration,
    #[error("Registration timed out")]
    Timeout,
}

/// Accepts replica registrations
pub struct RegistrationListener {
    membership: Arc<MembershipTracker>,
    elector: Arc<LeaderElector>,
    read_timeout: Duration,
}

impl RegistrationListener {
    pub fn new(
        membership: Arc<MembershipTracker>,
        elector: Arc<LeaderElector>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            membership,
            elector,
            read_timeout,
        }
    }

    /// Accept loop; one task per connection
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            debug!("Registration connection from {}", remote);
                            let this = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = this.handle(stream, remote).await {
                                    warn!("Registration from {} rejected: {}", remote, e);
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

    /// Admit the replica, then rerun the election.
    ///
    /// The election runs even when the replica was already known: a replica
    /// that restarted between two probes lost its leader flag and needs the
    /// announcement again.
    pub async fn handle(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<PeerAddress, RegistrationError> {
        let mut framed = transport::framed(stream);
        let frame = match timeout(self.read_timeout, transport::next_frame(&mut framed)).await {
            Ok(result) => result?.ok_or(RegistrationError::NoRegistration)?,
            Err(_) => return Err(RegistrationError::Timeout),
        };
        let registration = frame.into_registration()?;
        let peer = PeerAddress::new(SocketAddr::new(remote.ip(), registration.base_port));

        match self.membership.add_peer(peer) {
            Admission::Added => info!("Replica {} joined", peer),
            Admission::Revived => info!("Replica {} rejoined", peer),
            Admission::Unchanged => debug!("Replica {} registered again", peer),
        }

        self.elector.run_election().await;
        Ok(peer)
    }
}
