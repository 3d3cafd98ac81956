//! Long-lived handshake connections to the replicas
//!
//! A subscriber stays online on a replica only while its connection to that
//! replica's session port is open. The link sends one `Auth` frame and then
//! just waits for the replica to go away.

use groupcast_core::types::{AuthMessage, PeerAddress};
use groupcast_net::transport::{self, FramedStream, TransportError};
use groupcast_net::{Frame, PortLayout};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a link ended
#[derive(Debug)]
pub enum LinkEnd {
    /// The replica closed the connection
    Closed,
    Failed(TransportError),
}

/// Session with one replica
#[derive(Debug, Clone)]
pub struct SessionLink {
    replica: PeerAddress,
    session_addr: SocketAddr,
    auth: AuthMessage,
    timeout: Duration,
}

impl SessionLink {
    /// `None` if the replica's base port leaves no room for a session port
    pub fn new(
        replica: PeerAddress,
        layout: &PortLayout,
        auth: AuthMessage,
        timeout: Duration,
    ) -> Option<Self> {
        Some(Self {
            replica,
            session_addr: layout.session_addr(&replica)?,
            auth,
            timeout,
        })
    }

    pub fn replica(&self) -> PeerAddress {
        self.replica
    }

    /// Connect and authenticate
    pub async fn establish(&self) -> Result<FramedStream, TransportError> {
        let stream = transport::connect(self.session_addr, self.timeout).await?;
        let mut framed = transport::framed(stream);
        let frame = Frame::auth(&self.auth)?;
        transport::write_frame(&mut framed, frame, self.timeout).await?;
        info!("Authenticated as {} with replica {}", self.auth.username, self.replica);
        Ok(framed)
    }

    /// Keep the session open until the replica goes away
    pub async fn run(self) -> LinkEnd {
        let mut framed = match self.establish().await {
            Ok(framed) => framed,
            Err(e) => {
                warn!("Could not reach replica {}: {}", self.replica, e);
                return LinkEnd::Failed(e);
            }
        };

        let end = loop {
            match transport::next_frame(&mut framed).await {
                Ok(Some(frame)) => debug!("Ignoring {:?} frame from {}", frame.frame_type, self.replica),
                Ok(None) => break LinkEnd::Closed,
                Err(e) => break LinkEnd::Failed(e),
            }
        };
        warn!("Replica {} went away: {:?}", self.replica, end);
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_link_authenticates_and_ends_with_replica() {
        // a replica whose session port is the listener's port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let session = listener.local_addr().unwrap();
        let layout = PortLayout::default();
        let replica = PeerAddress::new(SocketAddr::new(
            session.ip(),
            session.port() - layout.session_offset,
        ));

        let auth = AuthMessage {
            username: "alice".into(),
            listen_port: 6001,
        };
        let link = SessionLink::new(replica, &layout, auth.clone(), Duration::from_secs(1)).unwrap();
        let running = tokio::spawn(link.run());

        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = transport::framed(stream);
        let received = transport::next_frame(&mut framed)
            .await
            .unwrap()
            .unwrap()
            .into_auth()
            .unwrap();
        assert_eq!(received, auth);

        drop(framed);
        assert!(matches!(running.await.unwrap(), LinkEnd::Closed));
    }

    #[tokio::test]
    async fn test_unreachable_replica_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let session = listener.local_addr().unwrap();
        drop(listener);

        let layout = PortLayout::default();
        let replica = PeerAddress::new(SocketAddr::new(session.ip(), session.port() - 1));
        let auth = AuthMessage {
            username: "alice".into(),
            listen_port: 6001,
        };
        let link = SessionLink::new(replica, &layout, auth, Duration::from_millis(500)).unwrap();
        assert!(matches!(link.run().await, LinkEnd::Failed(_)));
    }
}
