//! Client session registry and the handshake listener
//!
//! A client keeps one connection open per replica. Its `Auth` frame binds a
//! username to the observed host of that connection and the gossip port the
//! client claims; the session lives as long as the connection does.

use groupcast_core::types::AuthMessage;
use groupcast_net::transport::{self, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Identifies one handshake, so a closing connection only removes the
/// session it created itself
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

#[derive(Debug, Clone, Copy)]
struct Session {
    id: SessionId,
    gossip_addr: SocketAddr,
}

/// username -> where that user currently receives gossip
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the session of `username`
    pub fn register(&self, username: &str, host: IpAddr, port: u16) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let gossip_addr = SocketAddr::new(host, port);
        let previous = self
            .sessions
            .lock()
            .insert(username.to_string(), Session { id, gossip_addr });

        match previous {
            Some(old) if old.gossip_addr != gossip_addr => {
                info!("Session of {} moved {} -> {}", username, old.gossip_addr, gossip_addr)
            }
            Some(_) => debug!("Session of {} renewed", username),
            None => info!("User {} online at {}", username, gossip_addr),
        }
        id
    }

    /// Remove the session of `username` unconditionally
    pub fn unregister(&self, username: &str) -> bool {
        self.sessions.lock().remove(username).is_some()
    }

    /// Remove the session of `username` only if it is still `session`
    pub fn unregister_if(&self, username: &str, session: SessionId) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(username) {
            Some(current) if current.id == session => {
                sessions.remove(username);
                true
            }
            _ => false,
        }
    }

    /// Gossip addresses of the given users; offline users are skipped
    pub fn resolve<'a, I>(&self, usernames: I) -> Vec<SocketAddr>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let sessions = self.sessions.lock();
        usernames
            .into_iter()
            .filter_map(|name| sessions.get(name).map(|s| s.gossip_addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Accepts long-lived client handshake connections
pub struct SessionListener {
    registry: Arc<SessionRegistry>,
}

impl SessionListener {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            debug!("Client connection from {}", remote);
                            let this = self.clone();
                            tokio::spawn(async move {
                                this.handle(stream, remote).await;
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

    /// Serve one client connection until it closes or misbehaves, then
    /// drop the sessions it established.
    pub async fn handle(&self, stream: TcpStream, remote: SocketAddr) {
        let mut framed = transport::framed(stream);
        let mut owned: HashMap<String, SessionId> = HashMap::new();

        loop {
            match self.next_auth(&mut framed).await {
                Ok(Some(auth)) => {
                    if auth.username.is_empty() {
                        warn!("Handshake from {} without a username", remote);
                        break;
                    }
                    let id = self
                        .registry
                        .register(&auth.username, remote.ip(), auth.listen_port);
                    owned.insert(auth.username, id);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Client connection from {} failed: {}", remote, e);
                    break;
                }
            }
        }

        for (username, id) in owned {
            if self.registry.unregister_if(&username, id) {
                info!("User {} went offline", username);
            }
        }
    }

    async fn next_auth(
        &self,
        framed: &mut transport::FramedStream,
    ) -> Result<Option<AuthMessage>, TransportError> {
        match transport::next_frame(framed).await? {
            Some(frame) => Ok(Some(frame.into_auth()?)),
            None => Ok(None),
        }
    }
}
