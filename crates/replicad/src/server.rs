//! replicad server - listeners, gateway registration and the HTTP service

use crate::config::Config;
use crate::handlers::{router, AppState};
use crate::leadership::{ControlListener, LeaderFlag};
use crate::sessions::{SessionListener, SessionRegistry};
use crate::storage::{Storage, StorageError};
use groupcast_core::types::Registration;
use groupcast_net::{transport, Disseminator, Frame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Bound on one registration attempt and on a control connection's frame
const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Base port {0} leaves no room for the derived ports")]
    PortRange(u16),
}

/// The three listeners of a replica
pub struct Listeners {
    pub service: TcpListener,
    pub session: TcpListener,
    pub control: TcpListener,
}

/// Replica server state
pub struct Server {
    config: Config,
    storage: Arc<Storage>,
    sessions: Arc<SessionRegistry>,
    leader: Arc<LeaderFlag>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            storage,
            sessions: Arc::new(SessionRegistry::new()),
            leader: Arc::new(LeaderFlag::new()),
            shutdown_tx,
        })
    }

    pub fn leader(&self) -> Arc<LeaderFlag> {
        self.leader.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    /// Bind service, session and control listeners; any failure is fatal
    pub async fn bind(&self) -> Result<Listeners, ServerError> {
        let base = self.config.base_port;
        let session = self.config.session_addr().ok_or(ServerError::PortRange(base))?;
        let control = self.config.control_addr().ok_or(ServerError::PortRange(base))?;

        Ok(Listeners {
            service: bind(self.config.service_addr()).await?,
            session: bind(session).await?,
            control: bind(control).await?,
        })
    }

    /// Run until [`Server::shutdown`] is called
    pub async fn run(&self) -> Result<(), ServerError> {
        let listeners = self.bind().await?;
        self.serve(listeners).await
    }

    /// Serve on already bound listeners
    pub async fn serve(&self, listeners: Listeners) -> Result<(), ServerError> {
        info!("Service listening on {}", listeners.service.local_addr()?);
        info!("Client sessions on {}", listeners.session.local_addr()?);
        info!("Control on {}", listeners.control.local_addr()?);

        let control = Arc::new(ControlListener::new(
            self.leader.clone(),
            self.config.base_port,
            CONTROL_TIMEOUT,
        ));
        let control_handle =
            tokio::spawn(control.serve(listeners.control, self.shutdown_tx.subscribe()));

        let sessions = Arc::new(SessionListener::new(self.sessions.clone()));
        let session_handle =
            tokio::spawn(sessions.serve(listeners.session, self.shutdown_tx.subscribe()));

        let register_handle = tokio::spawn(register_with_gateway(
            self.config.gateway,
            self.config.base_port,
            self.config.register_retry(),
            self.shutdown_tx.subscribe(),
        ));

        let state = AppState {
            storage: self.storage.clone(),
            sessions: self.sessions.clone(),
            leader: self.leader.clone(),
            disseminator: Disseminator::new(self.config.gossip_timeout()),
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let result = axum::serve(listeners.service, router(state))
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await.ok();
            })
            .await;

        info!("Shutting down...");
        control_handle.abort();
        session_handle.abort();
        register_handle.abort();

        // Flush storage
        self.storage.flush()?;
        result?;
        Ok(())
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Announce this replica to the gateway, retrying until it succeeds.
///
/// Returns true once registered, false if shut down first.
pub async fn register_with_gateway(
    gateway: SocketAddr,
    base_port: u16,
    retry: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> bool {
    loop {
        let result = match Frame::register(&Registration { base_port }) {
            Ok(frame) => transport::send_frame(gateway, frame, CONTROL_TIMEOUT).await,
            Err(e) => {
                error!("Cannot encode registration: {}", e);
                return false;
            }
        };

        match result {
            Ok(()) => {
                info!("Registered with gateway {}", gateway);
                return true;
            }
            Err(e) => warn!(
                "Registration with gateway {} failed, retrying in {:?}: {}",
                gateway, retry, e
            ),
        }

        tokio::select! {
            _ = sleep(retry) => {}
            _ = shutdown.recv() => return false,
        }
    }
}
