//! gatewayd server - wires the listeners and background tasks together

use crate::config::Config;
use crate::election::LeaderElector;
use crate::health::HealthMonitor;
use crate::membership::MembershipTracker;
use crate::registration::RegistrationListener;
use crate::router::{router, GatewayState};
use groupcast_net::PortLayout;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Gateway server state
pub struct Server {
    config: Config,
    membership: Arc<MembershipTracker>,
    elector: Arc<LeaderElector>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let layout = PortLayout::default();
        let membership = Arc::new(MembershipTracker::new());
        let elector = Arc::new(LeaderElector::new(
            membership.clone(),
            layout,
            config.announce_timeout(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            membership,
            elector,
            shutdown_tx,
        }
    }

    pub fn membership(&self) -> Arc<MembershipTracker> {
        self.membership.clone()
    }

    pub fn elector(&self) -> Arc<LeaderElector> {
        self.elector.clone()
    }

    /// Bind both listeners; either failing is fatal
    pub async fn bind(&self) -> Result<(TcpListener, TcpListener), ServerError> {
        let http = bind(self.config.listen).await?;
        let registration = bind(self.config.registration).await?;
        Ok((http, registration))
    }

    /// Run until [`Server::shutdown`] is called
    pub async fn run(&self) -> Result<(), ServerError> {
        let (http, registration) = self.bind().await?;
        self.serve(http, registration).await
    }

    /// Serve on already bound listeners
    pub async fn serve(
        &self,
        http: TcpListener,
        registration: TcpListener,
    ) -> Result<(), ServerError> {
        info!("Serving clients on {}", http.local_addr()?);
        info!("Accepting replica registrations on {}", registration.local_addr()?);

        // empty on a fresh start, but establishes the initial state
        self.elector.run_election().await;

        let registrations = Arc::new(RegistrationListener::new(
            self.membership.clone(),
            self.elector.clone(),
            self.config.probe_timeout(),
        ));
        let registration_handle =
            tokio::spawn(registrations.serve(registration, self.shutdown_tx.subscribe()));

        let monitor = Arc::new(HealthMonitor::new(
            self.membership.clone(),
            self.elector.clone(),
            PortLayout::default(),
            self.config.health_interval(),
            self.config.probe_timeout(),
        ));
        let health_handle = tokio::spawn(monitor.run(self.shutdown_tx.subscribe()));

        let state = GatewayState::new(
            self.membership.clone(),
            self.elector.clone(),
            self.config.forward_timeout(),
            self.config.replication_timeout(),
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let result = axum::serve(http, router(state))
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await.ok();
            })
            .await;

        info!("Shutting down...");
        registration_handle.abort();
        health_handle.abort();
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use groupcast_core::types::Registration;
    use groupcast_net::{transport, Frame};
    use std::time::Duration;

    fn test_config() -> Config {
        Config::parse_from([
            "gatewayd",
            "--listen",
            "127.0.0.1:0",
            "--registration",
            "127.0.0.1:0",
            "--probe-timeout-ms",
            "200",
            "--announce-timeout-ms",
            "200",
        ])
    }

    #[tokio::test]
    async fn test_bind_conflict_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config();
        config.registration = taken.local_addr().unwrap();

        let server = Server::new(config);
        assert!(matches!(server.bind().await, Err(ServerError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_registration_elects_and_shutdown_stops() {
        let server = Arc::new(Server::new(test_config()));
        let (http, registration) = server.bind().await.unwrap();
        let registration_addr = registration.local_addr().unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(http, registration).await });

        let frame = Frame::register(&Registration { base_port: 18180 }).unwrap();
        transport::send_frame(registration_addr, frame, Duration::from_secs(1))
            .await
            .unwrap();

        let expected = "127.0.0.1:18180".parse().unwrap();
        for _ in 0..50 {
            if server.elector().leader() == Some(expected) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.elector().leader(), Some(expected));
        assert_eq!(server.membership().len(), 1);

        server.shutdown();
        handle.await.unwrap().unwrap();
    }
}
