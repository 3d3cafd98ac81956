//! Gossip receive and relay
//!
//! Every subscriber runs the same relay step on each gossip message it
//! receives: count the sighting, hand the body to the local user the first
//! time, then pass the message on according to the relay plan.

use groupcast_core::dissemination::plan_relay;
use groupcast_core::seen::SeenTable;
use groupcast_core::types::{GossipMessage, MessageId};
use groupcast_net::transport;
use groupcast_net::Disseminator;
use parking_lot::Mutex;
use rand::Rng;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

/// Ports a subscriber may receive gossip on
pub const GOSSIP_PORT_RANGE: RangeInclusive<u16> = 5000..=10000;

/// A post handed to the local user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub id: MessageId,
    pub body: String,
}

/// Relay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub delivered: u64,
    pub relayed: u64,
    pub dropped: u64,
}

/// What happened to one received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub delivered: bool,
    pub relayed_to: usize,
}

/// Duplicate-suppressing gossip relay
pub struct RelayEngine {
    seen: Mutex<SeenTable>,
    disseminator: Disseminator,
    deliveries: mpsc::Sender<Delivered>,
    stats: Mutex<RelayStats>,
}

impl RelayEngine {
    pub fn new(seen: SeenTable, disseminator: Disseminator, deliveries: mpsc::Sender<Delivered>) -> Self {
        Self {
            seen: Mutex::new(seen),
            disseminator,
            deliveries,
            stats: Mutex::new(RelayStats::default()),
        }
    }

    pub fn stats(&self) -> RelayStats {
        *self.stats.lock()
    }

    /// Run the relay step for one received message
    pub async fn handle(&self, message: GossipMessage) -> RelayOutcome {
        let sighting = self.seen.lock().observe(message.id);

        let delivered = sighting.is_first();
        if delivered {
            let delivery = Delivered {
                id: message.id,
                body: message.body.clone(),
            };
            if self.deliveries.send(delivery).await.is_err() {
                debug!("Nobody is reading deliveries, gossip {} not shown", message.id);
            }
        } else {
            debug!("Gossip {} seen {} times", message.id, sighting.count);
        }

        let plan = plan_relay(&message, sighting, &mut rand::thread_rng());
        let report = self.disseminator.dispatch(plan).await;

        let mut stats = self.stats.lock();
        stats.received += 1;
        stats.delivered += u64::from(delivered);
        stats.relayed += report.delivered as u64;
        stats.dropped += report.failed() as u64;

        RelayOutcome {
            delivered,
            relayed_to: report.delivered,
        }
    }

    /// Accept gossip connections until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            let this = self.clone();
                            tokio::spawn(async move {
                                this.handle_connection(stream, remote).await;
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

    async fn handle_connection(&self, stream: TcpStream, remote: SocketAddr) {
        let mut framed = transport::framed(stream);
        loop {
            match transport::next_frame(&mut framed).await {
                Ok(Some(frame)) => match frame.into_gossip() {
                    Ok(message) => {
                        self.handle(message).await;
                    }
                    Err(e) => {
                        warn!("Bad gossip from {}: {}", remote, e);
                        break;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Gossip connection from {} failed: {}", remote, e);
                    break;
                }
            }
        }
    }
}

/// Bind the gossip listener on a random port from `range`
pub async fn bind_gossip_listener(
    host: IpAddr,
    range: RangeInclusive<u16>,
    attempts: usize,
) -> io::Result<TcpListener> {
    let mut last_error = io::Error::new(io::ErrorKind::AddrNotAvailable, "no port tried");
    for _ in 0..attempts.max(1) {
        let port = rand::thread_rng().gen_range(range.clone());
        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("Gossip port {} unavailable: {}", port, e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupcast_core::dissemination::plan_root_fanout;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn engine() -> (RelayEngine, mpsc::Receiver<Delivered>) {
        let (tx, rx) = mpsc::channel(16);
        let engine = RelayEngine::new(
            SeenTable::default(),
            Disseminator::new(Duration::from_millis(500)),
            tx,
        );
        (engine, rx)
    }

    #[tokio::test]
    async fn test_duplicate_is_delivered_once() {
        let (engine, mut rx) = engine();
        let message = GossipMessage::leaf(MessageId(42), "hello");

        assert!(engine.handle(message.clone()).await.delivered);
        assert!(!engine.handle(message).await.delivered);

        assert_eq!(rx.recv().await.unwrap().body, "hello");
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.stats().received, 2);
        assert_eq!(engine.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_unreachable_next_hops_are_dropped() {
        let (engine, mut rx) = engine();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = closed.local_addr().unwrap();
        drop(closed);

        let message = GossipMessage {
            id: MessageId(7),
            body: "hi".into(),
            remaining_targets: vec![dead],
        };
        let outcome = engine.handle(message).await;

        assert_eq!(outcome, RelayOutcome { delivered: true, relayed_to: 0 });
        assert_eq!(engine.stats().dropped, 1);
        assert_eq!(rx.recv().await.unwrap().id, MessageId(7));
    }

    #[tokio::test]
    async fn test_wave_reaches_every_subscriber_once() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut addrs = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            addrs.push(listener.local_addr().unwrap());
            let (engine, rx) = engine();
            tokio::spawn(Arc::new(engine).serve(listener, shutdown_tx.subscribe()));
            receivers.push(rx);
        }

        let plan = plan_root_fanout(&addrs, MessageId(99), "hello");
        let report = Disseminator::default().dispatch(plan).await;
        assert_eq!(report.delivered, 2);

        for rx in receivers.iter_mut() {
            let delivered = timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(delivered.body, "hello");
        }

        // let the wave settle, then make sure nobody got it twice
        sleep(Duration::from_millis(300)).await;
        for rx in receivers.iter_mut() {
            assert!(rx.try_recv().is_err());
        }
        shutdown_tx.send(()).ok();
    }

    #[tokio::test]
    async fn test_gossip_port_from_range() {
        let listener = bind_gossip_listener("127.0.0.1".parse().unwrap(), GOSSIP_PORT_RANGE, 32)
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(GOSSIP_PORT_RANGE.contains(&port));
    }
}
