//! Fixed port layout of a replica
//!
//! A replica is identified by its service endpoint `host:base`. Its other
//! listeners sit at fixed offsets from the base port.

use groupcast_core::types::PeerAddress;
use std::net::SocketAddr;

/// Offset of the client session (handshake) listener
pub const SESSION_OFFSET: u16 = 1;

/// Offset of the control listener (health probes and leader announcements)
pub const CONTROL_OFFSET: u16 = 2;

/// Port roles of a replica relative to its base port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortLayout {
    pub session_offset: u16,
    pub control_offset: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            session_offset: SESSION_OFFSET,
            control_offset: CONTROL_OFFSET,
        }
    }
}

impl PortLayout {
    pub fn session_port(&self, base_port: u16) -> Option<u16> {
        base_port.checked_add(self.session_offset)
    }

    pub fn control_port(&self, base_port: u16) -> Option<u16> {
        base_port.checked_add(self.control_offset)
    }

    /// Where a replica accepts client handshakes
    pub fn session_addr(&self, peer: &PeerAddress) -> Option<SocketAddr> {
        let addr = peer.socket_addr();
        self.session_port(addr.port())
            .map(|port| SocketAddr::new(addr.ip(), port))
    }

    /// Where a replica accepts probes and leader announcements
    pub fn control_addr(&self, peer: &PeerAddress) -> Option<SocketAddr> {
        let addr = peer.socket_addr();
        self.control_port(addr.port())
            .map(|port| SocketAddr::new(addr.ip(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = PortLayout::default();
        let peer: PeerAddress = "10.0.0.3:8080".parse().unwrap();

        assert_eq!(
            layout.session_addr(&peer),
            Some("10.0.0.3:8081".parse().unwrap())
        );
        assert_eq!(
            layout.control_addr(&peer),
            Some("10.0.0.3:8082".parse().unwrap())
        );
    }

    #[test]
    fn test_overflow_is_reported() {
        let layout = PortLayout::default();
        let peer: PeerAddress = "10.0.0.3:65535".parse().unwrap();
        assert_eq!(layout.control_addr(&peer), None);
        assert_eq!(layout.session_addr(&peer), None);
    }
}
