//! Core types for groupcast
//!
//! Wire messages are encoded with postcard (see [`crate::encoding`]); stored
//! documents use the same encoding inside the replica's document store.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

// =============================================================================
// IDENTITY TYPES
// =============================================================================

/// Identity of a replica: the socket address of its HTTP service endpoint.
///
/// This one representation is used end-to-end: membership keys, election
/// input, the leader announcement and the replica's own comparison.
/// Ordering is `SocketAddr` ordering (IP numerically, then port), so every
/// observer that holds the same alive set elects the same winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddress(pub SocketAddr);

impl PeerAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Base URL of the replica's HTTP service
    pub fn service_url(&self) -> String {
        format!("http://{}", self.0)
    }

}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<SocketAddr>()
            .map(Self)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

/// Identifier of a gossip wave.
///
/// Drawn uniformly from the full `u64` range so that two unrelated posts are
/// practically never mistaken for duplicates of each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Liveness of a tracked replica
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Alive,
    Dead,
}

// =============================================================================
// WIRE MESSAGES
// =============================================================================

/// Sent by a replica to the gateway when it comes up.
///
/// The host part of the replica's identity is taken from the observed
/// connection, only the port travels in the message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub base_port: u16,
}

/// Sent by the gateway to every alive replica after an election.
///
/// `term` grows with every election the gateway runs, so a replica can tell
/// a late announcement from an earlier election apart from the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderAnnouncement {
    pub term: u64,
    pub leader: PeerAddress,
}

/// Handshake a client sends once at the start of a long-lived session
/// connection to a replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMessage {
    pub username: String,
    /// Port on which the client accepts gossip connections
    pub listen_port: u16,
}

/// A post travelling through a gossip wave
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: MessageId,
    pub body: String,
    /// Subscribers the receiver may still relay this message to
    pub remaining_targets: Vec<SocketAddr>,
}

impl GossipMessage {
    /// A message that expects no further relay
    pub fn leaf(id: MessageId, body: impl Into<String>) -> Self {
        Self {
            id,
            body: body.into(),
            remaining_targets: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.remaining_targets.is_empty()
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// A registered user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub groups: Vec<String>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
        }
    }
}

/// A post stored under its group
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub author: String,
    pub group: String,
    pub body: String,
}

/// A named group and its subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    #[serde(rename = "groupname")]
    pub name: String,
    pub creator: String,
    #[serde(rename = "groupmates")]
    pub members: Vec<String>,
    pub posts: Vec<Post>,
}

impl Group {
    /// Create a group; the creator is its first member
    pub fn new(name: impl Into<String>, creator: impl Into<String>) -> Self {
        let creator = creator.into();
        Self {
            name: name.into(),
            members: vec![creator.clone()],
            creator,
            posts: Vec::new(),
        }
    }

    /// Add a member; returns false if already present
    pub fn add_member(&mut self, username: &str) -> bool {
        if self.members.iter().any(|m| m == username) {
            return false;
        }
        self.members.push(username.to_string());
        true
    }

    /// Members that should receive a post written by `author`
    pub fn recipients_of<'a>(&'a self, author: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.members
            .iter()
            .map(String::as_str)
            .filter(move |m| *m != author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_order_is_numeric() {
        let a: PeerAddress = "10.0.0.1:8082".parse().unwrap();
        let b: PeerAddress = "10.0.0.2:8082".parse().unwrap();
        let c: PeerAddress = "10.0.0.3:8082".parse().unwrap();
        assert!(a < b && b < c);

        // numeric, not lexicographic
        let nine: PeerAddress = "10.0.0.9:8080".parse().unwrap();
        let ten: PeerAddress = "10.0.0.10:8080".parse().unwrap();
        assert!(nine < ten);
    }

    #[test]
    fn test_group_membership() {
        let mut group = Group::new("cs149", "alice");
        assert!(group.add_member("bob"));
        assert!(!group.add_member("bob"));
        assert!(!group.add_member("alice"));

        let recipients: Vec<&str> = group.recipients_of("alice").collect();
        assert_eq!(recipients, vec!["bob"]);
    }

    #[test]
    fn test_group_json_field_names() {
        let group = Group::new("cs149", "alice");
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["groupname"], "cs149");
        assert_eq!(json["groupmates"][0], "alice");
    }
}
