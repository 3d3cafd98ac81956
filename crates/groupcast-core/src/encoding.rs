//! Payload encoding for groupcast
//!
//! Structured TCP payloads and stored documents are postcard-encoded. Field
//! order is Rust struct field order, so changing a struct changes the wire.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serialize a value to payload bytes
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(Error::from)
}

/// Deserialize payload bytes
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    #[test]
    fn test_gossip_message_survives_encoding() {
        let message = GossipMessage {
            id: MessageId(u64::MAX - 1),
            body: "hello".into(),
            remaining_targets: vec![
                "127.0.0.1:5001".parse().unwrap(),
                "[::1]:5002".parse().unwrap(),
            ],
        };
        let bytes = encode(&message).unwrap();
        assert_eq!(decode::<GossipMessage>(&bytes).unwrap(), message);
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let auth = AuthMessage {
            username: "alice".into(),
            listen_port: 7000,
        };
        let bytes = encode(&auth).unwrap();
        let err = decode::<AuthMessage>(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
