//! Message framing for network transport
//!
//! Provides length-prefixed framing for every TCP message exchanged between
//! the gateway, replicas and subscribers.

use bytes::{Buf, BufMut, BytesMut};
use groupcast_core::encoding;
use groupcast_core::types::{AuthMessage, GossipMessage, LeaderAnnouncement, Registration};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (1 MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Largest post body accepted for gossip; the rest of the frame is left for
/// the relay target list.
pub const MAX_GOSSIP_BODY: usize = MAX_FRAME_SIZE / 2;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("Empty frame")]
    Empty,
    #[error("Unknown frame type: {0}")]
    UnknownType(u8),
    #[error("Unexpected frame type: expected {expected:?}, got {actual:?}")]
    UnexpectedType {
        expected: FrameType,
        actual: FrameType,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Payload error: {0}")]
    Payload(#[from] groupcast_core::Error),
}

/// A framed message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Frame types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Replica registering with the gateway
    Register = 1,
    /// Client session handshake
    Auth = 2,
    /// Gossip message
    Gossip = 3,
    /// Leader announcement with its election term
    LeaderAnnounce = 4,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Register),
            2 => Ok(Self::Auth),
            3 => Ok(Self::Gossip),
            4 => Ok(Self::LeaderAnnounce),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// Codec for length-prefixed frames
///
/// Wire format:
/// - 4 bytes: length (big-endian, includes type byte)
/// - 1 byte: frame type
/// - N bytes: payload
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length == 0 {
            return Err(FrameError::Empty);
        }
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame_type = FrameType::try_from(src[0])?;
        src.advance(1);

        let payload = src.split_to(length - 1).to_vec();

        Ok(Some(Frame { frame_type, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = 1 + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.frame_type as u8);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

impl Frame {
    /// Create a new frame
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, payload }
    }

    pub fn register(registration: &Registration) -> Result<Self, FrameError> {
        Ok(Self::new(FrameType::Register, encoding::encode(registration)?))
    }

    pub fn auth(auth: &AuthMessage) -> Result<Self, FrameError> {
        Ok(Self::new(FrameType::Auth, encoding::encode(auth)?))
    }

    pub fn gossip(message: &GossipMessage) -> Result<Self, FrameError> {
        Ok(Self::new(FrameType::Gossip, encoding::encode(message)?))
    }

    pub fn leader_announce(announcement: &LeaderAnnouncement) -> Result<Self, FrameError> {
        Ok(Self::new(FrameType::LeaderAnnounce, encoding::encode(announcement)?))
    }

    fn expect(&self, expected: FrameType) -> Result<(), FrameError> {
        if self.frame_type != expected {
            return Err(FrameError::UnexpectedType {
                expected,
                actual: self.frame_type,
            });
        }
        Ok(())
    }

    pub fn into_registration(self) -> Result<Registration, FrameError> {
        self.expect(FrameType::Register)?;
        Ok(encoding::decode(&self.payload)?)
    }

    pub fn into_auth(self) -> Result<AuthMessage, FrameError> {
        self.expect(FrameType::Auth)?;
        Ok(encoding::decode(&self.payload)?)
    }

    pub fn into_gossip(self) -> Result<GossipMessage, FrameError> {
        self.expect(FrameType::Gossip)?;
        Ok(encoding::decode(&self.payload)?)
    }

    pub fn into_leader(self) -> Result<LeaderAnnouncement, FrameError> {
        self.expect(FrameType::LeaderAnnounce)?;
        Ok(encoding::decode(&self.payload)?)
    }
}
