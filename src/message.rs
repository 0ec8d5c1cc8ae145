//! # Wire Protocol Messages
//!
//! One record type travels between peers: [`Message`], a versioned, tagged
//! frame carrying an opaque body and (for broadcasts) the target group.
//! Records are serialized with bincode under a size limit and framed on the
//! stream as `length:u32 LE ∥ record`, so a reader always consumes exactly
//! one record.
//!
//! ## Fingerprints
//!
//! [`Message::hash`] is `blake3(record bytes)`. Hashing the serialized record
//! rather than the body means identical bodies under different variants or
//! groups produce distinct fingerprints, which is what the broadcast dedup
//! store keys on.
//!
//! ## Security Limits
//!
//! - `MAX_BODY_SIZE`: largest accepted message body (1 MiB)
//! - `MAX_RECORD_SIZE`: deserialization bound, body plus framing overhead
//!
//! All deserialization goes through bincode options with `with_limit`; a
//! length prefix above the bound is rejected before any allocation.

use std::fmt;
use std::net::SocketAddr;

use bincode::Options;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::WireError;
use crate::peer::{GroupID, PeerID};

/// Maximum size of a message body (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Maximum size of a serialized record. Slightly larger than the body bound
/// to allow for the version, variant, and group fields.
pub const MAX_RECORD_SIZE: u32 = (MAX_BODY_SIZE as u32) + 1024;

/// Fingerprint of a serialized message record. Stable across processes;
/// the dedup store uses it as its key.
pub type MessageHash = [u8; 32];

fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_RECORD_SIZE as u64)
        .with_fixint_encoding()
}

/// Protocol version carried by every message.
///
/// Kept open (not an enum) so that records from newer nodes still decode and
/// can be rejected with a typed error naming the version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub u16);

impl Version {
    pub const V1: Version = Version(1);
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Message variant. The router selects the accepting subsystem by this tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    Ping,
    Pong,
    Cast,
    Broadcast,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Ping => f.write_str("ping"),
            Variant::Pong => f.write_str("pong"),
            Variant::Cast => f.write_str("cast"),
            Variant::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// A single on-wire message record.
///
/// `group_id` is only meaningful for [`Variant::Broadcast`]; the other
/// variants carry [`GroupID::NIL`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub version: Version,
    pub variant: Variant,
    pub group_id: GroupID,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(version: Version, variant: Variant, group_id: GroupID, body: Vec<u8>) -> Self {
        Self {
            version,
            variant,
            group_id,
            body,
        }
    }

    pub fn ping(body: Vec<u8>) -> Self {
        Self::new(Version::V1, Variant::Ping, GroupID::NIL, body)
    }

    pub fn pong(body: Vec<u8>) -> Self {
        Self::new(Version::V1, Variant::Pong, GroupID::NIL, body)
    }

    pub fn cast(body: Vec<u8>) -> Self {
        Self::new(Version::V1, Variant::Cast, GroupID::NIL, body)
    }

    pub fn broadcast(group_id: GroupID, body: Vec<u8>) -> Self {
        Self::new(Version::V1, Variant::Broadcast, group_id, body)
    }

    /// Serialize the record (without the length prefix).
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        codec_options()
            .serialize(self)
            .map_err(|e| WireError::Malformed(e.to_string()))
    }

    /// Bounded deserialization of a record.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        codec_options()
            .deserialize(bytes)
            .map_err(|e| WireError::Malformed(e.to_string()))
    }

    /// Deterministic fingerprint over the serialized record.
    pub fn hash(&self) -> MessageHash {
        // Same encoding as `encode` but without the read-side size limit, so
        // fingerprinting cannot fail.
        let bytes = bincode::serialize(self).expect("in-memory records always serialize");
        *blake3::hash(&bytes).as_bytes()
    }

    /// Consume one framed record from the stream.
    pub async fn read_from<R>(r: &mut R) -> Result<Self, WireError>
    where
        R: AsyncRead + Unpin,
    {
        let len = r.read_u32_le().await?;
        if len > MAX_RECORD_SIZE {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_RECORD_SIZE,
            });
        }
        let mut buf = vec![0u8; len as usize];
        r.read_exact(&mut buf).await?;
        Self::decode(&buf)
    }

    /// Emit one framed record onto the stream.
    pub async fn write_to<W>(&self, w: &mut W) -> Result<(), WireError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.encode()?;
        w.write_u32_le(bytes.len() as u32).await?;
        w.write_all(&bytes).await?;
        Ok(())
    }
}

/// Routing envelope used on both the outbound and the inbound queue.
///
/// `to` is set by producers of outbound traffic; `from` is set by the
/// transport once the sending peer has been authenticated.
#[derive(Clone, Debug)]
pub struct MessageOnTheWire {
    pub from: Option<PeerID>,
    pub to: Option<SocketAddr>,
    pub message: Message,
}

impl MessageOnTheWire {
    /// Envelope for the outbound queue.
    pub fn outbound(to: SocketAddr, message: Message) -> Self {
        Self {
            from: None,
            to: Some(to),
            message,
        }
    }

    /// Envelope for the inbound queue.
    pub fn inbound(from: Option<PeerID>, message: Message) -> Self {
        Self {
            from,
            to: None,
            message,
        }
    }
}

/// Producer half of a message queue.
pub type MessageSender = mpsc::Sender<MessageOnTheWire>;

/// Consumer half of a message queue.
pub type MessageReceiver = mpsc::Receiver<MessageOnTheWire>;

/// Create a bounded message queue. Full queues apply back-pressure to the
/// core, which suspends with cancellation.
pub fn message_queue(capacity: usize) -> (MessageSender, MessageReceiver) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_group() -> GroupID {
        GroupID::from_bytes([3u8; 32])
    }

    #[test]
    fn record_roundtrip() {
        let messages = vec![
            Message::ping(b"ping body".to_vec()),
            Message::pong(vec![]),
            Message::cast(vec![0xAA; 64]),
            Message::broadcast(sample_group(), vec![0x01, 0x02]),
        ];

        for msg in messages {
            let bytes = msg.encode().unwrap();
            let decoded = Message::decode(&bytes).unwrap();
            assert_eq!(msg, decoded);
            // Re-encoding is byte-stable.
            assert_eq!(decoded.encode().unwrap(), bytes);
        }
    }

    #[test]
    fn hash_distinguishes_variants() {
        let cast = Message::cast(vec![0x01]);
        let broadcast = Message::broadcast(GroupID::NIL, vec![0x01]);
        assert_ne!(cast.hash(), broadcast.hash());

        let other_group = Message::broadcast(sample_group(), vec![0x01]);
        assert_ne!(broadcast.hash(), other_group.hash());
    }

    #[test]
    fn hash_is_deterministic() {
        let a = Message::broadcast(sample_group(), vec![1, 2, 3]);
        let b = Message::broadcast(sample_group(), vec![1, 2, 3]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Message::decode(&[0xFF, 0x00, 0x17]).is_err());
    }

    #[tokio::test]
    async fn framed_roundtrip() {
        let msg = Message::broadcast(sample_group(), b"framed".to_vec());

        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Message::read_from(&mut cursor).await.unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn framed_reads_consume_exactly_one_record() {
        let first = Message::ping(b"one".to_vec());
        let second = Message::cast(b"two".to_vec());

        let mut buf = Vec::new();
        first.write_to(&mut buf).await.unwrap();
        second.write_to(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(Message::read_from(&mut cursor).await.unwrap(), first);
        assert_eq!(Message::read_from(&mut cursor).await.unwrap(), second);
    }

    #[tokio::test]
    async fn oversized_frame_rejected_before_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_RECORD_SIZE + 1).to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        match Message::read_from(&mut cursor).await {
            Err(WireError::FrameTooLarge { .. }) => {}
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_frame_is_io_error() {
        let msg = Message::cast(b"truncated".to_vec());
        let mut buf = Vec::new();
        msg.write_to(&mut buf).await.unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            Message::read_from(&mut cursor).await,
            Err(WireError::Io(_))
        ));
    }
}
