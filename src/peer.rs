//! # Peer Identifiers and Addresses
//!
//! Core addressing types shared by every subsystem:
//!
//! - [`PeerID`]: opaque 32-byte identifier of a node. For nodes backed by the
//!   bundled Ed25519 signer this is the public key (identity = public key),
//!   but the directory and the queues treat it as an opaque value.
//! - [`GroupID`]: application-named subset of peers. [`GroupID::NIL`] is the
//!   distinguished "all known peers" group.
//! - [`PeerAddress`]: a peer's routable network address together with a
//!   monotonic nonce. Higher nonce wins; this is the only freshness rule the
//!   directory applies.
//!
//! Addresses are serialized with the same bounded bincode configuration used
//! by the wire codec, both for the persistent backing table and for the
//! ping/pong message bodies.

use std::fmt;
use std::net::SocketAddr;

use bincode::Options;
use serde::{Deserialize, Serialize};

/// Maximum encoded size of a [`PeerAddress`] record.
/// Bounds deserialization of untrusted ping/pong bodies.
const MAX_PEER_ADDRESS_SIZE: u64 = 512;

fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PEER_ADDRESS_SIZE)
        .with_fixint_encoding()
}

/// Stable identifier of a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerID([u8; 32]);

impl PeerID {
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for PeerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerID({})", &hex::encode(self.0)[..16])
    }
}

/// Application-named subset of peers.
///
/// The all-zero value is [`GroupID::NIL`], meaning "every peer the directory
/// currently knows". Named groups must not use it; see
/// [`crate::dht::PeerDirectory::add_group`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupID([u8; 32]);

impl GroupID {
    /// The distinguished "all known peers" group.
    pub const NIL: GroupID = GroupID([0u8; 32]);

    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for GroupID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for GroupID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupID({})", &hex::encode(self.0)[..16])
    }
}

/// A peer's identity, routable address, and freshness nonce.
///
/// Two addresses for the same peer are ordered by nonce alone; senders bump
/// the nonce (typically a millisecond timestamp) whenever their address
/// changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub id: PeerID,
    pub addr: SocketAddr,
    pub nonce: u64,
}

impl PeerAddress {
    pub fn new(id: PeerID, addr: SocketAddr, nonce: u64) -> Self {
        Self { id, addr, nonce }
    }

    /// Whether this address supersedes `other`. A missing `other` is always
    /// older.
    pub fn is_newer(&self, other: Option<&PeerAddress>) -> bool {
        match other {
            None => true,
            Some(prev) => self.nonce > prev.nonce,
        }
    }

    /// Serialize for the backing table and for ping/pong bodies.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        codec_options().serialize(self)
    }

    /// Bounded deserialization of an encoded address.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        codec_options().deserialize(bytes)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.id, self.addr, self.nonce)
    }
}
