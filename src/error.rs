//! Error types for overlay operations.
//!
//! The crate keeps three error surfaces:
//!
//! - [`Error`]: directory misses, inbound validation failures, and queue
//!   operations that were cancelled or hit a closed consumer
//! - [`WireError`]: message codec failures (framing and I/O)
//! - [`crate::handshake::HandshakeError`]: session authentication failures,
//!   defined next to the handshake engine
//!
//! Validation errors and lookup misses are returned to the caller unchanged;
//! cancellation is wrapped in an operation-specific variant carrying the peer
//! or group it interrupted.

use thiserror::Error;

use crate::message::{Variant, Version};
use crate::peer::{GroupID, PeerID};
use crate::store::StoreError;

/// Cause of a failed enqueue onto the outbound or event queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The caller's cancellation token fired before the queue accepted the
    /// item.
    #[error("operation cancelled")]
    Cancelled,
    /// The consuming side of the queue is gone.
    #[error("queue closed")]
    Closed,
}

/// Errors that can occur across the directory, discovery, cast, and
/// broadcast subsystems.
#[derive(Debug, Error)]
pub enum Error {
    // ===== Directory =====
    /// Required lookup missed the directory.
    #[error("peer={0} not found")]
    PeerNotFound(PeerID),

    /// Named group is not in the directory.
    #[error("peer group={0} not found")]
    GroupNotFound(GroupID),

    /// The nil group was used where a named group is required.
    #[error("invalid group id: nil group cannot be named")]
    InvalidGroupId,

    /// The persistent backing table failed; the in-memory index was left
    /// untouched.
    #[error("backing store: {0}")]
    BackingStore(#[from] StoreError),

    // ===== Inbound validation =====
    /// Message version is not supported by this node.
    #[error("message version={0} not supported")]
    VersionNotSupported(Version),

    /// Message variant does not match the accepting subsystem.
    #[error("message variant={0} not supported")]
    VariantNotSupported(Variant),

    /// A ping or pong body did not decode to a peer address.
    #[error("decoding peer address: {0}")]
    DecodingPeerAddress(String),

    // ===== Queue operations =====
    /// Ping enqueue failed.
    #[error("pinging peer={peer}: {source}")]
    Pinging { peer: PeerID, source: QueueError },

    /// Cast enqueue failed.
    #[error("casting to peer={peer}: {source}")]
    Casting { peer: PeerID, source: QueueError },

    /// Broadcast was cancelled before dispatch.
    #[error("broadcasting to group={group}: {source}")]
    Broadcasting { group: GroupID, source: QueueError },

    /// Accepted broadcast could not emit its event.
    #[error("accepting broadcast: {source}")]
    AcceptingBroadcast { source: QueueError },

    /// Accepted cast could not emit its event.
    #[error("accepting cast: {source}")]
    AcceptingCast { source: QueueError },

    /// The broadcast dedup store failed.
    #[error("internal broadcast error: {0}")]
    BroadcastInternal(String),

    // ===== Transport =====
    /// A frame on an accepted connection did not parse. Logged by the
    /// transport; the connection continues serving.
    #[error("reading incoming message: {0}")]
    ReadingIncomingMessage(String),
}

/// Message codec failures, surfaced by [`crate::message::Message::read_from`]
/// and the transport loops.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame length prefix exceeds the codec bound.
    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: u32, max: u32 },

    /// Frame bytes did not decode to a message record.
    #[error("malformed message record: {0}")]
    Malformed(String),

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
