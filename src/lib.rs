//! # Meshwire - Peer-to-Peer Messaging Substrate
//!
//! Meshwire is a decentralised overlay networking library. A node can ping
//! and discover peers, unicast a message to a known peer ("cast"),
//! gossip-broadcast a message to every member of a named group with
//! deduplication, and establish mutually authenticated sessions with an
//! encrypted challenge exchange.
//!
//! ## Architecture
//!
//! The subsystems are composed by three bounded queues rather than by direct
//! calls:
//!
//! - **outbound queue**: frames produced by the core, consumed by the dialer
//! - **inbound queue**: frames read off authenticated connections, consumed
//!   by the router
//! - **event queue**: semantic events (deliveries, peer changes) consumed by
//!   the application
//!
//! Full queues apply back-pressure; every blocking enqueue is cancellable
//! through a [`tokio_util::sync::CancellationToken`] and turns cancellation
//! into a typed error instead of spinning.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `peer` | Peer and group identifiers, addresses with freshness nonces |
//! | `message` | Wire records, framing, fingerprints, the queue envelope |
//! | `event` | Events surfaced to the application |
//! | `signer` | Sign/verify capability and the Ed25519 implementation |
//! | `dht` | Thread-safe peer-address directory with optional persistence |
//! | `store` | Key-value backing tables (memory, sled) |
//! | `handshake` | Signed RSA challenge exchange binding sessions to peers |
//! | `pingpong` | Address announcement, learning, and propagation |
//! | `cast` | Unicast delivery |
//! | `broadcast` | Deduplicating group flood |
//! | `tcp` | Accept loop and dialer bridging queues to sockets |
//! | `router` | Variant dispatch of inbound messages |

pub mod broadcast;
pub mod cast;
pub mod dht;
pub mod error;
pub mod event;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod pingpong;
pub mod router;
pub mod signer;
pub mod store;
pub mod tcp;

pub use broadcast::{Broadcaster, BroadcasterConfig};
pub use cast::Caster;
pub use dht::{Dht, PeerDirectory};
pub use error::{Error, QueueError, WireError};
pub use event::{event_queue, Event, EventReceiver, EventSender};
pub use handshake::{HandshakeError, Handshaker};
pub use message::{
    message_queue, Message, MessageOnTheWire, MessageReceiver, MessageSender, Variant, Version,
};
pub use peer::{GroupID, PeerAddress, PeerID};
pub use pingpong::PingPonger;
pub use router::Router;
pub use signer::{Ed25519SignVerifier, Keypair, SignVerifier};
pub use store::{MemTable, SledTable, Table};
