//! # Gossip Broadcaster
//!
//! Floods a message to every member of a named group exactly once per node.
//! Dedup works on message fingerprints: the fingerprint is recorded *before*
//! any frame is dispatched, so the immediate echo from a neighbour is
//! suppressed even when it races the loopback. Accepting a broadcast emits
//! the delivery event first and then re-enters the flood, which re-checks the
//! dedup store; saturation therefore converges in at most the group's
//! diameter in hops, with at most one delivery event per node per body.
//!
//! ## Fan-out
//!
//! Dispatch runs on a fixed pool of workers over a snapshot of the group's
//! addresses, so the pool never holds a directory lock and mostly absorbs
//! outbound-queue back-pressure. Cancellation mid-fan-out drops individual
//! targets with a debug log; it does not fail the broadcast that already
//! recorded its fingerprint.
//!
//! ## Dedup bound
//!
//! The bundled [`LruSeenStore`] holds the most recent
//! [`DEFAULT_SEEN_CAPACITY`] fingerprints; at-most-once delivery holds within
//! that window. Custom [`SeenStore`] implementations surface their failures
//! as [`Error::BroadcastInternal`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dht::PeerDirectory;
use crate::error::{Error, QueueError};
use crate::event::{Event, EventSender};
use crate::message::{Message, MessageHash, MessageOnTheWire, MessageSender, Variant, Version};
use crate::peer::{GroupID, PeerAddress, PeerID};
use crate::store::StoreError;

/// Fingerprints the default dedup store remembers.
pub const DEFAULT_SEEN_CAPACITY: usize = 65_536;

/// Default fan-out worker count.
pub const DEFAULT_NUM_WORKERS: usize = 8;

/// The broadcaster's dedup store: the set of fingerprints this node has
/// originated or accepted.
pub trait SeenStore: Send + Sync {
    fn seen(&self, hash: &MessageHash) -> Result<bool, StoreError>;

    fn mark(&self, hash: MessageHash) -> Result<(), StoreError>;
}

/// Bounded in-memory dedup store.
pub struct LruSeenStore {
    inner: Mutex<LruCache<MessageHash, ()>>,
}

impl LruSeenStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for LruSeenStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_SEEN_CAPACITY).expect("nonzero capacity"))
    }
}

impl SeenStore for LruSeenStore {
    fn seen(&self, hash: &MessageHash) -> Result<bool, StoreError> {
        // `get` (not `peek`) so surviving entries stay warm in the window.
        Ok(self.inner.lock().get(hash).is_some())
    }

    fn mark(&self, hash: MessageHash) -> Result<(), StoreError> {
        self.inner.lock().put(hash, ());
        Ok(())
    }
}

/// Tuning knobs for a [`Broadcaster`].
#[derive(Clone, Copy, Debug)]
pub struct BroadcasterConfig {
    /// Fan-out worker count.
    pub num_workers: usize,
    /// Capacity of the default dedup store.
    pub seen_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }
}

pub struct Broadcaster<D> {
    num_workers: usize,
    seen: Box<dyn SeenStore>,
    dht: Arc<D>,
    messages: MessageSender,
    events: EventSender,
}

impl<D: PeerDirectory + 'static> Broadcaster<D> {
    pub fn new(
        config: BroadcasterConfig,
        dht: Arc<D>,
        messages: MessageSender,
        events: EventSender,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.seen_capacity.max(1)).expect("clamped above zero");
        Self::with_seen_store(config, Box::new(LruSeenStore::new(capacity)), dht, messages, events)
    }

    /// Use a custom dedup store (for example, one shared across restarts).
    pub fn with_seen_store(
        config: BroadcasterConfig,
        seen: Box<dyn SeenStore>,
        dht: Arc<D>,
        messages: MessageSender,
        events: EventSender,
    ) -> Self {
        Self {
            num_workers: config.num_workers.max(1),
            seen,
            dht,
            messages,
            events,
        }
    }

    /// Flood a body to every member of the group. Re-broadcasting an
    /// already-seen body is a successful no-op.
    pub async fn broadcast(
        &self,
        ctx: &CancellationToken,
        group_id: GroupID,
        body: Vec<u8>,
    ) -> Result<(), Error> {
        let message = Message::broadcast(group_id, body);
        let hash = message.hash();
        if self.already_seen(&hash)? {
            return Ok(());
        }

        let addrs = self.dht.group_addresses(&group_id)?;

        if ctx.is_cancelled() {
            return Err(Error::Broadcasting {
                group: group_id,
                source: QueueError::Cancelled,
            });
        }

        // Record before dispatch so the echo of our own flood is suppressed
        // even if it arrives before the fan-out finishes.
        self.seen
            .mark(hash)
            .map_err(|e| Error::BroadcastInternal(e.to_string()))?;

        self.fan_out(ctx, message, addrs).await;
        Ok(())
    }

    /// Accept a broadcast from a peer: deliver it to the application once,
    /// then keep the flood going.
    pub async fn accept_broadcast(
        &self,
        ctx: &CancellationToken,
        from: PeerID,
        message: Message,
    ) -> Result<(), Error> {
        if message.version != Version::V1 {
            return Err(Error::VersionNotSupported(message.version));
        }
        if message.variant != Variant::Broadcast {
            return Err(Error::VariantNotSupported(message.variant));
        }

        if self.already_seen(&message.hash())? {
            return Ok(());
        }

        // Deliver before re-fanning out, so local observers see the body at
        // least as early as our neighbours do.
        let event = Event::message_received(message.body.clone(), Some(from));
        tokio::select! {
            _ = ctx.cancelled() => {
                return Err(Error::AcceptingBroadcast {
                    source: QueueError::Cancelled,
                });
            }
            sent = self.events.send(event) => {
                if sent.is_err() {
                    return Err(Error::AcceptingBroadcast {
                        source: QueueError::Closed,
                    });
                }
            }
        }

        // Re-entering downgrades the message to this node's version.
        self.broadcast(ctx, message.group_id, message.body).await
    }

    fn already_seen(&self, hash: &MessageHash) -> Result<bool, Error> {
        self.seen
            .seen(hash)
            .map_err(|e| Error::BroadcastInternal(e.to_string()))
    }

    /// Enqueue one frame per address on a pool of `num_workers` workers.
    async fn fan_out(
        &self,
        ctx: &CancellationToken,
        message: Message,
        addrs: Vec<PeerAddress>,
    ) {
        let workers = self.num_workers.min(addrs.len().max(1));
        let mut buckets: Vec<Vec<PeerAddress>> = vec![Vec::new(); workers];
        for (i, addr) in addrs.into_iter().enumerate() {
            buckets[i % workers].push(addr);
        }

        let mut handles = Vec::with_capacity(workers);
        for bucket in buckets {
            if bucket.is_empty() {
                continue;
            }
            let ctx = ctx.clone();
            let messages = self.messages.clone();
            let message = message.clone();
            handles.push(tokio::spawn(async move {
                for to in bucket {
                    let wire = MessageOnTheWire::outbound(to.addr, message.clone());
                    tokio::select! {
                        _ = ctx.cancelled() => {
                            debug!(peer = %to.id, "dropping broadcast target: cancelled");
                        }
                        sent = messages.send(wire) => {
                            if sent.is_err() {
                                debug!(peer = %to.id, "dropping broadcast target: outbound queue closed");
                            }
                        }
                    }
                }
            }));
        }

        for handle in handles {
            // Workers only log per-target failures; join errors would mean a
            // panic inside this module.
            let _ = handle.await;
        }
    }
}
