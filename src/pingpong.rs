//! # Ping/Pong Peer Discovery
//!
//! The discovery protocol by which a node announces its own address and
//! learns the addresses of others:
//!
//! - `ping` sends self's address to one known peer
//! - accepting a fresh ping answers with a pong (self's address) and
//!   propagates the pinger's address to every peer this node knows
//! - accepting a pong records the responder's address
//!
//! All address knowledge flows through the directory's newer-wins update
//! rule, so replayed or reordered pings cannot roll an address back. Every
//! change to the directory emits a [`Event::PeerChanged`] after the write, so
//! event observers never race the directory.
//!
//! Propagation goes through the outbound queue rather than direct socket
//! writes; it inherits the transport's back-pressure and timeout isolation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dht::PeerDirectory;
use crate::error::{Error, QueueError};
use crate::event::{Event, EventSender};
use crate::message::{Message, MessageOnTheWire, MessageSender};
use crate::peer::{PeerAddress, PeerID};

pub struct PingPonger<D> {
    dht: Arc<D>,
    messages: MessageSender,
    events: EventSender,
}

impl<D: PeerDirectory> PingPonger<D> {
    pub fn new(dht: Arc<D>, messages: MessageSender, events: EventSender) -> Self {
        Self {
            dht,
            messages,
            events,
        }
    }

    /// Announce self to a known peer. Fails with [`Error::PeerNotFound`] when
    /// the directory has no address for it.
    pub async fn ping(&self, ctx: &CancellationToken, to: PeerID) -> Result<(), Error> {
        let peer_addr = self.dht.peer_address(&to)?;
        let body = self.encoded_me()?;
        let wire = MessageOnTheWire::outbound(peer_addr.addr, Message::ping(body));

        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Pinging {
                peer: to,
                source: QueueError::Cancelled,
            }),
            sent = self.messages.send(wire) => sent.map_err(|_| Error::Pinging {
                peer: to,
                source: QueueError::Closed,
            }),
        }
    }

    /// Handle a ping: learn the pinger's address and, when it was news, pong
    /// back and spread the word.
    pub async fn accept_ping(
        &self,
        ctx: &CancellationToken,
        message: Message,
    ) -> Result<(), Error> {
        let peer_addr = PeerAddress::decode(&message.body)
            .map_err(|e| Error::DecodingPeerAddress(e.to_string()))?;

        let did_update = self.update_peer_address(ctx, peer_addr).await?;
        if !did_update {
            // Stale announcement; nothing to answer or spread.
            return Ok(());
        }

        self.pong(ctx, &peer_addr).await?;

        // Propagating re-frames the body under this node's version.
        self.propagate_ping(ctx, message.body).await
    }

    /// Handle a pong: record the responder's address.
    pub async fn accept_pong(
        &self,
        ctx: &CancellationToken,
        message: Message,
    ) -> Result<(), Error> {
        let peer_addr = PeerAddress::decode(&message.body)
            .map_err(|e| Error::DecodingPeerAddress(e.to_string()))?;
        self.update_peer_address(ctx, peer_addr).await?;
        Ok(())
    }

    async fn pong(&self, ctx: &CancellationToken, to: &PeerAddress) -> Result<(), Error> {
        let body = self.encoded_me()?;
        let wire = MessageOnTheWire::outbound(to.addr, Message::pong(body));

        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Pinging {
                peer: to.id,
                source: QueueError::Cancelled,
            }),
            sent = self.messages.send(wire) => sent.map_err(|_| Error::Pinging {
                peer: to.id,
                source: QueueError::Closed,
            }),
        }
    }

    /// Forward a ping body to every known peer. Cancellation mid-loop drops
    /// the remaining targets; the last error encountered is returned and
    /// earlier enqueues stand.
    async fn propagate_ping(&self, ctx: &CancellationToken, body: Vec<u8>) -> Result<(), Error> {
        let peer_addrs = self.dht.peer_addresses();

        let mut last_err = None;
        for peer_addr in peer_addrs {
            let wire = MessageOnTheWire::outbound(peer_addr.addr, Message::ping(body.clone()));
            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!(peer = %peer_addr.id, "ping propagation cancelled");
                    last_err = Some(Error::Pinging {
                        peer: peer_addr.id,
                        source: QueueError::Cancelled,
                    });
                }
                sent = self.messages.send(wire) => {
                    if sent.is_err() {
                        last_err = Some(Error::Pinging {
                            peer: peer_addr.id,
                            source: QueueError::Closed,
                        });
                    }
                }
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Apply the newer-wins rule and emit a [`Event::PeerChanged`] when the
    /// directory accepted the address.
    async fn update_peer_address(
        &self,
        ctx: &CancellationToken,
        peer_addr: PeerAddress,
    ) -> Result<bool, Error> {
        if !self.dht.update_peer_address(peer_addr)? {
            return Ok(false);
        }

        let event = Event::peer_changed(peer_addr);
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Pinging {
                peer: peer_addr.id,
                source: QueueError::Cancelled,
            }),
            sent = self.events.send(event) => match sent {
                Ok(()) => Ok(true),
                Err(_) => Err(Error::Pinging {
                    peer: peer_addr.id,
                    source: QueueError::Closed,
                }),
            },
        }
    }

    fn encoded_me(&self) -> Result<Vec<u8>, Error> {
        let me = self.dht.me();
        me.encode()
            .map_err(|e| Error::DecodingPeerAddress(format!("encoding self address: {e}")))
    }
}
