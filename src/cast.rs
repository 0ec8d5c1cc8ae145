//! Unicast messaging.
//!
//! A cast wraps an application body in a [`Variant::Cast`] frame and hands it
//! to the outbound queue for exactly one peer, resolved through the
//! directory. Accepting a cast validates the frame and surfaces the body as a
//! [`Event::MessageReceived`]; there is no forwarding and no deduplication.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dht::PeerDirectory;
use crate::error::{Error, QueueError};
use crate::event::{Event, EventSender};
use crate::message::{Message, MessageOnTheWire, MessageSender, Variant, Version};
use crate::peer::PeerID;

pub struct Caster<D> {
    dht: Arc<D>,
    messages: MessageSender,
    events: EventSender,
}

impl<D: PeerDirectory> Caster<D> {
    pub fn new(dht: Arc<D>, messages: MessageSender, events: EventSender) -> Self {
        Self {
            dht,
            messages,
            events,
        }
    }

    /// Send a body to a known peer. Fails with [`Error::PeerNotFound`] when
    /// the directory has no address for it.
    pub async fn cast(
        &self,
        ctx: &CancellationToken,
        to: PeerID,
        body: Vec<u8>,
    ) -> Result<(), Error> {
        let peer_addr = self.dht.peer_address(&to)?;
        let wire = MessageOnTheWire::outbound(peer_addr.addr, Message::cast(body));

        tokio::select! {
            _ = ctx.cancelled() => Err(Error::Casting {
                peer: to,
                source: QueueError::Cancelled,
            }),
            sent = self.messages.send(wire) => sent.map_err(|_| Error::Casting {
                peer: to,
                source: QueueError::Closed,
            }),
        }
    }

    /// Deliver an inbound cast to the application.
    pub async fn accept_cast(
        &self,
        ctx: &CancellationToken,
        message: Message,
    ) -> Result<(), Error> {
        if message.version != Version::V1 {
            return Err(Error::VersionNotSupported(message.version));
        }
        if message.variant != Variant::Cast {
            return Err(Error::VariantNotSupported(message.variant));
        }

        let event = Event::message_received(message.body, None);
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::AcceptingCast {
                source: QueueError::Cancelled,
            }),
            sent = self.events.send(event) => sent.map_err(|_| Error::AcceptingCast {
                source: QueueError::Closed,
            }),
        }
    }
}
