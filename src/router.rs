//! Inbound message dispatch.
//!
//! A thin loop between the inbound queue and the accepting subsystems: each
//! verified wire is routed by its variant tag to the matching `accept_*`
//! function. Per-message failures are logged and the loop keeps serving.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::broadcast::Broadcaster;
use crate::cast::Caster;
use crate::dht::PeerDirectory;
use crate::error::Error;
use crate::message::{MessageOnTheWire, MessageReceiver, Variant};
use crate::pingpong::PingPonger;

pub struct Router<D> {
    pingponger: Arc<PingPonger<D>>,
    caster: Arc<Caster<D>>,
    broadcaster: Arc<Broadcaster<D>>,
}

impl<D: PeerDirectory + 'static> Router<D> {
    pub fn new(
        pingponger: Arc<PingPonger<D>>,
        caster: Arc<Caster<D>>,
        broadcaster: Arc<Broadcaster<D>>,
    ) -> Self {
        Self {
            pingponger,
            caster,
            broadcaster,
        }
    }

    /// Dispatch one wire to the subsystem named by its variant.
    pub async fn route(
        &self,
        ctx: &CancellationToken,
        wire: MessageOnTheWire,
    ) -> Result<(), Error> {
        match wire.message.variant {
            Variant::Ping => self.pingponger.accept_ping(ctx, wire.message).await,
            Variant::Pong => self.pingponger.accept_pong(ctx, wire.message).await,
            Variant::Cast => self.caster.accept_cast(ctx, wire.message).await,
            Variant::Broadcast => {
                let Some(from) = wire.from else {
                    warn!("dropping broadcast without an authenticated sender");
                    return Ok(());
                };
                self.broadcaster.accept_broadcast(ctx, from, wire.message).await
            }
        }
    }

    /// Serve the inbound queue until the token cancels or the queue closes.
    pub async fn run(&self, ctx: CancellationToken, mut inbound: MessageReceiver) {
        loop {
            let wire = tokio::select! {
                _ = ctx.cancelled() => return,
                wire = inbound.recv() => match wire {
                    Some(wire) => wire,
                    None => return,
                },
            };
            if let Err(e) = self.route(&ctx, wire).await {
                warn!(error = %e, "error handling inbound message");
            }
        }
    }
}
