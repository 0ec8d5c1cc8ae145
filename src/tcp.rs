//! # TCP Transport
//!
//! Connects the core's queues to real sockets. The [`Server`] accepts
//! connections, authenticates each one with the handshake, and feeds framed
//! messages into the inbound queue tagged with the verified sender. The
//! [`Client`] consumes the outbound queue, dialing (and authenticating) one
//! connection per target address on demand.
//!
//! Failure policy: a failed or timed-out handshake closes that connection; a
//! malformed frame is logged and skipped while the connection keeps serving;
//! transport errors end only the affected connection, never the accept loop.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, WireError};
use crate::handshake::{HandshakeError, Handshaker};
use crate::message::{Message, MessageOnTheWire, MessageReceiver, MessageSender};
use crate::signer::SignVerifier;

/// How long a dial or an accepted connection may spend in the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Accept loop feeding the inbound queue.
pub struct Server<V> {
    options: ServerOptions,
    handshaker: Handshaker<V>,
    messages: MessageSender,
}

impl<V: SignVerifier + 'static> Server<V> {
    pub fn new(options: ServerOptions, sign_verifier: Arc<V>, messages: MessageSender) -> Self {
        Self {
            options,
            handshaker: Handshaker::new(sign_verifier),
            messages,
        }
    }

    /// Listen until the token cancels. Individual connection failures are
    /// logged and never tear down the loop.
    pub async fn listen(&self, ctx: CancellationToken, bind: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(bind).await?;
        info!(addr = %listener.local_addr()?, "tcp server listening");

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "error accepting tcp connection");
                            continue;
                        }
                    };
                    let ctx = ctx.clone();
                    let handshaker = self.handshaker.clone();
                    let messages = self.messages.clone();
                    let handshake_timeout = self.options.handshake_timeout;
                    tokio::spawn(async move {
                        serve_connection(ctx, handshaker, messages, handshake_timeout, stream, remote)
                            .await;
                    });
                }
            }
        }
    }
}

async fn serve_connection<V: SignVerifier>(
    ctx: CancellationToken,
    handshaker: Handshaker<V>,
    messages: MessageSender,
    handshake_timeout: Duration,
    mut stream: TcpStream,
    remote: SocketAddr,
) {
    let peer = match timeout(handshake_timeout, handshaker.accept_handshake(&mut stream)).await {
        Ok(Ok(peer)) => peer,
        Ok(Err(e)) => {
            warn!(%remote, error = %e, "handshake failed");
            return;
        }
        Err(_) => {
            warn!(%remote, "handshake timed out");
            return;
        }
    };
    debug!(%remote, peer = %peer, "session authenticated");

    loop {
        let read = tokio::select! {
            _ = ctx.cancelled() => return,
            read = Message::read_from(&mut stream) => read,
        };
        let message = match read {
            Ok(message) => message,
            Err(WireError::Malformed(e)) => {
                // The frame was fully consumed; the stream is still aligned.
                warn!(%remote, "{}", Error::ReadingIncomingMessage(e));
                continue;
            }
            Err(e) => {
                debug!(%remote, error = %e, "connection closed");
                return;
            }
        };

        let wire = MessageOnTheWire::inbound(Some(peer), message);
        tokio::select! {
            _ = ctx.cancelled() => return,
            sent = messages.send(wire) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Why an outbound message could not be written.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error(transparent)]
    Wire(#[from] WireError),
}

#[derive(Clone, Copy, Debug)]
pub struct ClientOptions {
    pub handshake_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Dialer consuming the outbound queue. Keeps one authenticated connection
/// per target address, dropping it on any write failure.
pub struct Client<V> {
    options: ClientOptions,
    handshaker: Handshaker<V>,
}

impl<V: SignVerifier> Client<V> {
    pub fn new(options: ClientOptions, sign_verifier: Arc<V>) -> Self {
        Self {
            options,
            handshaker: Handshaker::new(sign_verifier),
        }
    }

    /// Drain the outbound queue until the token cancels or the queue closes.
    pub async fn run(&self, ctx: CancellationToken, mut outbound: MessageReceiver) {
        let mut conns: HashMap<SocketAddr, TcpStream> = HashMap::new();

        loop {
            let wire = tokio::select! {
                _ = ctx.cancelled() => return,
                wire = outbound.recv() => match wire {
                    Some(wire) => wire,
                    None => return,
                },
            };
            let Some(to) = wire.to else {
                debug!("dropping outbound message with no address");
                continue;
            };

            if let Err(e) = self.write_to(&mut conns, to, &wire.message).await {
                warn!(%to, error = %e, "dropping connection");
                conns.remove(&to);
            }
        }
    }

    async fn write_to(
        &self,
        conns: &mut HashMap<SocketAddr, TcpStream>,
        to: SocketAddr,
        message: &Message,
    ) -> Result<(), ClientError> {
        let stream = match conns.entry(to) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut stream = TcpStream::connect(to).await?;
                let peer = timeout(
                    self.options.handshake_timeout,
                    self.handshaker.handshake(&mut stream),
                )
                .await
                .map_err(|_| ClientError::HandshakeTimeout)??;
                debug!(%to, peer = %peer, "session authenticated");
                entry.insert(stream)
            }
        };
        message.write_to(stream).await?;
        Ok(())
    }
}
