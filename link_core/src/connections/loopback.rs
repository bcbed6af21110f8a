//! # Loopback Transport
//!
//! An in-process [`Transport`] whose remote end is driven by code in the
//! same process. Every session the factory opens shows up on the
//! [`LoopbackServer`] as a [`LoopbackSession`], which can accept or reject
//! the handshake, read subscription requests, acknowledge them and end the
//! session. Tests use it to script the real-time service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connections::connection::Identity;
use crate::connections::messages::{ClientMessage, ServerMessage};
use crate::connections::transport::{Handshake, Transport};
use crate::error::{LinkError, Result};

/// Creates a connected transport / server pair.
pub fn loopback() -> (LoopbackTransport, LoopbackServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    (
        LoopbackTransport {
            sessions: tx,
            attempts: Arc::clone(&attempts),
        },
        LoopbackServer {
            sessions: rx,
            attempts,
        },
    )
}

/// Client side of the loopback pair.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    sessions: mpsc::UnboundedSender<LoopbackSession>,
    attempts: Arc<AtomicUsize>,
}

impl LoopbackTransport {
    /// Shorthand for [`loopback`].
    pub fn pair() -> (Self, LoopbackServer) {
        loopback()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        handshake: Handshake,
        outbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Result<mpsc::UnboundedReceiver<ServerMessage>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let session = LoopbackSession {
            handshake,
            outbound,
            inbound: inbound_tx,
        };
        self.sessions
            .send(session)
            .map_err(|_| LinkError::HandshakeFailure("loopback server is gone".into()))?;
        Ok(inbound_rx)
    }
}

/// Server side of the loopback pair.
#[derive(Debug)]
pub struct LoopbackServer {
    sessions: mpsc::UnboundedReceiver<LoopbackSession>,
    attempts: Arc<AtomicUsize>,
}

impl LoopbackServer {
    /// Waits for the next session the client opens.
    pub async fn accept(&mut self) -> Option<LoopbackSession> {
        self.sessions.recv().await
    }

    /// Returns a session if one is already waiting.
    pub fn try_accept(&mut self) -> Option<LoopbackSession> {
        self.sessions.try_recv().ok()
    }

    /// How many times the client tried to connect.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// One session seen from the server side.
#[derive(Debug)]
pub struct LoopbackSession {
    /// What the client presented when opening the session.
    pub handshake: Handshake,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
}

impl LoopbackSession {
    /// Sends a raw frame to the client. `false` once the client stopped
    /// listening.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.inbound.send(message).is_ok()
    }

    /// Acknowledges the handshake with `identity`.
    pub fn accept_handshake(&self, identity: impl Into<String>) -> bool {
        self.send(ServerMessage::IdentityToken {
            identity: Identity::new(identity),
        })
    }

    /// Rejects the handshake.
    pub fn reject_handshake(&self, message: impl Into<String>) -> bool {
        self.send(ServerMessage::ConnectError {
            message: message.into(),
        })
    }

    /// Acknowledges the subscription with `request_id`.
    pub fn apply(&self, request_id: u64) -> bool {
        self.send(ServerMessage::SubscriptionApplied { request_id })
    }

    /// Waits for the next frame from the client. `None` once the client
    /// closed its outbound side.
    pub async fn next_request(&mut self) -> Option<ClientMessage> {
        self.outbound.recv().await
    }

    /// Returns a frame if one is already queued.
    pub fn try_next_request(&mut self) -> Option<ClientMessage> {
        self.outbound.try_recv().ok()
    }

    /// Ends the session with an optional reason.
    pub fn disconnect(self, reason: Option<String>) {
        let _ = self.inbound.send(ServerMessage::Disconnect { reason });
    }

    /// Accepts the handshake and then acknowledges every subscription until
    /// the client closes the session.
    pub fn serve(self, identity: impl Into<String>) -> JoinHandle<()> {
        let identity = identity.into();
        tokio::spawn(async move {
            let mut session = self;
            session.accept_handshake(identity);
            while let Some(request) = session.next_request().await {
                if let ClientMessage::Subscribe { request_id, .. } = request {
                    session.apply(request_id);
                }
            }
        })
    }
}
