//! # Transport Seam
//!
//! The factory never touches sockets directly. A [`Transport`] opens a
//! session for a [`Handshake`], drains the outbound frame queue into it and
//! hands back a channel of inbound frames. Closing that channel ends the
//! session.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::connections::messages::{ClientMessage, ServerMessage};
use crate::error::Result;

/// What a transport needs to open a session.
#[derive(Clone)]
pub struct Handshake {
    /// Websocket endpoint.
    pub endpoint: Url,
    /// Module (database namespace) to attach to.
    pub module_name: String,
    /// Credential presented to the service.
    pub auth_token: String,
}

impl Handshake {
    /// The frame that opens every session.
    pub fn connect_message(&self) -> ClientMessage {
        ClientMessage::Connect {
            module_name: self.module_name.clone(),
            auth_token: self.auth_token.clone(),
        }
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("endpoint", &self.endpoint.as_str())
            .field("module_name", &self.module_name)
            .finish_non_exhaustive()
    }
}

/// Carries one session with the real-time service.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a session.
    ///
    /// `outbound` holds every frame the client wants sent, including frames
    /// queued before the session was up. The returned receiver yields server
    /// frames until the session ends. An `Err` means the session could not
    /// be opened at all and is reported as a handshake failure.
    async fn connect(
        &self,
        handshake: Handshake,
        outbound: mpsc::UnboundedReceiver<ClientMessage>,
    ) -> Result<mpsc::UnboundedReceiver<ServerMessage>>;
}
