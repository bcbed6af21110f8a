//! Frames exchanged with the real-time service.
//!
//! Both directions are JSON objects tagged by a `type` field, e.g.
//! `{"type":"subscribe","request_id":3,"query":"SELECT * FROM user"}`.

use serde::{Deserialize, Serialize};

use crate::connections::connection::Identity;

/// Client → server frames.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame of every session.
    Connect {
        /// Module (database namespace) to attach to.
        module_name: String,
        /// Credential for the handshake.
        auth_token: String,
    },
    /// Registers a query subscription.
    Subscribe {
        /// Id echoed back in [`ServerMessage::SubscriptionApplied`].
        request_id: u64,
        /// Raw query text.
        query: String,
    },
}

impl std::fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientMessage::Connect { module_name, .. } => f
                .debug_struct("Connect")
                .field("module_name", module_name)
                .finish_non_exhaustive(),
            ClientMessage::Subscribe { request_id, query } => f
                .debug_struct("Subscribe")
                .field("request_id", request_id)
                .field("query", query)
                .finish(),
        }
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    IdentityToken {
        /// Server-assigned identity of this session.
        identity: Identity,
    },
    /// Handshake rejected.
    ConnectError {
        /// Reason given by the server.
        message: String,
    },
    /// A subscription is live on the server.
    SubscriptionApplied {
        /// Id of the originating [`ClientMessage::Subscribe`].
        request_id: u64,
    },
    /// The session is over.
    Disconnect {
        /// Reason, if the server or transport gave one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}
