//! # Connection Handle
//!
//! A [`Connection`] is one logical session with the real-time service. Its
//! endpoint, module and credential never change after the factory builds
//! it. The only moving parts are the state flag, which only ever advances
//! along the lifecycle, the identity captured on handshake and the table of
//! subscriptions waiting for their server acknowledgment.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::connections::messages::ClientMessage;
use crate::error::{LinkError, Result};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection was ever requested.
    Uninitialized,
    /// Handshake in flight.
    Connecting,
    /// Handshake acknowledged; the session is usable.
    Active,
    /// The session ended after being Active.
    Disconnected,
    /// The handshake failed.
    Failed,
}

impl ConnectionState {
    /// `true` for states a connection can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// Opaque credential the server assigns to a session on handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps a raw identity string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hook run once when a subscription is acknowledged.
pub(crate) type AppliedHook = Box<dyn FnOnce() + Send>;

struct PendingSubscription {
    applied_tx: watch::Sender<bool>,
    hook: Option<AppliedHook>,
}

/// One logical session with the real-time service.
pub struct Connection {
    endpoint: Url,
    module_name: String,
    auth_token: String,
    epoch: u64,
    state: watch::Sender<ConnectionState>,
    identity: OnceLock<Identity>,
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    pending: Mutex<HashMap<u64, PendingSubscription>>,
    next_request_id: AtomicU64,
}

impl Connection {
    pub(crate) fn new(
        endpoint: Url,
        module_name: String,
        auth_token: String,
        epoch: u64,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            endpoint,
            module_name,
            auth_token,
            epoch,
            state,
            identity: OnceLock::new(),
            outbound: Mutex::new(Some(outbound)),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Endpoint of the service.
    pub fn uri(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Endpoint of the service, parsed.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Module (database namespace) this connection is attached to.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub(crate) fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Number identifying this instance among every connection built by the
    /// same factory. Later connections have larger epochs.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// `true` once the handshake was acknowledged and until the session ends.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Identity assigned by the server, present once the connection was
    /// Active.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Resolves once the connection reaches Disconnected or Failed.
    pub async fn closed(&self) -> ConnectionState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives in `self`, so it cannot be gone while we borrow it.
            Err(_) => self.state(),
        };
        state
    }

    /// Number of subscriptions still waiting for their acknowledgment.
    pub fn pending_subscriptions(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Moves to `to` if the current state is one of `from`. Returns the
    /// previous state when the move happened.
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> Option<ConnectionState> {
        let mut previous = None;
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                previous = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });
        previous
    }

    /// Connecting → Active. `false` if the connection was not Connecting.
    pub(crate) fn mark_active(&self, identity: Identity) -> bool {
        if self.state() != ConnectionState::Connecting {
            return false;
        }
        let _ = self.identity.set(identity);
        self.transition(&[ConnectionState::Connecting], ConnectionState::Active)
            .is_some()
    }

    /// Connecting → Failed. Abandons pending subscriptions and closes the
    /// outbound side.
    pub(crate) fn mark_failed(&self) -> bool {
        let moved = self
            .transition(&[ConnectionState::Connecting], ConnectionState::Failed)
            .is_some();
        if moved {
            self.abandon_pending();
            self.close();
        }
        moved
    }

    /// Active → Disconnected. Abandons pending subscriptions and closes the
    /// outbound side.
    pub(crate) fn mark_disconnected(&self) -> bool {
        let moved = self
            .transition(&[ConnectionState::Active], ConnectionState::Disconnected)
            .is_some();
        if moved {
            self.abandon_pending();
            self.close();
        }
        moved
    }

    /// Closes the outbound side. The transport ends the session once it has
    /// flushed whatever was already queued.
    pub(crate) fn close(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Reserves the id of the next subscription request.
    pub(crate) fn allocate_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Queues a subscribe frame and records the subscription as pending.
    ///
    /// Connecting connections accept the request; the transport sends it
    /// once the session is up. Connections that can no longer become Active
    /// reject it.
    pub(crate) fn register_subscription(
        &self,
        request_id: u64,
        query: &str,
        applied_tx: watch::Sender<bool>,
        hook: Option<AppliedHook>,
    ) -> Result<()> {
        // State check and insert share the lock `abandon_pending` takes after
        // a terminal transition, so an entry is either rejected here or
        // dropped there. Inserting before sending lets an immediate
        // acknowledgment find it.
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let state = self.state();
            if state.is_terminal() {
                return Err(LinkError::ConnectionUnavailable { state });
            }
            pending.insert(request_id, PendingSubscription { applied_tx, hook });
        }

        let sent = {
            let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
            match outbound.as_ref() {
                Some(tx) => tx
                    .send(ClientMessage::Subscribe {
                        request_id,
                        query: query.to_string(),
                    })
                    .map_err(|_| LinkError::Transport("session task has stopped".into())),
                None => Err(LinkError::Transport("connection was closed".into())),
            }
        };

        if let Err(e) = sent {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request_id);
            return Err(e);
        }

        tracing::debug!(epoch = self.epoch, request_id, query, "subscription requested");
        Ok(())
    }

    /// Marks a pending subscription as applied and runs its hook. Each
    /// request id is acknowledged at most once.
    pub(crate) fn acknowledge_subscription(&self, request_id: u64) -> bool {
        let entry = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);

        match entry {
            Some(PendingSubscription { applied_tx, hook }) => {
                applied_tx.send_replace(true);
                tracing::debug!(epoch = self.epoch, request_id, "subscription applied");
                if let Some(hook) = hook {
                    hook();
                }
                true
            }
            None => {
                tracing::warn!(
                    epoch = self.epoch,
                    request_id,
                    "acknowledgment for unknown subscription ignored"
                );
                false
            }
        }
    }

    /// Drops every pending subscription; their handles observe the closed
    /// channel.
    fn abandon_pending(&self) {
        let abandoned = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if !abandoned.is_empty() {
            tracing::debug!(
                epoch = self.epoch,
                count = abandoned.len(),
                "pending subscriptions abandoned"
            );
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.endpoint.as_str())
            .field("module_name", &self.module_name)
            .field("epoch", &self.epoch)
            .field("state", &self.state())
            .field("identity", &self.identity.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> (Connection, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            Url::parse("ws://127.0.0.1:3000").unwrap(),
            "chat".into(),
            "secret".into(),
            1,
            tx,
        );
        (conn, rx)
    }

    #[test]
    fn starts_connecting_without_identity() {
        let (conn, _rx) = connection();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.identity().is_none());
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        let (conn, _rx) = connection();
        assert!(conn.mark_active(Identity::new("abc")));
        assert!(!conn.mark_failed());
        assert!(!conn.mark_active(Identity::new("other")));
        assert_eq!(conn.identity(), Some(&Identity::new("abc")));
        assert!(conn.mark_disconnected());
        assert!(!conn.mark_disconnected());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_connection_never_becomes_active() {
        let (conn, _rx) = connection();
        assert!(conn.mark_failed());
        assert!(!conn.mark_active(Identity::new("late")));
        assert!(conn.identity().is_none());
    }

    fn register(
        conn: &Connection,
        query: &str,
        hook: Option<AppliedHook>,
    ) -> Result<(u64, watch::Receiver<bool>)> {
        let id = conn.allocate_request_id();
        let (tx, rx) = watch::channel(false);
        conn.register_subscription(id, query, tx, hook)?;
        Ok((id, rx))
    }

    #[test]
    fn subscribe_while_connecting_queues_frame() {
        let (conn, mut rx) = connection();
        let (id, applied) = register(&conn, "SELECT * FROM user", None).unwrap();
        assert!(!*applied.borrow());
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientMessage::Subscribe {
                request_id: id,
                query: "SELECT * FROM user".into()
            }
        );
    }

    #[test]
    fn acknowledgment_flips_once_and_runs_hook() {
        let (conn, _rx) = connection();
        let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
        let hook: AppliedHook = Box::new(move || {
            let _ = hook_tx.send(());
        });
        let (id, applied) = register(&conn, "SELECT 1", Some(hook)).unwrap();

        assert!(conn.acknowledge_subscription(id));
        assert!(*applied.borrow());
        assert!(hook_rx.try_recv().is_ok());

        assert!(!conn.acknowledge_subscription(id));
        assert!(hook_rx.try_recv().is_err());
    }

    #[test]
    fn terminal_connection_rejects_subscriptions() {
        let (conn, _rx) = connection();
        conn.mark_failed();
        assert_eq!(
            register(&conn, "SELECT 1", None).unwrap_err(),
            LinkError::ConnectionUnavailable {
                state: ConnectionState::Failed
            }
        );
    }

    #[test]
    fn closed_connection_rejects_subscriptions() {
        let (conn, _rx) = connection();
        conn.close();
        assert!(matches!(
            register(&conn, "SELECT 1", None),
            Err(LinkError::Transport(_))
        ));
        assert_eq!(conn.pending_subscriptions(), 0);
    }

    #[test]
    fn disconnect_abandons_pending() {
        let (conn, _rx) = connection();
        conn.mark_active(Identity::new("abc"));
        let (_id, applied) = register(&conn, "SELECT 1", None).unwrap();
        assert_eq!(conn.pending_subscriptions(), 1);
        conn.mark_disconnected();
        assert_eq!(conn.pending_subscriptions(), 0);
        assert!(applied.has_changed().is_err());
    }

    #[test]
    fn terminal_transition_closes_outbound_queue() {
        let (conn, mut rx) = connection();
        assert!(conn.mark_failed());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let (conn, mut rx) = connection();
        conn.mark_active(Identity::new("abc"));
        assert!(conn.mark_disconnected());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn subscription_racing_a_disconnect_is_never_orphaned() {
        use std::sync::Arc;

        for _ in 0..500 {
            let (conn, _rx) = connection();
            let conn = Arc::new(conn);
            conn.mark_active(Identity::new("abc"));

            let subscriber = {
                let conn = Arc::clone(&conn);
                std::thread::spawn(move || register(&conn, "SELECT 1", None))
            };
            conn.mark_disconnected();

            match subscriber.join().unwrap() {
                // Accepted before the disconnect: the entry must have been abandoned.
                Ok((_id, applied)) => assert!(applied.has_changed().is_err()),
                Err(e) => assert!(matches!(
                    e,
                    LinkError::ConnectionUnavailable { .. } | LinkError::Transport(_)
                )),
            }
            assert_eq!(conn.pending_subscriptions(), 0);
        }
    }

    #[tokio::test]
    async fn closed_resolves_on_terminal_state() {
        let (conn, _rx) = connection();
        let conn = std::sync::Arc::new(conn);
        let waiter = {
            let conn = std::sync::Arc::clone(&conn);
            tokio::spawn(async move { conn.closed().await })
        };
        conn.mark_active(Identity::new("abc"));
        conn.mark_disconnected();
        assert_eq!(waiter.await.unwrap(), ConnectionState::Disconnected);
    }
}
