//! # Connection Factory
//!
//! Validates a [`LinkConfig`], creates a Connecting [`Connection`] and
//! spawns the task that opens the session and turns server frames into
//! state transitions and observer calls. `build` returns as soon as the
//! handle exists; network trouble only ever shows up through
//! `on_connect_error` / `on_disconnect`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::configs::link_config::LinkConfig;
use crate::connections::connection::{Connection, ConnectionState};
use crate::connections::messages::{ClientMessage, ServerMessage};
use crate::connections::observer::{LifecycleObserver, ObserverChain};
use crate::connections::transport::{Handshake, Transport};
use crate::error::{LinkError, Result};

/// Builds connections over one transport.
pub struct ConnectionFactory {
    transport: Arc<dyn Transport>,
    next_epoch: AtomicU64,
}

impl ConnectionFactory {
    /// Creates a factory that opens sessions through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Builds a Connecting handle and starts the handshake in the background.
    ///
    /// Fails only on invalid configuration or when called outside a tokio
    /// runtime; in both cases no transport attempt is made and no observer
    /// runs.
    pub fn build(
        &self,
        config: &LinkConfig,
        observers: Vec<Arc<dyn LifecycleObserver>>,
    ) -> Result<Arc<Connection>> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let runtime = Handle::try_current()
            .map_err(|e| LinkError::Transport(format!("no tokio runtime: {e}")))?;

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::new(
            endpoint.clone(),
            config.module_name.clone(),
            config.auth_token.clone(),
            epoch,
            outbound_tx,
        ));

        let handshake = Handshake {
            endpoint,
            module_name: connection.module_name().to_string(),
            auth_token: connection.auth_token().to_string(),
        };

        tracing::info!(epoch, uri = connection.uri(), module = connection.module_name(), "connecting");

        runtime.spawn(run_session(
            Arc::clone(&self.transport),
            handshake,
            outbound_rx,
            Arc::clone(&connection),
            ObserverChain::new(observers),
        ));

        Ok(connection)
    }
}

impl std::fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("next_epoch", &self.next_epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Drives one connection from handshake to the end of its session.
async fn run_session(
    transport: Arc<dyn Transport>,
    handshake: Handshake,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    connection: Arc<Connection>,
    observers: ObserverChain,
) {
    let mut inbound = match transport.connect(handshake, outbound).await {
        Ok(inbound) => inbound,
        Err(e) => {
            let error = match e {
                LinkError::HandshakeFailure(_) => e,
                other => LinkError::HandshakeFailure(other.to_string()),
            };
            if connection.mark_failed() {
                observers.connect_error(&connection, &error);
            }
            return;
        }
    };

    let ending: Option<LinkError> = loop {
        match inbound.recv().await {
            Some(ServerMessage::IdentityToken { identity }) => {
                if connection.mark_active(identity.clone()) {
                    observers.connect(&connection, &identity);
                } else {
                    tracing::debug!(epoch = connection.epoch(), "repeated identity frame ignored");
                }
            }
            Some(ServerMessage::ConnectError { message }) => {
                if connection.state() == ConnectionState::Connecting {
                    if connection.mark_failed() {
                        observers.connect_error(&connection, &LinkError::HandshakeFailure(message));
                    }
                    return;
                }
                break Some(LinkError::TransportDisconnect(message));
            }
            Some(ServerMessage::SubscriptionApplied { request_id }) => {
                connection.acknowledge_subscription(request_id);
            }
            Some(ServerMessage::Disconnect { reason }) => {
                break reason.map(LinkError::TransportDisconnect);
            }
            None => break None,
        }
    };

    // A session that ends before the handshake was acknowledged failed it.
    if connection.state() == ConnectionState::Connecting {
        let error = LinkError::HandshakeFailure(match ending {
            Some(e) => e.to_string(),
            None => "session closed before handshake completed".into(),
        });
        if connection.mark_failed() {
            observers.connect_error(&connection, &error);
        }
        return;
    }

    if connection.mark_disconnected() {
        observers.disconnect(&connection, ending.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::connection::Identity;
    use crate::connections::loopback::loopback;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl EventLog {
        fn events(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl LifecycleObserver for EventLog {
        fn on_connect(&self, _c: &Arc<Connection>, identity: &Identity) {
            self.0.lock().unwrap().push(format!("connect:{identity}"));
        }
        fn on_connect_error(&self, _c: &Arc<Connection>, error: &LinkError) {
            self.0.lock().unwrap().push(format!("error:{error}"));
        }
        fn on_disconnect(&self, _c: &Arc<Connection>, error: Option<&LinkError>) {
            let what = error.map(|e| e.to_string()).unwrap_or_else(|| "none".into());
            self.0.lock().unwrap().push(format!("disconnect:{what}"));
        }
    }

    fn config() -> LinkConfig {
        LinkConfig::new("ws://127.0.0.1:3000", "chat", "secret")
    }

    #[tokio::test]
    async fn empty_token_rejects_before_any_attempt() {
        let (transport, server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        let log = Arc::new(EventLog::default());

        let err = factory
            .build(
                &LinkConfig::new("ws://127.0.0.1:3000", "chat", ""),
                vec![log.clone()],
            )
            .unwrap_err();

        assert!(matches!(err, LinkError::Configuration { field: "auth_token", .. }));
        tokio::task::yield_now().await;
        assert_eq!(server.attempts(), 0);
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn build_returns_connecting_handle() {
        let (transport, mut server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        let conn = factory.build(&config(), Vec::new()).unwrap();

        assert_eq!(conn.state(), ConnectionState::Connecting);
        let session = server.accept().await.unwrap();
        assert_eq!(session.handshake.module_name, "chat");
        assert_eq!(session.handshake.auth_token, "secret");
    }

    #[tokio::test]
    async fn identity_frame_activates_and_notifies() {
        let (transport, mut server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        let log = Arc::new(EventLog::default());
        let conn = factory.build(&config(), vec![log.clone()]).unwrap();

        let session = server.accept().await.unwrap();
        session.accept_handshake("c200");
        session.disconnect(Some("server restart".into()));

        assert_eq!(conn.closed().await, ConnectionState::Disconnected);
        assert_eq!(conn.identity(), Some(&Identity::new("c200")));
        assert_eq!(
            log.events(),
            vec!["connect:c200", "disconnect:transport disconnected: server restart"]
        );
    }

    #[tokio::test]
    async fn rejected_handshake_fails_connection() {
        let (transport, mut server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        let log = Arc::new(EventLog::default());
        let conn = factory.build(&config(), vec![log.clone()]).unwrap();

        server.accept().await.unwrap().reject_handshake("bad token");

        assert_eq!(conn.closed().await, ConnectionState::Failed);
        assert_eq!(log.events(), vec!["error:handshake failed: bad token"]);
    }

    #[tokio::test]
    async fn ended_sessions_close_the_outbound_side() {
        let (transport, mut server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));

        let rejected = factory.build(&config(), Vec::new()).unwrap();
        let mut session = server.accept().await.unwrap();
        session.reject_handshake("bad token");
        assert_eq!(rejected.closed().await, ConnectionState::Failed);
        assert_eq!(session.next_request().await, None);

        let dropped = factory.build(&config(), Vec::new()).unwrap();
        let mut session = server.accept().await.unwrap();
        session.accept_handshake("c201");
        session.send(ServerMessage::Disconnect { reason: None });
        assert_eq!(dropped.closed().await, ConnectionState::Disconnected);
        assert_eq!(session.next_request().await, None);
    }

    #[tokio::test]
    async fn session_closed_while_connecting_is_a_handshake_failure() {
        let (transport, mut server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        let log = Arc::new(EventLog::default());
        let conn = factory.build(&config(), vec![log.clone()]).unwrap();

        drop(server.accept().await.unwrap());

        assert_eq!(conn.closed().await, ConnectionState::Failed);
        assert_eq!(log.events().len(), 1);
        assert!(log.events()[0].starts_with("error:"));
    }

    #[tokio::test]
    async fn unreachable_transport_reports_connect_error() {
        let (transport, server) = loopback();
        drop(server);
        let factory = ConnectionFactory::new(Arc::new(transport));
        let log = Arc::new(EventLog::default());
        let conn = factory.build(&config(), vec![log.clone()]).unwrap();

        assert_eq!(conn.closed().await, ConnectionState::Failed);
        assert_eq!(log.events(), vec!["error:handshake failed: loopback server is gone"]);
    }

    #[tokio::test]
    async fn epochs_increase_per_build() {
        let (transport, _server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        let first = factory.build(&config(), Vec::new()).unwrap();
        let second = factory.build(&config(), Vec::new()).unwrap();
        assert!(second.epoch() > first.epoch());
    }

    #[test]
    fn build_outside_runtime_is_an_error() {
        let (transport, server) = loopback();
        let factory = ConnectionFactory::new(Arc::new(transport));
        assert!(matches!(
            factory.build(&config(), Vec::new()),
            Err(LinkError::Transport(_))
        ));
        assert_eq!(server.attempts(), 0);
    }
}
