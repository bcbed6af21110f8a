//! Reconnect loop layered on top of the lifecycle manager.
//!
//! Each round initializes the link, waits for it to become Active,
//! registers the configured queries and then sits on the session until it
//! ends or shutdown is requested. Failed rounds back off exponentially.

use std::sync::Arc;
use std::time::Duration;

use link_core::{LifecycleManager, LinkError, SubscriptionRegistrar};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::link_logic::config::Settings;

/// Doubles `current`, capped at `max`.
pub fn next_delay(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current.saturating_mul(2), max)
}

pub struct Supervisor {
    manager: Arc<LifecycleManager>,
    registrar: SubscriptionRegistrar,
    settings: Settings,
}

impl Supervisor {
    pub fn new(manager: Arc<LifecycleManager>, settings: Settings) -> Self {
        let registrar = SubscriptionRegistrar::new(Arc::clone(&manager));
        Self {
            manager,
            registrar,
            settings,
        }
    }

    /// Runs until `shutdown` is cancelled. Only a configuration error ends
    /// it early.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut backoff = self.settings.reconnect_base_delay;

        while !shutdown.is_cancelled() {
            let connection = match self.manager.initialize(&self.settings.link) {
                Ok(connection) => connection,
                Err(e @ LinkError::Configuration { .. }) => {
                    self.manager.teardown();
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(%e, "failed to start connection");
                    if !self.pause(&mut backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            match self
                .manager
                .wait_until_ready(self.settings.readiness, Some(&shutdown))
                .await
            {
                Ok(active) => {
                    backoff = self.settings.reconnect_base_delay;
                    tracing::info!(
                        epoch = active.epoch(),
                        identity = %active.identity().map(|i| i.as_str()).unwrap_or_default(),
                        "link ready"
                    );
                    self.subscribe_all();

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        state = active.closed() => {
                            tracing::warn!(epoch = active.epoch(), ?state, "link lost");
                        }
                    }
                }
                Err(LinkError::Cancelled) => break,
                Err(e) => {
                    tracing::warn!(%e, epoch = connection.epoch(), state = ?connection.state(), "link not ready");
                    // Drop a handshake that is still hanging so the next round starts fresh.
                    self.manager.teardown();
                }
            }

            if !self.pause(&mut backoff, &shutdown).await {
                break;
            }
        }

        if let Some(connection) = self.manager.teardown() {
            tracing::info!(epoch = connection.epoch(), "link closed on shutdown");
        }
        Ok(())
    }

    fn subscribe_all(&self) {
        for query in &self.settings.queries {
            let result = self
                .registrar
                .builder()
                .on_applied(|sub| async move {
                    tracing::info!(id = sub.id(), query = sub.query(), "subscription applied");
                })
                .subscribe(query.as_str());
            if let Err(e) = result {
                tracing::error!(%e, query = query.as_str(), "subscription request failed");
            }
        }
    }

    /// Sleeps for the current backoff and doubles it. `false` if shutdown
    /// was requested meanwhile.
    async fn pause(&self, backoff: &mut Duration, shutdown: &CancellationToken) -> bool {
        tracing::info!("Reconnecting in {}ms...", backoff.as_millis());
        let proceed = tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = sleep(*backoff) => true,
        };
        *backoff = next_delay(*backoff, self.settings.reconnect_max_delay);
        proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_core::connections::{loopback, ClientMessage};
    use link_core::{ConnectionState, LinkConfig, ReadinessOptions};

    fn settings(queries: &[&str]) -> Settings {
        Settings {
            link: LinkConfig::new("ws://127.0.0.1:3000", "chat", "secret"),
            queries: queries.iter().map(|q| q.to_string()).collect(),
            readiness: ReadinessOptions::new(Duration::from_millis(10), 20),
            connect_timeout: Duration::from_secs(1),
            reconnect_base_delay: Duration::from_millis(20),
            reconnect_max_delay: Duration::from_millis(80),
        }
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let max = Duration::from_secs(60);
        assert_eq!(next_delay(Duration::from_secs(1), max), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(40), max), max);
        assert_eq!(next_delay(max, max), max);
    }

    #[tokio::test]
    async fn subscribes_configured_queries_and_stops_on_shutdown() {
        let (transport, mut server) = loopback();
        let manager = Arc::new(LifecycleManager::new(Arc::new(transport)));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(
            Supervisor::new(Arc::clone(&manager), settings(&["SELECT * FROM user", "SELECT * FROM message"]))
                .run(shutdown.clone()),
        );

        let mut session = server.accept().await.unwrap();
        session.accept_handshake("daemon");
        let mut queries = Vec::new();
        for _ in 0..2 {
            match session.next_request().await {
                Some(ClientMessage::Subscribe { request_id, query }) => {
                    session.apply(request_id);
                    queries.push(query);
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(queries, vec!["SELECT * FROM user", "SELECT * FROM message"]);

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(session.next_request().await.is_none());
    }

    #[tokio::test]
    async fn reconnects_after_session_loss() {
        let (transport, mut server) = loopback();
        let manager = Arc::new(LifecycleManager::new(Arc::new(transport)));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Supervisor::new(Arc::clone(&manager), settings(&[])).run(shutdown.clone()));

        let first = server.accept().await.unwrap();
        first.accept_handshake("one");
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.disconnect(Some("restart".into()));

        let second = server.accept().await.unwrap();
        assert_eq!(second.handshake.module_name, "chat");
        let _serving = second.serve("two");

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(server.attempts(), 2);
    }

    #[tokio::test]
    async fn rejected_handshakes_are_retried() {
        let (transport, mut server) = loopback();
        let manager = Arc::new(LifecycleManager::new(Arc::new(transport)));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Supervisor::new(Arc::clone(&manager), settings(&[])).run(shutdown.clone()));

        server.accept().await.unwrap().reject_handshake("warming up");
        let _serving = server.accept().await.unwrap().serve("ok");

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn invalid_link_config_ends_the_loop() {
        let (transport, server) = loopback();
        let manager = Arc::new(LifecycleManager::new(Arc::new(transport)));
        let mut bad = settings(&[]);
        bad.link.auth_token.clear();

        let err = Supervisor::new(manager, bad)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("auth_token"));
        assert_eq!(server.attempts(), 0);
    }
}
