//! # Readiness Waiting
//!
//! Dependents call [`LifecycleManager::wait_until_ready`] before touching the
//! connection. The wait is a bounded poll at a constant interval:
//!
//! - the attempt counter starts at zero;
//! - each failed check increments it;
//! - the wait gives up once the counter is strictly greater than
//!   `max_attempts`.
//!
//! So a budget of `n` allows `n + 1` checks. A missing current connection
//! (never initialized, or cleared by a disconnect) counts as a failed check.
//!
//! [`LifecycleManager::wait_until_ready`]: crate::core::lifecycle_manager::LifecycleManager::wait_until_ready

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::connections::connection::Connection;
use crate::core::lifecycle_manager::LifecycleManager;
use crate::error::{LinkError, Result};

/// Default delay between two checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Interval and attempt budget of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// Delay between two checks.
    pub poll_interval: Duration,
    /// Failed checks tolerated before giving up; `max_attempts + 1` checks
    /// happen in total.
    pub max_attempts: u32,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReadinessOptions {
    /// Options with an explicit interval and budget.
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts,
        }
    }
}

/// Per-call polling state.
#[derive(Debug)]
pub struct ReadinessWaiter {
    options: ReadinessOptions,
    checks: u32,
}

impl ReadinessWaiter {
    /// A waiter that has not checked anything yet.
    pub fn new(options: ReadinessOptions) -> Self {
        Self { options, checks: 0 }
    }

    /// Checks made so far.
    pub fn checks(&self) -> u32 {
        self.checks
    }

    /// Polls `manager` until its current connection is Active.
    pub async fn wait(
        &mut self,
        manager: &LifecycleManager,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        self.poll(
            || manager.current().ok().filter(|connection| connection.is_active()),
            cancel,
        )
        .await
    }

    async fn poll<F>(&mut self, mut probe: F, cancel: Option<&CancellationToken>) -> Result<Arc<Connection>>
    where
        F: FnMut() -> Option<Arc<Connection>>,
    {
        let mut attempts: u32 = 0;
        loop {
            self.checks += 1;
            if let Some(connection) = probe() {
                tracing::debug!(checks = self.checks, epoch = connection.epoch(), "connection ready");
                return Ok(connection);
            }

            attempts += 1;
            if attempts > self.options.max_attempts {
                tracing::warn!(checks = self.checks, "connection not ready, giving up");
                return Err(LinkError::ConnectionTimeout {
                    checks: self.checks,
                });
            }

            tracing::trace!(attempts, "connection not ready yet");
            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(LinkError::Cancelled),
                        _ = tokio::time::sleep(self.options.poll_interval) => {}
                    }
                }
                None => tokio::time::sleep(self.options.poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::loopback::loopback;
    use crate::LinkConfig;
    use tokio::time::Instant;

    fn config() -> LinkConfig {
        LinkConfig::new("ws://127.0.0.1:3000", "chat", "secret")
    }

    #[tokio::test(start_paused = true)]
    async fn uninitialized_manager_times_out_after_budget_plus_one_checks() {
        let (transport, _server) = loopback();
        let manager = LifecycleManager::new(Arc::new(transport));
        let mut waiter = ReadinessWaiter::new(ReadinessOptions::new(Duration::from_millis(100), 2));

        let started = Instant::now();
        let err = waiter.wait(&manager, None).await.unwrap_err();

        assert_eq!(err, LinkError::ConnectionTimeout { checks: 3 });
        assert_eq!(waiter.checks(), 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_checks_once() {
        let (transport, _server) = loopback();
        let manager = LifecycleManager::new(Arc::new(transport));
        let mut waiter = ReadinessWaiter::new(ReadinessOptions::new(Duration::from_millis(100), 0));

        assert!(waiter.wait(&manager, None).await.is_err());
        assert_eq!(waiter.checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_fourth_check_after_late_handshake() {
        let (transport, mut server) = loopback();
        let manager = LifecycleManager::new(Arc::new(transport));
        manager.initialize(&config()).unwrap();

        tokio::spawn(async move {
            let session = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            let _serving = session.serve("late-identity");
        });

        let started = Instant::now();
        let mut waiter = ReadinessWaiter::new(ReadinessOptions::new(Duration::from_millis(100), 10));
        let connection = waiter.wait(&manager, None).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(waiter.checks(), 4);
        assert_eq!(connection.identity().unwrap().as_str(), "late-identity");
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_is_ready_on_first_check() {
        let (transport, mut server) = loopback();
        let manager = LifecycleManager::new(Arc::new(transport));
        let connection = manager.initialize(&config()).unwrap();
        let _serving = server.accept().await.unwrap().serve("id");
        while !connection.is_active() {
            tokio::task::yield_now().await;
        }

        let mut waiter = ReadinessWaiter::new(ReadinessOptions::default());
        waiter.wait(&manager, None).await.unwrap();
        assert_eq!(waiter.checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_wait() {
        let (transport, _server) = loopback();
        let manager = LifecycleManager::new(Arc::new(transport));
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_250)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let mut waiter = ReadinessWaiter::new(ReadinessOptions::default());
        let err = waiter.wait(&manager, Some(&token)).await.unwrap_err();

        assert_eq!(err, LinkError::Cancelled);
        assert_eq!(waiter.checks(), 3);
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }
}
