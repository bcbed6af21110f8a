//! # Subscription Registrar
//!
//! Registers query subscriptions against the manager's current connection.
//! Every call sends exactly one subscribe request; identical query text is
//! never deduplicated. A connection still Connecting queues the request and
//! the transport sends it once the session is up.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use link_core::{LifecycleManager, LinkConfig, ReadinessOptions, SubscriptionRegistrar};
//!
//! # async fn run() -> link_core::Result<()> {
//! let manager = Arc::new(LifecycleManager::websocket());
//! manager.initialize(&LinkConfig::from_env()?)?;
//! manager.wait_until_ready(ReadinessOptions::default(), None).await?;
//!
//! let registrar = SubscriptionRegistrar::new(Arc::clone(&manager));
//! let handle = registrar
//!     .builder()
//!     .on_applied(|sub| async move { tracing::info!(id = sub.id(), "live") })
//!     .subscribe("SELECT * FROM message")?;
//! handle.applied().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;

use crate::connections::connection::{AppliedHook, Connection};
use crate::core::lifecycle_manager::LifecycleManager;
use crate::error::{LinkError, Result};

type OnApplied = Box<dyn FnOnce(SubscriptionHandle) -> BoxFuture<'static, ()> + Send>;

/// Issues subscriptions against the current connection of a manager.
#[derive(Debug, Clone)]
pub struct SubscriptionRegistrar {
    manager: Arc<LifecycleManager>,
}

impl SubscriptionRegistrar {
    /// A registrar bound to `manager`.
    pub fn new(manager: Arc<LifecycleManager>) -> Self {
        Self { manager }
    }

    /// The manager this registrar reads the current connection from.
    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// Starts a subscription with extra options.
    pub fn builder(&self) -> SubscriptionBuilder<'_> {
        SubscriptionBuilder {
            registrar: self,
            on_applied: None,
        }
    }

    /// Subscribes to `query` without a callback.
    ///
    /// Fails with [`LinkError::NotInitialized`] if there is no current
    /// connection and with [`LinkError::ConnectionUnavailable`] if the
    /// current one already failed.
    pub fn subscribe(&self, query: impl Into<String>) -> Result<SubscriptionHandle> {
        self.register(query.into(), None)
    }

    fn register(&self, query: String, on_applied: Option<OnApplied>) -> Result<SubscriptionHandle> {
        let connection = self.manager.current()?;
        let request_id = connection.allocate_request_id();
        let (applied_tx, applied_rx) = watch::channel(false);

        let handle = SubscriptionHandle {
            id: request_id,
            query: Arc::from(query),
            connection_epoch: connection.epoch(),
            connection: Arc::downgrade(&connection),
            applied: applied_rx,
        };

        let hook = on_applied.map(|callback| {
            let handle = handle.clone();
            Box::new(move || {
                tokio::spawn(callback(handle));
            }) as AppliedHook
        });

        connection.register_subscription(request_id, &handle.query, applied_tx, hook)?;
        Ok(handle)
    }
}

/// One subscription request being put together.
#[must_use = "a builder does nothing until `subscribe` is called"]
pub struct SubscriptionBuilder<'a> {
    registrar: &'a SubscriptionRegistrar,
    on_applied: Option<OnApplied>,
}

impl<'a> SubscriptionBuilder<'a> {
    /// Runs `f` once the server acknowledged the subscription. The returned
    /// future is spawned; `subscribe` never waits for it.
    pub fn on_applied<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(SubscriptionHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_applied = Some(Box::new(move |handle| f(handle).boxed()));
        self
    }

    /// Sends the subscribe request for `query`.
    pub fn subscribe(self, query: impl Into<String>) -> Result<SubscriptionHandle> {
        self.registrar.register(query.into(), self.on_applied)
    }
}

impl fmt::Debug for SubscriptionBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionBuilder")
            .field("on_applied", &self.on_applied.is_some())
            .finish()
    }
}

/// A subscription requested from the server.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: u64,
    query: Arc<str>,
    connection_epoch: u64,
    connection: Weak<Connection>,
    applied: watch::Receiver<bool>,
}

impl SubscriptionHandle {
    /// Request id, unique per connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Query text as sent.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Epoch of the connection the request went out on.
    pub fn connection_epoch(&self) -> u64 {
        self.connection_epoch
    }

    /// `true` once the server acknowledged the subscription.
    pub fn is_applied(&self) -> bool {
        *self.applied.borrow()
    }

    /// Waits for the acknowledgment.
    ///
    /// Fails with [`LinkError::TransportDisconnect`] if the connection ended
    /// before the server acknowledged.
    pub async fn applied(&self) -> Result<()> {
        let mut applied = self.applied.clone();
        applied.wait_for(|applied| *applied).await.map(|_| ()).map_err(|_| {
            LinkError::TransportDisconnect(format!(
                "connection {} ended before subscription {} was applied",
                self.connection_epoch, self.id
            ))
        })
    }

    /// Applied, and the owning connection is still Active.
    pub fn is_live(&self) -> bool {
        self.is_applied() && self.connection().is_some_and(|c| c.is_active())
    }

    /// The owning connection, while something else keeps it alive.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("connection_epoch", &self.connection_epoch)
            .field("applied", &self.is_applied())
            .finish()
    }
}
