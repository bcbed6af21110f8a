//! # Lifecycle Manager
//!
//! Owns the one connection a process considers current. `initialize`
//! builds it through the [`ConnectionFactory`], a disconnect clears it, and
//! everything else reads it through [`LifecycleManager::current`].
//!
//! The reference lives behind a lock and is only ever swapped as a whole, so
//! readers see either the old connection or the new one. The manager is an
//! ordinary value; the application's composition root creates one and
//! shares it (usually as `Arc<LifecycleManager>`).
//!
//! ```text
//! Uninitialized --initialize--> Connecting --ack--> Active --disconnect--> Disconnected
//!                                   |                                          |
//!                                   +--handshake fails--> Failed               |
//!                     Failed / Disconnected --initialize--> Connecting <-------+
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use tokio_util::sync::CancellationToken;

use crate::configs::link_config::LinkConfig;
use crate::connections::connection::{Connection, ConnectionState};
use crate::connections::factory::ConnectionFactory;
use crate::connections::observer::LifecycleObserver;
use crate::connections::transport::Transport;
use crate::core::readiness::{ReadinessOptions, ReadinessWaiter};
use crate::error::{LinkError, Result};

/// Holder of the current connection reference.
#[derive(Default)]
struct CurrentSlot {
    current: RwLock<Option<Arc<Connection>>>,
    initialized: AtomicBool,
}

impl CurrentSlot {
    fn get(&self) -> Option<Arc<Connection>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, next: Option<Arc<Connection>>) -> Option<Arc<Connection>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    /// Clears the slot only if it still holds `connection`.
    fn clear_if(&self, connection: &Arc<Connection>) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(held) if Arc::ptr_eq(held, connection) => {
                *guard = None;
                true
            }
            _ => false,
        }
    }
}

/// Clears the manager's slot when its connection disconnects.
struct ClearOnDisconnect {
    slot: Weak<CurrentSlot>,
}

impl LifecycleObserver for ClearOnDisconnect {
    fn on_disconnect(&self, connection: &Arc<Connection>, _error: Option<&LinkError>) {
        if let Some(slot) = self.slot.upgrade() {
            if slot.clear_if(connection) {
                tracing::debug!(epoch = connection.epoch(), "current connection cleared");
            }
        }
    }
}

/// Owner of the process's single current connection.
pub struct LifecycleManager {
    factory: ConnectionFactory,
    slot: Arc<CurrentSlot>,
    observers: Vec<Arc<dyn LifecycleObserver>>,
    init_lock: Mutex<()>,
}

impl LifecycleManager {
    /// A manager whose connections travel over `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            factory: ConnectionFactory::new(transport),
            slot: Arc::new(CurrentSlot::default()),
            observers: Vec::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// A manager over the websocket transport.
    #[cfg(feature = "ws")]
    pub fn websocket() -> Self {
        Self::new(Arc::new(crate::connections::ws_transport::WsTransport::new()))
    }

    /// Adds observers handed to every connection this manager builds. They
    /// run after the factory's logging and after the manager has cleared a
    /// disconnected connection.
    pub fn with_observers(mut self, observers: impl IntoIterator<Item = Arc<dyn LifecycleObserver>>) -> Self {
        self.observers.extend(observers);
        self
    }

    /// Adds one observer; see [`LifecycleManager::with_observers`].
    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Makes sure a connection exists and returns it.
    ///
    /// While the current connection is Connecting or Active this returns it
    /// unchanged and `config` is ignored. Otherwise a new connection is
    /// built, replaces the old one and starts its handshake. Returns once
    /// the handle exists, not once it is Active.
    pub fn initialize(&self, config: &LinkConfig) -> Result<Arc<Connection>> {
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.slot.get() {
            if matches!(existing.state(), ConnectionState::Connecting | ConnectionState::Active) {
                tracing::debug!(
                    epoch = existing.epoch(),
                    state = ?existing.state(),
                    "initialize ignored, connection already in progress"
                );
                return Ok(existing);
            }
        }

        let mut observers: Vec<Arc<dyn LifecycleObserver>> = Vec::with_capacity(self.observers.len() + 1);
        observers.push(Arc::new(ClearOnDisconnect {
            slot: Arc::downgrade(&self.slot),
        }));
        observers.extend(self.observers.iter().cloned());

        let connection = self.factory.build(config, observers)?;
        if let Some(previous) = self.slot.replace(Some(Arc::clone(&connection))) {
            tracing::debug!(
                previous = previous.epoch(),
                next = connection.epoch(),
                "replacing current connection"
            );
        }
        self.slot.initialized.store(true, Ordering::SeqCst);
        Ok(connection)
    }

    /// The current connection.
    ///
    /// Fails with [`LinkError::NotInitialized`] if `initialize` never
    /// produced a connection or the last one was cleared by a disconnect or
    /// [`LifecycleManager::teardown`].
    pub fn current(&self) -> Result<Arc<Connection>> {
        self.slot.get().ok_or(LinkError::NotInitialized)
    }

    /// Lifecycle state as seen by dependents.
    pub fn state(&self) -> ConnectionState {
        match self.slot.get() {
            Some(connection) => connection.state(),
            None if self.slot.initialized.load(Ordering::SeqCst) => ConnectionState::Disconnected,
            None => ConnectionState::Uninitialized,
        }
    }

    /// Polls until the current connection is Active; see
    /// [`crate::core::readiness`] for the exact attempt accounting.
    pub async fn wait_until_ready(
        &self,
        options: ReadinessOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Connection>> {
        ReadinessWaiter::new(options).wait(self, cancel).await
    }

    /// Clears the current connection and closes it. Observers see the
    /// session end as usual. Returns the connection that was current.
    pub fn teardown(&self) -> Option<Arc<Connection>> {
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.slot.replace(None);
        if let Some(connection) = &previous {
            tracing::info!(epoch = connection.epoch(), "tearing down connection");
            connection.close();
        }
        previous
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("current", &self.slot.get())
            .field("observers", &self.observers.len())
            .finish()
    }
}
