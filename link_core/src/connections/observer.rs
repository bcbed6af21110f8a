//! # Lifecycle Observers
//!
//! Connection events are dispatched to a list of [`LifecycleObserver`]s.
//! The factory always puts its own [`LoggingObserver`] at the head of the
//! list so every event is logged before any embedding code runs. A panic in
//! one observer is caught and logged and does not stop the others.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::connections::connection::{Connection, Identity};
use crate::error::LinkError;

/// Receives connection lifecycle events. Every method defaults to doing
/// nothing, so implementors only override what they need.
pub trait LifecycleObserver: Send + Sync {
    /// The handshake was acknowledged.
    fn on_connect(&self, _connection: &Arc<Connection>, _identity: &Identity) {}

    /// The handshake failed.
    fn on_connect_error(&self, _connection: &Arc<Connection>, _error: &LinkError) {}

    /// An Active session ended. `error` is `None` for a clean close.
    fn on_disconnect(&self, _connection: &Arc<Connection>, _error: Option<&LinkError>) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl LifecycleObserver for LoggingObserver {
    fn on_connect(&self, connection: &Arc<Connection>, identity: &Identity) {
        tracing::info!(
            epoch = connection.epoch(),
            module = connection.module_name(),
            %identity,
            "connected to real-time service"
        );
    }

    fn on_connect_error(&self, connection: &Arc<Connection>, error: &LinkError) {
        tracing::error!(
            epoch = connection.epoch(),
            uri = connection.uri(),
            %error,
            "connection to real-time service failed"
        );
    }

    fn on_disconnect(&self, connection: &Arc<Connection>, error: Option<&LinkError>) {
        match error {
            Some(error) => tracing::warn!(
                epoch = connection.epoch(),
                %error,
                "disconnected from real-time service"
            ),
            None => tracing::warn!(epoch = connection.epoch(), "disconnected from real-time service"),
        }
    }
}

type OnConnectFn = Arc<dyn Fn(&Arc<Connection>, &Identity) + Send + Sync>;
type OnConnectErrorFn = Arc<dyn Fn(&Arc<Connection>, &LinkError) + Send + Sync>;
type OnDisconnectFn = Arc<dyn Fn(&Arc<Connection>, Option<&LinkError>) + Send + Sync>;

/// Closure-based observer for embedders that do not want a dedicated type.
///
/// ```rust
/// use link_core::connections::LifecycleHooks;
///
/// let hooks = LifecycleHooks::new()
///     .on_connect(|_conn, identity| println!("connected as {identity}"))
///     .on_disconnect(|_conn, _err| println!("gone"));
/// ```
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    on_connect: Option<OnConnectFn>,
    on_connect_error: Option<OnConnectErrorFn>,
    on_disconnect: Option<OnDisconnectFn>,
}

impl LifecycleHooks {
    /// No hooks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` when the handshake is acknowledged.
    pub fn on_connect(
        mut self,
        f: impl Fn(&Arc<Connection>, &Identity) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Runs `f` when the handshake fails.
    pub fn on_connect_error(
        mut self,
        f: impl Fn(&Arc<Connection>, &LinkError) + Send + Sync + 'static,
    ) -> Self {
        self.on_connect_error = Some(Arc::new(f));
        self
    }

    /// Runs `f` when an Active session ends.
    pub fn on_disconnect(
        mut self,
        f: impl Fn(&Arc<Connection>, Option<&LinkError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_connect_error", &self.on_connect_error.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

impl LifecycleObserver for LifecycleHooks {
    fn on_connect(&self, connection: &Arc<Connection>, identity: &Identity) {
        if let Some(f) = &self.on_connect {
            f(connection, identity);
        }
    }

    fn on_connect_error(&self, connection: &Arc<Connection>, error: &LinkError) {
        if let Some(f) = &self.on_connect_error {
            f(connection, error);
        }
    }

    fn on_disconnect(&self, connection: &Arc<Connection>, error: Option<&LinkError>) {
        if let Some(f) = &self.on_disconnect {
            f(connection, error);
        }
    }
}

/// Ordered observer list used by a connection's event task.
#[derive(Clone)]
pub(crate) struct ObserverChain {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl ObserverChain {
    /// Logging first, then `observers` in order.
    pub(crate) fn new(observers: Vec<Arc<dyn LifecycleObserver>>) -> Self {
        let mut chain: Vec<Arc<dyn LifecycleObserver>> = Vec::with_capacity(observers.len() + 1);
        chain.push(Arc::new(LoggingObserver));
        chain.extend(observers);
        Self { observers: chain }
    }

    pub(crate) fn connect(&self, connection: &Arc<Connection>, identity: &Identity) {
        self.each("on_connect", |o| o.on_connect(connection, identity));
    }

    pub(crate) fn connect_error(&self, connection: &Arc<Connection>, error: &LinkError) {
        self.each("on_connect_error", |o| o.on_connect_error(connection, error));
    }

    pub(crate) fn disconnect(&self, connection: &Arc<Connection>, error: Option<&LinkError>) {
        self.each("on_disconnect", |o| o.on_disconnect(connection, error));
    }

    fn each(&self, event: &'static str, call: impl Fn(&dyn LifecycleObserver)) {
        for (index, observer) in self.observers.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(observer.as_ref())));
            if outcome.is_err() {
                tracing::error!(event, observer = index, "lifecycle observer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use url::Url;

    fn connection() -> Arc<Connection> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Connection::new(
            Url::parse("ws://127.0.0.1:3000").unwrap(),
            "chat".into(),
            "secret".into(),
            1,
            tx,
        ))
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl LifecycleObserver for Recorder {
        fn on_connect(&self, _connection: &Arc<Connection>, identity: &Identity) {
            self.log.lock().unwrap().push(format!("{}:{}", self.name, identity));
        }
    }

    struct Panicker;

    impl LifecycleObserver for Panicker {
        fn on_connect(&self, _connection: &Arc<Connection>, _identity: &Identity) {
            panic!("observer bug");
        }
    }

    #[test]
    fn observers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ObserverChain::new(vec![
            Arc::new(Recorder { name: "first", log: Arc::clone(&log) }),
            Arc::new(Recorder { name: "second", log: Arc::clone(&log) }),
        ]);
        chain.connect(&connection(), &Identity::new("id1"));
        assert_eq!(*log.lock().unwrap(), vec!["first:id1", "second:id1"]);
    }

    #[test]
    fn panicking_observer_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ObserverChain::new(vec![
            Arc::new(Panicker),
            Arc::new(Recorder { name: "after", log: Arc::clone(&log) }),
        ]);
        chain.connect(&connection(), &Identity::new("id1"));
        assert_eq!(*log.lock().unwrap(), vec!["after:id1"]);
    }

    #[test]
    fn logging_observer_heads_the_chain() {
        let chain = ObserverChain::new(Vec::new());
        assert_eq!(chain.observers.len(), 1);
    }

    #[test]
    fn hooks_only_fire_registered_closures() {
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        let hooks = LifecycleHooks::new().on_disconnect(move |_, err| {
            assert!(err.is_none());
            *counter.lock().unwrap() += 1;
        });
        let conn = connection();
        LifecycleObserver::on_connect(&hooks, &conn, &Identity::new("ignored"));
        LifecycleObserver::on_disconnect(&hooks, &conn, None);
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}
