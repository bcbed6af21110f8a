//! # link_core
//!
//! Client-side link to a shared real-time database. One process holds one
//! logical streaming connection; this crate builds it, tracks its lifecycle,
//! lets dependents wait until it is usable and registers query
//! subscriptions against it.
//!
//! - **`configs`**: endpoint, module and credential configuration.
//! - **`connections`**: the connection handle, the factory that builds it,
//!   lifecycle observers and the transports that carry the session.
//! - **`core`**: the lifecycle manager, the readiness waiter and the
//!   subscription registrar.
//! - **`loggers`**: `tracing` subscriber setup for binaries.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Link configuration and its validation.
pub mod configs;
/// Connection handle, factory, observers and transports.
pub mod connections;
/// Lifecycle manager, readiness waiting and subscriptions.
pub mod core;
/// Error taxonomy shared by every module.
pub mod error;
/// Logging setup built on `tracing-subscriber`.
#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the types most embedders reach for.
pub use crate::configs::link_config::LinkConfig;
pub use crate::connections::connection::{Connection, ConnectionState, Identity};
pub use crate::connections::factory::ConnectionFactory;
pub use crate::connections::observer::LifecycleObserver;
pub use crate::core::lifecycle_manager::LifecycleManager;
pub use crate::core::readiness::{ReadinessOptions, ReadinessWaiter};
pub use crate::core::registrar::{SubscriptionBuilder, SubscriptionHandle, SubscriptionRegistrar};
pub use crate::error::{LinkError, Result};
