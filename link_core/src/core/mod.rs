//! # Core Engine Module
//!
//! The pieces embedding code talks to:
//!
//! - **`lifecycle_manager`**: owns the single current connection, replaces it
//!   on `initialize` and clears it when the session ends.
//! - **`readiness`**: the bounded polling loop dependents use to wait until
//!   the current connection is Active.
//! - **`registrar`**: registers query subscriptions against the current
//!   connection and reports their acknowledgment.

/// Owner of the current connection.
pub mod lifecycle_manager;
/// Bounded readiness polling.
pub mod readiness;
/// Query subscription registration.
pub mod registrar;

pub use lifecycle_manager::LifecycleManager;
pub use readiness::{ReadinessOptions, ReadinessWaiter};
pub use registrar::{SubscriptionBuilder, SubscriptionHandle, SubscriptionRegistrar};
