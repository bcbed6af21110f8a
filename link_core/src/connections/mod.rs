//! # Connections Module
//!
//! Everything that touches the session with the remote real-time service:
//! the connection handle itself, the factory that builds and drives it, the
//! observer interface for lifecycle events and the transports that carry
//! the frames.

/// The connection handle and its state flag.
pub mod connection;
/// Builds connection handles and runs their event tasks.
pub mod factory;
/// In-process transport with a scriptable server end.
pub mod loopback;
/// Frames exchanged with the remote service.
pub mod messages;
/// Lifecycle observer interface and the stock observers.
pub mod observer;
/// The transport seam.
pub mod transport;
/// Websocket transport over `tokio-tungstenite`.
#[cfg(feature = "ws")]
pub mod ws_transport;

pub use connection::{Connection, ConnectionState, Identity};
pub use factory::ConnectionFactory;
pub use loopback::{loopback, LoopbackServer, LoopbackSession, LoopbackTransport};
pub use messages::{ClientMessage, ServerMessage};
pub use observer::{LifecycleHooks, LifecycleObserver};
pub use transport::{Handshake, Transport};
#[cfg(feature = "ws")]
pub use ws_transport::WsTransport;
