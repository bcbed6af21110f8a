//! # Configuration Modules
//!
//! Static configuration for the link: where the real-time service lives,
//! which module to attach to and the credential used in the handshake.

/// Endpoint, module and credential configuration with validation.
pub mod link_config;
