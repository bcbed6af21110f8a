//! # Link Configuration
//!
//! The three values every connection needs: the service endpoint, the module
//! (database namespace) to attach to and the auth token presented in the
//! handshake. Values usually come from the environment; see
//! [`LinkConfig::from_env`].

use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LinkError, Result};

/// Environment variable holding the service endpoint.
pub const ENV_URI: &str = "RTLINK_URI";
/// Environment variable holding the module name.
pub const ENV_MODULE: &str = "RTLINK_MODULE";
/// Environment variable holding the auth token.
pub const ENV_AUTH_TOKEN: &str = "RTLINK_AUTH_TOKEN";

/// Static configuration of the link.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// Websocket endpoint of the real-time service (`ws://` or `wss://`).
    pub uri: String,
    /// Logical database / namespace identifier.
    pub module_name: String,
    /// Credential sent with the handshake.
    pub auth_token: String,
}

impl LinkConfig {
    /// Creates a configuration from its three parts. No validation happens
    /// here; the factory validates before building.
    pub fn new(
        uri: impl Into<String>,
        module_name: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            module_name: module_name.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Reads [`ENV_URI`], [`ENV_MODULE`] and [`ENV_AUTH_TOKEN`] from the
    /// process environment and validates the result.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LinkConfig::from_env`] with an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch = |field: &'static str, key: &str| {
            lookup(key).ok_or_else(|| {
                LinkError::configuration(field, format!("environment variable {key} is not present"))
            })
        };

        let config = Self {
            uri: fetch("uri", ENV_URI)?,
            module_name: fetch("module_name", ENV_MODULE)?,
            auth_token: fetch("auth_token", ENV_AUTH_TOKEN)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required field is present and that the endpoint is
    /// a websocket URL.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        if self.module_name.trim().is_empty() {
            return Err(LinkError::configuration("module_name", "must not be empty"));
        }
        if self.auth_token.trim().is_empty() {
            return Err(LinkError::configuration("auth_token", "must not be empty"));
        }
        Ok(())
    }

    /// Parses [`LinkConfig::uri`] into a websocket URL.
    pub fn endpoint(&self) -> Result<Url> {
        if self.uri.trim().is_empty() {
            return Err(LinkError::configuration("uri", "must not be empty"));
        }
        let url = Url::parse(self.uri.trim())
            .map_err(|e| LinkError::configuration("uri", e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(LinkError::configuration(
                "uri",
                format!("unsupported scheme `{other}`, expected ws or wss"),
            )),
        }
    }
}

// The token never reaches logs.
impl fmt::Debug for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfig")
            .field("uri", &self.uri)
            .field("module_name", &self.module_name)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}
