use clap::Parser;
use link_core::loggers::LoggerOptions;
use link_core::{LinkConfig, ReadinessOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[clap(about = "Keeps a link to the real-time database alive and its subscriptions registered", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RTLINK_URI", help = "Websocket endpoint of the real-time service (ws:// or wss://).")]
    pub uri: Option<String>,

    #[clap(long, env = "RTLINK_MODULE", help = "Module (database namespace) to attach to.")]
    pub module_name: Option<String>,

    #[clap(long, env = "RTLINK_AUTH_TOKEN", hide_env_values = true, help = "Credential presented on handshake.")]
    pub auth_token: Option<String>,

    #[clap(long = "query", env = "RTLINK_QUERIES", value_delimiter = ';', help = "Query to subscribe to once connected. Repeat, or separate with ';' in the environment.")]
    pub queries: Option<Vec<String>>,

    #[clap(long, env = "RTLINK_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RTLINK_LOG_DIR", help = "Directory for the rolling JSON log file.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RTLINK_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error) or filter directive.")]
    pub log_level: Option<String>,

    #[clap(long, env = "RTLINK_POLL_INTERVAL_MS", help = "Delay in milliseconds between readiness checks.")]
    pub poll_interval_ms: Option<u64>,

    #[clap(long, env = "RTLINK_MAX_ATTEMPTS", help = "Failed readiness checks tolerated before the attempt is abandoned.")]
    pub max_attempts: Option<u32>,

    #[clap(long, env = "RTLINK_CONNECT_TIMEOUT_MS", help = "Bound in milliseconds on opening the websocket.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "RTLINK_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds before reconnecting.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "RTLINK_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds before reconnecting.")]
    pub reconnect_max_delay_ms: Option<u64>,
}

impl Config {
    // 'other' overrides 'self' wherever it has a value
    fn merge(self, other: Config) -> Config {
        Config {
            uri: other.uri.or(self.uri),
            module_name: other.module_name.or(self.module_name),
            auth_token: other.auth_token.or(self.auth_token),
            queries: other.queries.or(self.queries),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            max_attempts: other.max_attempts.or(self.max_attempts),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            log_level: Some("info".to_string()),
            poll_interval_ms: Some(500),
            max_attempts: Some(10),
            connect_timeout_ms: Some(10_000),
            reconnect_base_delay_ms: Some(1_000),
            reconnect_max_delay_ms: Some(60_000),
            ..Default::default()
        }
    }

    /// Logging options for `link_core::loggers::setup_logging`.
    pub fn logger_options(&self) -> LoggerOptions {
        LoggerOptions {
            level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
            log_dir: self.log_dir.clone(),
            file_prefix: "server_link".to_string(),
            ..LoggerOptions::default()
        }
    }

    /// Resolves the final settings. A missing endpoint, module or token is
    /// fatal.
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        let link = LinkConfig::new(
            self.uri.unwrap_or_default(),
            self.module_name.unwrap_or_default(),
            self.auth_token.unwrap_or_default(),
        );
        link.validate()?;

        let defaults = Config::defaults();
        let ms = |value: Option<u64>, fallback: Option<u64>| {
            Duration::from_millis(value.or(fallback).unwrap_or_default())
        };

        let reconnect_base_delay = ms(self.reconnect_base_delay_ms, defaults.reconnect_base_delay_ms);
        let reconnect_max_delay = ms(self.reconnect_max_delay_ms, defaults.reconnect_max_delay_ms);
        if reconnect_base_delay.is_zero() || reconnect_base_delay > reconnect_max_delay {
            anyhow::bail!(
                "reconnect delays must satisfy 0 < base ({}ms) <= max ({}ms)",
                reconnect_base_delay.as_millis(),
                reconnect_max_delay.as_millis()
            );
        }

        Ok(Settings {
            link,
            queries: self
                .queries
                .unwrap_or_default()
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            readiness: ReadinessOptions::new(
                ms(self.poll_interval_ms, defaults.poll_interval_ms),
                self.max_attempts.or(defaults.max_attempts).unwrap_or_default(),
            ),
            connect_timeout: ms(self.connect_timeout_ms, defaults.connect_timeout_ms),
            reconnect_base_delay,
            reconnect_max_delay,
        })
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub link: LinkConfig,
    pub queries: Vec<String>,
    pub readiness: ReadinessOptions,
    pub connect_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        tracing::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    match fs::read_to_string(path) {
        Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
            Ok(file_config) => Some(file_config),
            Err(e) => {
                tracing::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, the JSON config file and CLI/environment values, in
/// that order of increasing precedence.
pub fn load_config_with(cli_args: Config) -> Config {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_link.conf"));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli_args)
}

pub fn load_config() -> Config {
    load_config_with(Config::parse())
}
