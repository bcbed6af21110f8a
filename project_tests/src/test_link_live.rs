//! # Live Link Test
//!
//! Connects to a real service configured through `RTLINK_URI`,
//! `RTLINK_MODULE` and `RTLINK_AUTH_TOKEN` (a `.env` file works too),
//! subscribes to the given query and prints what happens.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use link_core::loggers::{setup_logging, LoggerOptions};
use link_core::{LifecycleManager, LinkConfig, ReadinessOptions, SubscriptionRegistrar};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Query to subscribe to once connected
    #[clap(short, long, default_value = "SELECT * FROM user")]
    query: String,

    /// Readiness poll interval in milliseconds
    #[clap(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Failed readiness checks tolerated
    #[clap(long, default_value_t = 10)]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let _guard = setup_logging(&LoggerOptions::default())?;

    let manager = Arc::new(LifecycleManager::websocket());
    let connection = manager.initialize(&LinkConfig::from_env()?)?;
    println!("[*] Connecting to {} (module {})...", connection.uri(), connection.module_name());

    let ready = manager
        .wait_until_ready(
            ReadinessOptions::new(Duration::from_millis(args.poll_interval_ms), args.max_attempts),
            None,
        )
        .await?;
    println!("[SUCCESS] Connected as {}", ready.identity().map(|i| i.as_str()).unwrap_or("?"));

    let registrar = SubscriptionRegistrar::new(Arc::clone(&manager));
    let handle = registrar.subscribe(args.query.as_str())?;
    handle.applied().await?;
    println!("[SUCCESS] Subscription {} applied: {}", handle.id(), handle.query());

    println!("[*] Holding the session until Ctrl-C or disconnect...");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            manager.teardown();
        }
        state = ready.closed() => {
            println!("[INFO] Session ended in state {:?}", state);
        }
    }
    Ok(())
}
