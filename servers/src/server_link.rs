use std::sync::Arc;

use anyhow::Result;
use link_core::connections::{LifecycleHooks, WsTransport};
use link_core::LifecycleManager;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod link_logic;
use link_logic::{config, supervisor::Supervisor};

async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!("Could not listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();

    let config = config::load_config();
    let _guard = link_core::loggers::setup_logging(&config.logger_options())?;
    let settings = config.into_settings()?;
    tracing::info!(link = ?settings.link, queries = settings.queries.len(), "starting server_link");

    let hooks = LifecycleHooks::new().on_connect_error(|connection, _error| {
        tracing::warn!(epoch = connection.epoch(), "handshake rejected, supervisor will retry");
    });
    let transport = WsTransport::new().with_connect_timeout(settings.connect_timeout);
    let manager = Arc::new(LifecycleManager::new(Arc::new(transport)).with_observer(Arc::new(hooks)));

    let shutdown = CancellationToken::new();
    let mut supervisor_handle = tokio::spawn(Supervisor::new(manager, settings).run(shutdown.clone()));

    tokio::select! {
        _ = shutdown_signal() => {
            shutdown.cancel();
            supervisor_handle.await??;
        }
        finished = &mut supervisor_handle => {
            finished??;
        }
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}
