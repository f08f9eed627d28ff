//! Top-level task supervision: starts the backend, the ingest listeners, and
//! the observer WebSocket server under one `CancellationToken`, and brings
//! everything down together on shutdown.
//!
//! Grounded on the old server's `shutdown_signal()` (Ctrl-C/SIGTERM race)
//! generalized from axum's own `with_graceful_shutdown` to a shared
//! `tokio_util::sync::CancellationToken` so ingest listeners can be told to
//! stop the same way the web server is.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::backend::Backend;
use crate::config::Config;
use crate::ingest::{self, ListenAddr};

pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let backend_handle = Backend::create(
        &config.db_path,
        config.db_low_size,
        config.db_high_size,
        config.db_enable_archive,
        config.db_disable_journal,
    )
    .await?;
    let backend = backend_handle.backend.clone();

    let listen_addrs: Vec<ListenAddr> = config
        .syslog_addrs
        .iter()
        .map(|raw| ingest::parse_listen_addr(raw))
        .collect::<anyhow::Result<_>>()?;
    let ingest_handles = ingest::spawn_listeners(
        &listen_addrs,
        config.syslog_pem_path.as_deref(),
        backend.clone(),
        cancel.clone(),
    )?;

    let ui_router = crate::ui::router(backend.clone());
    let ui_socket_addr = config.ui_socket_addr()?;
    let ui_listener = tokio::net::TcpListener::bind(ui_socket_addr).await?;
    info!(addr = %ui_socket_addr, "listening for observers");
    let ui_cancel = cancel.clone();
    let ui_handle = tokio::spawn(async move {
        let result = axum::serve(ui_listener, ui_router)
            .with_graceful_shutdown(ui_cancel.cancelled_owned())
            .await;
        if let Err(e) = result {
            error!(error = %e, "observer web server exited with error");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutting down");
    cancel.cancel();

    // give in-flight connections a moment to notice cancellation before we
    // join everything and tear down the database worker.
    tokio::time::sleep(Duration::from_millis(100)).await;

    for handle in ingest_handles {
        let _ = handle.await;
    }
    let _ = ui_handle.await;
    backend_handle.shutdown().await;

    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
