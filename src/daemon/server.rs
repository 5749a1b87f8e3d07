//! Daemon start-up and shutdown
//!
//! Order: lock file, event hub, client tracker, workspace registry, HTTP
//! listener. Shutdown runs in reverse once a signal arrives or the shutdown
//! endpoint cancels the token.

use super::client_tracker::ClientTracker;
use super::lockfile::{self, LockError, LockFile};
use crate::api::{create_router, ServerState};
use crate::events::{EventEmitter, EventHub};
use crate::i18n;
use crate::workspace::WorkspaceRegistry;
use crate::Config;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run the daemon in the foreground until shutdown.
///
/// Fails when another healthy daemon holds the lock, when the centralized
/// database cannot be migrated, or when the port cannot be bound.
pub async fn run_daemon(config: Config, lock_path: &Path) -> Result<()> {
    i18n::set_default_lang(config.lang);

    let lock = LockFile::for_current_process(config.api_port);
    let guard = match lockfile::acquire(lock_path, &lock).await {
        Ok(guard) => guard,
        Err(LockError::AlreadyRunning(url)) => {
            anyhow::bail!("daemon already running at {url}");
        }
        Err(e) => return Err(e).context("failed to acquire daemon lock"),
    };

    let shutdown = CancellationToken::new();
    let hub = EventHub::start(shutdown.clone());
    let tracker = ClientTracker::new();
    let sweeper = tracker.start_sweeper(shutdown.clone());

    let emitter: Arc<dyn EventEmitter> = Arc::new(hub.clone());
    let registry = Arc::new(WorkspaceRegistry::new(&config, Some(emitter)).context("failed to open workspace registry")?);

    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.api_host, config.api_port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let state = Arc::new(ServerState {
        registry: registry.clone(),
        hub,
        tracker,
        config: config.clone(),
        shutdown: shutdown.clone(),
        started_at: Instant::now(),
    });
    let app = create_router(state);

    info!(
        addr = %addr,
        url = %lock.daemon_url,
        pid = lock.pid,
        mode = ?config.mode,
        lang = %config.lang,
        version = crate::VERSION,
        "Gorev daemon started"
    );

    let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = shutdown_signal() => {}
                    _ = shutdown.cancelled() => info!("Shutdown requested"),
                }
                shutdown.cancel();
            }
        })
        .await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Client sweeper task join error: {}", e);
    }
    registry.close_all();
    guard.release();
    info!("Gorev daemon stopped");

    served.context("HTTP server failed")
}

/// Signal the lock owner and wait for its lock file to disappear.
///
/// Returns `false` when no daemon holds the lock. Falls back to the HTTP
/// shutdown endpoint where signalling is unavailable.
pub async fn stop_daemon(lock_path: &Path, timeout: Duration) -> Result<bool> {
    let Some(lock) = lockfile::read(lock_path)? else {
        return Ok(false);
    };
    if !lockfile::is_process_running(lock.pid) {
        warn!(pid = lock.pid, "Lock owner is not running, removing stale lock");
        lockfile::remove(lock_path)?;
        return Ok(false);
    }

    if let Err(e) = lockfile::terminate(lock.pid) {
        warn!(pid = lock.pid, "SIGTERM failed ({}), asking over HTTP", e);
        reqwest::Client::new()
            .post(format!("{}/api/v1/daemon/shutdown", lock.daemon_url.trim_end_matches('/')))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .context("shutdown request failed")?;
    }

    let deadline = Instant::now() + timeout;
    while lock_path.exists() {
        if Instant::now() >= deadline {
            anyhow::bail!("daemon (pid {}) did not stop within {:?}", lock.pid, timeout);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!(pid = lock.pid, "Daemon stopped");
    Ok(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
