use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;

use crate::models::ServiceConfig;
use crate::server::{self, AppState};
use crate::storage::memory::MemoryStore;

const APP_DIR: &str = "encryption-job-service";

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

fn read_config(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ServiceConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Load the ServiceConfig using this resolution order:
///   1. `--config` CLI flag (passed as config_path)
///   2. `EJS_CONFIG_DIR` environment variable
///   3. Platform config dir (`dirs::config_dir()/encryption-job-service/config.json`)
///   4. `{data_dir}/config.json`
///   5. `ServiceConfig::default()`
pub fn load_config(config_path: Option<&Path>) -> Result<ServiceConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config(path);
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    let mut candidates = Vec::new();
    if let Ok(config_dir) = std::env::var("EJS_CONFIG_DIR") {
        candidates.push(PathBuf::from(config_dir).join("config.json"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join(APP_DIR).join("config.json"));
    }
    candidates.push(resolve_data_dir(None).join("config.json"));

    for path in candidates {
        if path.exists() {
            return read_config(&path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(ServiceConfig::default())
}

/// Resolve the data directory: explicit override, then `EJS_DATA_DIR`,
/// then the platform data dir.
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("EJS_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Log to stderr and, when a data dir is given, to a daily rolling
/// `service.log` inside it. The returned guard must outlive the service.
pub fn init_tracing(data_dir: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(verbose).into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match data_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "service.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);

            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            if result.is_ok() {
                tracing::info!("Logging to stderr and {}", dir.join("service.log").display());
            }
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Service pieces
// ---------------------------------------------------------------------------

/// Build the store: snapshot-backed under `data_dir` when `persist` is set.
pub async fn build_store(config: &ServiceConfig) -> Result<Arc<MemoryStore>> {
    let store = match (&config.data_dir, config.persist) {
        (Some(dir), true) => MemoryStore::with_snapshot(dir.clone(), config.job_ttl()).await?,
        (None, true) => anyhow::bail!("persist is enabled but no data directory is configured"),
        (_, false) => MemoryStore::new(config.job_ttl()),
    };
    Ok(Arc::new(store))
}

/// Periodically drop expired records until `shutdown` fires.
pub fn spawn_purger(
    store: Arc<MemoryStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("Purged {} expired records", n),
                        Err(e) => tracing::error!("Failed to purge expired records: {}", e),
                    }
                }
            }
        }
        tracing::debug!("Purge task stopped");
    })
}

/// Serve the API on `listener` until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let router = server::create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("HTTP server received shutdown signal");
        })
        .await
        .context("HTTP server failed")
}

/// Wait for Ctrl+C, SIGTERM (Unix) or an API stop request.
async fn wait_for_shutdown(shutdown: &CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Received API shutdown signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Received API shutdown signal");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Service bootstrap
// ---------------------------------------------------------------------------

/// Start the service in the foreground and block until it shuts down.
pub async fn start_service(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    host_override: Option<&str>,
    port_override: Option<u16>,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;

    if let Some(h) = host_override {
        config.host = h.to_string();
    }
    if let Some(p) = port_override {
        config.port = p;
    }

    let data_dir = match (data_dir_override, &config.data_dir) {
        (Some(d), _) => d.to_path_buf(),
        (None, Some(d)) => d.clone(),
        (None, None) => resolve_data_dir(None),
    };
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;
    config.data_dir = Some(data_dir.clone());

    let _log_guard = init_tracing(Some(&data_dir), verbose);
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Arc::new(config);
    let store = build_store(&config).await?;
    let shutdown = CancellationToken::new();
    let state = AppState::new(
        store.clone(),
        store.clone(),
        Arc::clone(&config),
        shutdown.clone(),
    );

    let purger = spawn_purger(store, config.purge_interval(), shutdown.clone());

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Service started. Listening on http://{}", bind_addr);

    let server_handle = tokio::spawn(serve(listener, state));

    wait_for_shutdown(&shutdown).await?;
    tracing::info!("Beginning graceful shutdown sequence...");
    // Stops the HTTP server, the purge task and any batch still running.
    shutdown.cancel();

    let _ = purger.await;
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("{:#}", e),
        Err(e) => tracing::error!("HTTP server task panicked: {}", e),
    }

    tracing::info!("Service exited cleanly.");
    Ok(())
}
