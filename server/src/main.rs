//! Tumor Triage Server
//!
//! HTTP front end for the brain MRI classifier: an upload page, a health
//! endpoint and `POST /predict`. The model loads in the background after the
//! listener is bound; a failed load shuts the server down.

mod routes;
mod state;
mod upload;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use tumor_triage::utils::logging::{init_logging, LogConfig, LogLevel};
use tumor_triage::{backend_name, ServiceConfig};

use crate::state::{load_failure_reason, AppState, ModelStatus, ServerConfig, SharedState};

/// Tumor Triage Server
#[derive(Parser, Debug)]
#[command(name = "tumor-triage-server")]
#[command(version)]
#[command(about = "HTTP upload service for brain MRI triage")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TRIAGE_PORT", default_value = "5000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "TRIAGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// JSON service configuration
    #[arg(short, long, env = "TRIAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to trained checkpoint (.pth or .safetensors)
    #[arg(short, long, env = "TRIAGE_MODEL")]
    model: Option<PathBuf>,

    /// Classes ranked per prediction
    #[arg(long, env = "TRIAGE_TOP_K")]
    top_k: Option<usize>,

    /// Stage uploads in this directory instead of decoding them in memory
    #[arg(long, env = "TRIAGE_UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// Maximum upload size in MiB
    #[arg(long, env = "TRIAGE_MAX_UPLOAD_MB", default_value = "16")]
    max_upload_mb: usize,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose
    #[arg(long, env = "TRIAGE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::production()
    };
    if let Some(level) = &cli.log_level {
        log_config = log_config.with_level(LogLevel::parse_lossy(level));
    }
    let _ = init_logging(&log_config);

    // Build configuration
    let mut service = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(model) = cli.model {
        service = service.with_checkpoint(model);
    }
    if let Some(top_k) = cli.top_k {
        service = service.with_top_k(top_k);
    }
    service.validate()?;

    let config = ServerConfig {
        service,
        upload_dir: cli.upload_dir,
        max_upload_bytes: cli.max_upload_mb * 1024 * 1024,
    };

    info!("Tumor Triage Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Checkpoint: {:?}", config.service.checkpoint);
    info!("  Top-K:      {}", config.service.top_k);
    info!("  Uploads:    {:?}", config.upload_dir);
    info!("  Backend:    {}", backend_name());

    // Create shared state
    let state = Arc::new(AppState::new(config));

    // Bind before loading so health checks can report progress
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);

    let (failed_tx, failed_rx) = oneshot::channel();
    tokio::spawn(load_model(Arc::clone(&state), failed_tx));

    let app = routes::router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(failed_rx))
        .await?;

    if state.model_status().await == ModelStatus::Failed {
        anyhow::bail!("model failed to load; server stopped");
    }

    Ok(())
}

/// Load the checkpoint on the blocking pool and publish the result
async fn load_model(state: SharedState, failed: oneshot::Sender<()>) {
    let service = state.config.service.clone();
    let loaded = tokio::task::spawn_blocking(move || service.load_classifier()).await;

    let reason = match loaded {
        Ok(Ok(classifier)) => {
            if let Some(report) = classifier.report() {
                info!(
                    "Model loaded successfully: {} tensors in {:.0} ms",
                    report.applied, report.load_time_ms
                );
            }
            state.set_ready(classifier).await;
            return;
        }
        Ok(Err(e)) => load_failure_reason(&e),
        Err(e) => format!("loader task failed: {}", e),
    };

    error!("Error loading model: {}", reason);
    state.set_failed(reason).await;
    let _ = failed.send(());
}

/// Resolves on Ctrl-C or when the model fails to load
async fn shutdown_signal(model_failed: oneshot::Receiver<()>) {
    let failed = async {
        // The sender is dropped without sending once the model is ready
        if model_failed.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        _ = failed => warn!("Shutting down: model failed to load"),
    }
}
