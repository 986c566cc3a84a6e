//! mender service binary.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use mender::api::{self, ApiState};
use mender::config::Config;
use mender::events::EventBus;
use mender::llm::FallbackClient;
use mender::orchestrator::Orchestrator;
use mender::registry::RunRegistry;

/// Size at which the log file rotates, per segment.
const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Rotated segments kept beside the live log (`.1`, `.2`, `.3`).
const MAX_ROTATED_LOGS: u32 = 3;

#[derive(Parser)]
#[command(name = "mender")]
#[command(about = "Autonomous repair agent for failing repositories", long_about = None)]
#[command(version)]
struct Cli {
    /// Override the HTTP listen port (defaults to $PORT, then 3000)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose console output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let _log_guard = setup_logging(&config, cli.verbose)?;

    info!(port = config.port, "starting mender");

    let registry = Arc::new(RunRegistry::new());
    let bus = EventBus::new();
    let model = Arc::new(FallbackClient::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
        config.llm_models.clone(),
    ));
    if config.llm_api_key.is_none() {
        tracing::warn!("no LLM key configured; fix generation will run degraded");
    }

    let orchestrator = Orchestrator::new(config.clone(), registry.clone(), bus.clone(), model);

    let state = Arc::new(ApiState {
        config: config.clone(),
        registry,
        bus,
        orchestrator,
        start_time: Instant::now(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, api::router(state))
        .await
        .context("server error")?;

    Ok(())
}

/// Initializes console logging plus a size-rotated file log.
///
/// The returned guard must stay alive for the process lifetime or buffered
/// file output is lost.
fn setup_logging(
    config: &Config,
    verbose: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    rotate_log_if_needed(&config.log_file);

    let log_dir = config.log_file.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir).context("failed to create log directory")?;
    }
    let file_appender = tracing_appender::rolling::never(
        log_dir.unwrap_or_else(|| Path::new(".")),
        config
            .log_file
            .file_name()
            .context("log path has no file name")?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(guard)
}

/// Startup size check: shift `.2`→`.3`, `.1`→`.2`, live→`.1` when the live
/// log has outgrown a segment.
fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let base = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{base}.{i}"), format!("{base}.{}", i + 1));
    }
    let _ = std::fs::rename(log_path, format!("{base}.1"));
}
