#![forbid(unsafe_code)]

//! `agentbench` session daemon binary.
//!
//! Loads configuration, restores sessions from the store, then serves
//! JSON-RPC on the configured Unix socket until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agentbench::context::AppContext;
use agentbench::resources::process::pid_alive;
use agentbench::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agentbench", about = "Coding agent session daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the socket path.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the state directory.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agentbench daemon bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }
    info!(
        socket = %config.socket_path.display(),
        state_dir = %config.state_dir.display(),
        "configuration loaded"
    );

    // ── Claim pid file ──────────────────────────────────
    let pid_path = config.pid_path();
    claim_pid_file(&pid_path)?;

    // ── Restore sessions and start services ─────────────
    let ctx = match AppContext::initialize(config).await {
        Ok(ctx) => ctx,
        Err(err) => {
            release_pid_file(&pid_path);
            return Err(err);
        }
    };
    let handles = match ctx.start_services() {
        Ok(handles) => handles,
        Err(err) => {
            ctx.shutdown(Vec::new()).await;
            release_pid_file(&pid_path);
            return Err(err);
        }
    };
    info!("agentbench ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    ctx.shutdown(handles).await;
    release_pid_file(&pid_path);
    info!("agentbench shut down");

    Ok(())
}

/// Write our pid, refusing to start if the recorded daemon is still alive.
fn claim_pid_file(path: &Path) -> Result<()> {
    if let Ok(raw) = std::fs::read_to_string(path) {
        if let Ok(pid) = raw.trim().parse::<u32>() {
            if pid != std::process::id() && pid_alive(pid) {
                return Err(AppError::Config(format!(
                    "daemon already running with pid {pid} ({})",
                    path.display()
                )));
            }
        }
        warn!(path = %path.display(), "replacing stale pid file");
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(())
}

fn release_pid_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            error!(%err, path = %path.display(), "failed to remove pid file");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
            let _ = ctrl_c.await;
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
