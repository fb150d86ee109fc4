//! tskmgr Control Plane Server

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tskmgr_control_plane::{http, AppState, AssignmentPolicy, Config};

/// Run/task coordination server.
#[derive(Parser)]
#[command(name = "tskmgr-control-plane")]
#[command(about = "Coordinate runs and tasks across polling runners", long_about = None)]
struct Args {
    /// HTTP bind address
    #[arg(long)]
    bind: Option<String>,

    /// Longest wait for a record lock, in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Attempts per operation when a record lock times out
    #[arg(long)]
    lock_retries: Option<u32>,

    /// Keep handing out Pending tasks of a failed run unless it is fail-fast
    #[arg(long)]
    drain_after_failure: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::default();
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(ms) = self.lock_timeout_ms {
            config.lock_timeout_ms = ms;
        }
        if let Some(retries) = self.lock_retries {
            config.lock_retries = retries;
        }
        if self.drain_after_failure {
            config.assignment_policy = AssignmentPolicy::DrainUnlessFailFast;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let addr: SocketAddr = config.bind_addr.parse()?;
    info!(
        addr = %addr,
        lock_timeout_ms = config.lock_timeout_ms,
        lock_retries = config.lock_retries,
        policy = ?config.assignment_policy,
        "Starting tskmgr control plane"
    );

    let state = AppState::new(config);
    let router = http::create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
