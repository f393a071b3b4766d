//! Development backend: honours the agent server's startup contract (port from the
//! environment, `/status`, `/api/agent/versions`) with no agent behind it.
//!
//! Startup knobs, read from the environment:
//! - `GOOSED_STUB_READY_DELAY_MS`: wait this long before binding the port.
//! - `GOOSED_STUB_NEVER_READY=1`: never bind; idle until killed.
//! - `GOOSED_STUB_ECHO_ENV=A,B`: print `A=<value>` lines to stdout at startup.
//! - `GOOSED_STUB_VERSION`: value reported as `current_version` (default "stub").

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use clap::{Parser, Subcommand};
use goose_host::backend::VersionsResponse;
use goose_host::env::PORT_VAR;
use std::time::Duration;

const DEFAULT_VERSION: &str = "stub";

#[derive(Parser)]
#[command(name = "goosed-stub")]
#[command(about = "Stand-in backend agent server for exercising goose-host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the backend HTTP surface on GOOSE_SERVER__PORT.
    Agent,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Agent => {
            if let Err(e) = run_agent().await {
                log::error!("stub backend failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

async fn run_agent() -> Result<()> {
    println!("pid={}", std::process::id());
    if let Ok(cwd) = std::env::current_dir() {
        println!("cwd={}", cwd.display());
    }
    if let Ok(names) = std::env::var("GOOSED_STUB_ECHO_ENV") {
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            println!("{}={}", name, std::env::var(name).unwrap_or_default());
        }
    }

    if env_flag("GOOSED_STUB_NEVER_READY") {
        log::warn!("GOOSED_STUB_NEVER_READY set, not binding a port");
        std::future::pending::<()>().await;
    }

    if let Some(delay) = std::env::var("GOOSED_STUB_READY_DELAY_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let port: u16 = std::env::var(PORT_VAR)
        .with_context(|| format!("{} is not set", PORT_VAR))?
        .trim()
        .parse()
        .with_context(|| format!("{} is not a port number", PORT_VAR))?;

    let app = Router::new()
        .route("/status", get(status))
        .route("/api/agent/versions", get(versions));

    let bind_addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("stub backend listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("stub backend exited")?;
    log::info!("stub backend stopped");
    Ok(())
}

/// GET /status — readiness probe target.
async fn status() -> &'static str {
    "ok"
}

/// GET /api/agent/versions
async fn versions() -> Json<VersionsResponse> {
    let current = std::env::var("GOOSED_STUB_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VERSION.to_string());
    Json(VersionsResponse {
        available_versions: vec![current.clone()],
        current_version: current,
    })
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}
