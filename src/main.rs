//! # datto-rmm-mcp
//!
//! MCP (Model Context Protocol) server that exposes a Datto RMM account to AI
//! agents. Runs either as a stdio JSON-RPC server (launched by an agent host)
//! or as an HTTP service, optionally in gateway mode where every request
//! brings its own Datto credentials.
//!
//! ## Architecture
//!
//! ```text
//! main.rs         — entry point, config loading, tracing, transport launch, signals
//! config.rs       — CLI / TOML / env-var configuration
//! credentials.rs  — credential resolution from env or gateway headers
//! client.rs       — HTTP client for Datto RMM REST endpoints
//! paging.rs       — paged listings, bounded collector
//! tools.rs        — tool definitions and handlers
//! mcp.rs          — MCP JSON-RPC protocol handler, stdio loop
//! http.rs         — axum router: /health, /mcp, gateway middleware
//! ```
//!
//! ## Tools
//!
//! `list_devices`, `get_device`, `list_alerts`, `resolve_alert`,
//! `list_sites`, `get_site`, `run_quickjob`, `get_device_audit`

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use datto_rmm_mcp::config::{Cli, Config, Transport};
use datto_rmm_mcp::{http, mcp, DattoClientFactory, McpServer};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("datto-rmm-mcp: configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Logs go to stderr: stdout belongs to the stdio transport
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter))
        .with_writer(std::io::stderr)
        .init();

    info!("datto-rmm-mcp v{} starting", env!("CARGO_PKG_VERSION"));
    for warning in &config.warnings {
        warn!("{warning}");
    }
    match &config.credentials {
        Some(creds) => info!("Environment credentials found (platform: {})", creds.platform),
        None => warn!("No DATTO_API_KEY/DATTO_API_SECRET set; tool calls need gateway headers or will fail"),
    }

    let server = McpServer::new(Arc::new(DattoClientFactory));

    match config.server.transport {
        Transport::Stdio => {
            info!("Serving MCP on stdio");
            tokio::select! {
                () = mcp::run_stdio(server, config.credentials.clone()) => info!("stdin closed"),
                () = shutdown_signal() => {}
            }
        }
        Transport::Http => {
            if let Err(e) = http::serve(&config, server, shutdown_signal()).await {
                eprintln!(
                    "datto-rmm-mcp: failed to serve HTTP on {}: {e}",
                    config.listen_addr()
                );
                std::process::exit(1);
            }
        }
    }

    info!("Goodbye");
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
