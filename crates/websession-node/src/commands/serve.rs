//! Serve command - runs a node against an in-memory session cache.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use websession::{MemoryStore, SessionGateway};
use websession_server::{AppState, LocalContainer, Server, ServerConfig};

use super::Context;

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Directory holding `websession.toml` (defaults to the current directory)
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Write-back retry budget (overrides config)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Disable HTTP request tracing
    #[arg(long)]
    pub quiet_requests: bool,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    // ── Load configuration ──────────────────────────────────────────────

    let loaded = super::load_config(ctx, args.project_dir.as_deref())?;
    let config = &loaded.config;

    let mut gateway_config = config.gateway_config()?;
    if let Some(retries) = args.max_retries {
        gateway_config = gateway_config.with_max_retries(retries);
    }

    let section = config.server();
    let bind = match args.bind {
        Some(addr) => addr,
        None => section.bind_addr()?,
    };

    // ── Session cache ───────────────────────────────────────────────────

    let store = MemoryStore::new(config.cache_descriptor(), config.store_config()?);
    let reaper = store.spawn_expiry_reaper();

    // ── Gateway and container ───────────────────────────────────────────

    let mut container = LocalContainer::new(section.default_max_inactive_secs);
    if section.id_suffix {
        container = container.with_id_suffix();
    }

    let gateway = SessionGateway::new(Arc::new(store), Arc::new(container), gateway_config)?;

    if ctx.verbose {
        println!("Consistency mode: {}", gateway.mode());
        println!("Max retries: {}", gateway.config().max_retries);
    }

    let server_config = ServerConfig::new()
        .with_bind_address(bind)
        .with_cookie_name(section.cookie_name)
        .with_default_max_inactive_secs(section.default_max_inactive_secs)
        .with_id_suffix(section.id_suffix)
        .with_request_logging(!args.quiet_requests);

    let server = Server::new(AppState::new(gateway, server_config));

    println!("websession node starting on http://{}", bind);
    println!("Press Ctrl+C to stop");

    let result = server.run().await;

    reaper.abort();
    info!("Node stopped");

    result?;
    Ok(())
}
