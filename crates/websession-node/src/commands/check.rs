//! Check command - validates configuration without serving.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use websession::validate_descriptor;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Directory holding `websession.toml` (defaults to the current directory)
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Print the resolved settings as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the check command.
pub fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let loaded = super::load_config(ctx, args.project_dir.as_deref())?;
    let config = &loaded.config;

    let gateway = config.gateway_config()?;
    let descriptor = config.cache_descriptor();
    validate_descriptor(&descriptor)?;
    let store = config.store_config()?;
    let server = config.server();
    let bind = server.bind_addr()?;

    if args.json {
        let resolved = serde_json::json!({
            "cache": descriptor,
            "max_retries": gateway.max_retries,
            "expiry_sweep_secs": store.sweep_interval.as_secs(),
            "max_entries": store.max_entries,
            "bind": bind.to_string(),
            "cookie_name": server.cookie_name,
            "default_max_inactive_secs": server.default_max_inactive_secs,
            "id_suffix": server.id_suffix,
        });
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        println!("Cache: {}", descriptor.display_name());
        println!("  atomicity: {:?}", descriptor.atomicity);
        println!("  write sync: {:?}", descriptor.write_sync);
        println!("  mode: {:?}", descriptor.mode);
        println!("Max retries: {}", gateway.max_retries);
        println!("Bind: {}", bind);
        println!("Cookie: {}", server.cookie_name);
        println!("Configuration OK");
    }

    Ok(())
}
