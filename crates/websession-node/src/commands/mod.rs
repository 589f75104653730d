//! Command implementations.

pub mod check;
pub mod serve;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use websession_config::{ConfigSource, LoadedConfig};

/// Options shared by every command.
pub struct Context {
    /// Explicit config file, bypassing discovery.
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
}

/// Load the explicit config file, or discover and merge the config layers.
pub fn load_config(ctx: &Context, project_dir: Option<&Path>) -> Result<LoadedConfig> {
    let loaded = match ctx.config_path {
        Some(ref path) => {
            let config = websession_config::load_config_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            LoadedConfig {
                config,
                sources: vec![ConfigSource {
                    path: path.clone(),
                    loaded: true,
                }],
            }
        }
        None => websession_config::load_config(project_dir)?,
    };

    if ctx.verbose {
        let sources = loaded.loaded_from();
        if sources.is_empty() {
            println!("No config files found, using defaults + CLI args");
        } else {
            for source in sources {
                println!("Loaded config: {}", source.display());
            }
        }
    }

    Ok(loaded)
}
