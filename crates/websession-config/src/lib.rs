//! Configuration for replicated web sessions.
//!
//! Provides TOML-based configuration with:
//! - Gateway settings (`[websession]`): cache name and write-back retry budget
//! - The session cache descriptor (`[cache]`), validated by the engine at startup
//! - HTTP and container settings (`[server]`)
//! - Config file layering (node-wide config + deployment-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_in,
    node_config_dir, node_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
