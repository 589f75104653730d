//! Locating and layering the node's TOML files.
//!
//! A node reads up to two files. The node-wide file, `config.toml` in the
//! node's config directory, holds what every deployment on the host shares.
//! The deployment file, `websession.toml` next to the deployment, is merged
//! on top of it section by section. Command-line flags are applied by the
//! caller afterwards.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, WebSessionConfig};

const DEPLOYMENT_FILE: &str = "websession.toml";
const NODE_FILE: &str = "config.toml";
const NODE_DIR_NAME: &str = "websession";
/// Replaces the platform config directory when set and non-empty.
const NODE_DIR_ENV: &str = "WEBSESSION_CONFIG_DIR";

/// One file the loader looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    /// False when the file did not exist.
    pub loaded: bool,
}

/// The merged configuration and the files it was built from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: WebSessionConfig,
    /// Node-wide file first, deployment file last.
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Merge the node-wide file with the deployment file in `deployment_dir`
/// (the working directory when `None`).
pub fn load_config(deployment_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_in(deployment_dir, None)
}

/// Like [`load_config`], with the node config directory given explicitly
/// instead of taken from `WEBSESSION_CONFIG_DIR` or the platform.
///
/// Absent files are skipped. A file that is present but unreadable or
/// malformed fails the whole load, so a node never runs on partial settings.
pub fn load_config_in(
    deployment_dir: Option<&Path>,
    node_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = WebSessionConfig::new();
    let mut sources = Vec::new();

    let node_file = match node_dir {
        Some(dir) => Some(dir.join(NODE_FILE)),
        None => node_config_path(),
    };
    if let Some(path) = node_file {
        sources.push(merge_layer(&mut config, &path)?);
    }

    let deployment_file = deployment_dir
        .map(|dir| dir.join(DEPLOYMENT_FILE))
        .unwrap_or_else(|| PathBuf::from(DEPLOYMENT_FILE));
    sources.push(merge_layer(&mut config, &deployment_file)?);

    Ok(LoadedConfig { config, sources })
}

/// Parse exactly one file, with no layering.
pub fn load_config_file(path: &Path) -> Result<WebSessionConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    WebSessionConfig::from_toml(&contents)
}

pub fn node_config_path() -> Option<PathBuf> {
    node_config_dir().map(|dir| dir.join(NODE_FILE))
}

/// `$WEBSESSION_CONFIG_DIR`, or `websession/` under the platform config
/// directory. Also where the node writes its log files.
pub fn node_config_dir() -> Option<PathBuf> {
    match std::env::var(NODE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|base| base.join(NODE_DIR_NAME)),
    }
}

fn merge_layer(config: &mut WebSessionConfig, path: &Path) -> Result<ConfigSource> {
    let loaded = path.is_file();
    if loaded {
        config.merge(load_config_file(path)?);
    }
    Ok(ConfigSource {
        path: path.to_path_buf(),
        loaded,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[websession]\ncache_name = \"sessions\"\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(
            config.websession.unwrap().cache_name.as_deref(),
            Some("sessions")
        );
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config_file(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_no_files() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();

        let loaded = load_config_in(Some(project.path()), Some(user.path())).unwrap();
        assert_eq!(loaded.config, WebSessionConfig::new());
        assert!(loaded.loaded_from().is_empty());
        assert_eq!(loaded.sources.len(), 2);
    }

    #[test]
    fn test_deployment_file_overrides_node_file() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        fs::write(
            user.path().join("config.toml"),
            r#"
[websession]
max_retries = 1

[server]
cookie_name = "NODE_SID"
"#,
        )
        .unwrap();
        fs::write(
            project.path().join("websession.toml"),
            "[websession]\nmax_retries = 6\n",
        )
        .unwrap();

        let loaded = load_config_in(Some(project.path()), Some(user.path())).unwrap();

        assert_eq!(loaded.config.gateway_config().unwrap().max_retries, 6);
        // Sections the deployment file leaves out come from the node file
        assert_eq!(loaded.config.server().cookie_name, "NODE_SID");
        assert_eq!(loaded.loaded_from().len(), 2);
        assert!(loaded.loaded_from()[1].ends_with("websession.toml"));
    }

    #[test]
    fn test_node_dir_from_env() {
        // Only this test touches the variable
        unsafe { std::env::set_var(NODE_DIR_ENV, "/srv/websession") };
        let dir = node_config_dir();
        unsafe { std::env::remove_var(NODE_DIR_ENV) };

        assert_eq!(dir, Some(PathBuf::from("/srv/websession")));
        assert_eq!(
            node_config_path(),
            dirs::config_dir().map(|base| base.join("websession").join("config.toml"))
        );
    }

    #[test]
    fn test_malformed_layer_is_fatal() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("websession.toml"), "not valid {{{{").unwrap();

        let err = load_config_in(Some(project.path()), Some(user.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
