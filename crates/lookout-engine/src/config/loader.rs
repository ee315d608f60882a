use super::schema::LookoutConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Environment variable naming a config file that overrides the search.
pub const CONFIG_ENV: &str = "LOOKOUT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Uses `$LOOKOUT_CONFIG` when set and non-empty, otherwise searches
    /// [`search_paths`] and falls back to defaults.
    pub async fn load_default() -> Result<LookoutConfig, ConfigError> {
        let explicit = std::env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::load_preferring(explicit.as_deref()).await
    }

    /// An explicit path must be readable; searched locations are skipped
    /// when absent.
    pub async fn load_preferring(explicit: Option<&Path>) -> Result<LookoutConfig, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path).await;
        }
        for path in search_paths() {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Self::load_from(&path).await;
            }
        }
        debug!("No config file found, using defaults");
        Ok(LookoutConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<LookoutConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }
}

/// `./lookout.yaml`, then `~/.lookout/config.yaml`.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./lookout.yaml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".lookout").join("config.yaml"));
    }
    paths
}
