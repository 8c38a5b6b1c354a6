//! Configuration file discovery and loading.
//!
//! The file is located at, in order: the `--config` argument, the
//! `ACTIONFLOW_CONFIG` environment variable, `<data_dir>/actionflow.toml`.
//! The data directory is `ACTIONFLOW_DATA_DIR` or `~/.actionflow`. A missing
//! file at the default location yields the default configuration; a missing
//! file that was asked for explicitly is an error, as is a file that does
//! not parse.

use std::path::{Path, PathBuf};

use actionflow_types::config::ActionflowConfig;
use thiserror::Error;

pub const CONFIG_ENV: &str = "ACTIONFLOW_CONFIG";
pub const DATA_DIR_ENV: &str = "ACTIONFLOW_DATA_DIR";
pub const CONFIG_FILE_NAME: &str = "actionflow.toml";
pub const STREAM_DB_FILE_NAME: &str = "stream.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Where the configuration file is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named by `--config` or `ACTIONFLOW_CONFIG`; must exist.
    Explicit(PathBuf),
    /// `<data_dir>/actionflow.toml`; may be absent.
    Default(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Default(p) => p,
        }
    }
}

/// A loaded configuration plus where it came from.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: ActionflowConfig,
    /// The file that was read, if any.
    pub path: Option<PathBuf>,
    pub data_dir: PathBuf,
}

impl LoadedConfig {
    /// The stream database: `stream.database_path` or `<data_dir>/stream.db`.
    pub fn stream_database_path(&self) -> PathBuf {
        self.config
            .stream
            .database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(STREAM_DB_FILE_NAME))
    }
}

/// Resolve the data directory from the environment or the home directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".actionflow");
    }
    PathBuf::from(".actionflow")
}

/// Pick the config file location. `explicit` wins over `env`.
pub fn config_source(explicit: Option<&Path>, env: Option<&str>, data_dir: &Path) -> ConfigSource {
    if let Some(path) = explicit {
        return ConfigSource::Explicit(path.to_path_buf());
    }
    match env.filter(|v| !v.is_empty()) {
        Some(path) => ConfigSource::Explicit(PathBuf::from(path)),
        None => ConfigSource::Default(data_dir.join(CONFIG_FILE_NAME)),
    }
}

/// Locate and load the configuration using the process environment.
pub async fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let data_dir = resolve_data_dir();
    let env = std::env::var(CONFIG_ENV).ok();
    let source = config_source(explicit, env.as_deref(), &data_dir);
    load_config_from(&source, data_dir).await
}

/// Load the configuration from `source`.
///
/// Relative `catalog.file` and `stream.database_path` entries are resolved
/// against the directory holding the config file.
pub async fn load_config_from(
    source: &ConfigSource,
    data_dir: PathBuf,
) -> Result<LoadedConfig, ConfigError> {
    let path = source.path();
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err)
            if err.kind() == std::io::ErrorKind::NotFound
                && matches!(source, ConfigSource::Default(_)) =>
        {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(LoadedConfig {
                config: ActionflowConfig::default(),
                path: None,
                data_dir,
            });
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: err,
            });
        }
    };

    let mut config: ActionflowConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(base) = path.parent() {
        resolve_relative(&mut config.catalog.file, base);
        resolve_relative(&mut config.stream.database_path, base);
    }

    tracing::debug!(path = %path.display(), "loaded config");
    Ok(LoadedConfig {
        config,
        path: Some(path.to_path_buf()),
        data_dir,
    })
}

fn resolve_relative(entry: &mut Option<PathBuf>, base: &Path) {
    if let Some(p) = entry.as_mut() {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    }
}
