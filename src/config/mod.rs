//! Where the config file lives, and reading and writing it
//!
//! A missing file is not an error: every section has defaults, so a fresh
//! install runs without ever calling `config init`.

pub mod schema;

pub use schema::Config;

use crate::error::{CacheError, CacheResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Handle on one config file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    file: PathBuf,
}

impl ConfigManager {
    /// Use the per-user file under the platform config directory
    pub fn new() -> Self {
        Self::with_path(Self::default_path())
    }

    pub fn with_path(file: PathBuf) -> Self {
        Self { file }
    }

    /// `<config dir>/cacheguard/config.toml`, or `./cacheguard/config.toml`
    /// on platforms without a config directory
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("cacheguard").join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Read the file, or return defaults when there is none
    ///
    /// # Errors
    /// * `ConfigInvalid` - the file exists but is not a valid config
    /// * `Io` - the file exists but could not be read
    pub async fn load(&self) -> CacheResult<Config> {
        match fs::read_to_string(&self.file).await {
            Ok(text) => Self::parse(&self.file, &text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", self.file.display());
                Ok(Config::default())
            }
            Err(e) => Err(CacheError::io(
                format!("reading config from {}", self.file.display()),
                e,
            )),
        }
    }

    /// Read a specific file; unlike [`load`](Self::load) a missing file is an error
    pub async fn load_from_file(path: &Path) -> CacheResult<Config> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::io(format!("reading config from {}", path.display()), e))?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> CacheResult<Config> {
        toml::from_str(text).map_err(|e| CacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write `config`, creating parent directories as needed
    pub async fn save(&self, config: &Config) -> CacheResult<()> {
        if let Some(dir) = self.file.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| CacheError::ConfigDirCreate {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let text = toml::to_string_pretty(config)?;
        fs::write(&self.file, text).await.map_err(|e| {
            CacheError::io(format!("writing config to {}", self.file.display()), e)
        })?;

        info!("Wrote config to {}", self.file.display());
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
