use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tmpsync_core::mount::clean_path;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown option ({key} = {value})")]
    UnknownOption { key: String, value: String },

    #[error("malformed option {0:?}, expected key=value")]
    MalformedOption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub root: PathBuf,
    pub bind_addr: SocketAddr,
    pub spec_file: Option<PathBuf>,
    pub rsync_path: PathBuf,
    pub sync_timeout_secs: Option<u64>,
    pub log_level: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/tmpsync/volumes"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7523)),
            spec_file: None,
            rsync_path: PathBuf::from("rsync"),
            sync_timeout_secs: None,
            log_level: String::from("info"),
        }
    }
}

impl PluginConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: PluginConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: PluginConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Apply driver start-up options of the form `key=value`.
    ///
    /// Only `root` is recognised and keys are case-insensitive. The root is
    /// made absolute and normalized (see [`absolute_root`]).
    pub fn apply_driver_options(&mut self, options: &[String]) -> Result<(), ConfigError> {
        for opt in options {
            let (key, value) = opt
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedOption(opt.clone()))?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "root" => self.root = absolute_root(Path::new(value))?,
                _ => {
                    return Err(ConfigError::UnknownOption {
                        key,
                        value: value.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_secs.map(Duration::from_secs)
    }
}

/// Resolve a relative root against the current directory and fold away
/// `.` and `..`, so mountpoints under it match the kernel's mount table.
pub fn absolute_root(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(clean_path(path))
    } else {
        Ok(clean_path(&std::env::current_dir()?.join(path)))
    }
}
