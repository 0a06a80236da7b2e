use crate::config::{absolute_root, PluginConfig};
use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tmpsync")]
#[command(about = "tmpfs volume plugin that syncs volumes to durable storage on release", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML or JSON). Missing file means defaults.
    #[arg(short, long, env = "TMPSYNC_CONFIG", default_value = "/etc/tmpsync/tmpsync.toml")]
    pub config: PathBuf,

    /// Driver option, `key=value`; may be repeated.
    #[arg(short = 'o', long = "opt")]
    pub options: Vec<String>,

    /// Directory holding the volume mountpoints.
    #[arg(long, env = "TMPSYNC_ROOT")]
    pub root: Option<PathBuf>,

    #[arg(long, env = "TMPSYNC_BIND")]
    pub bind: Option<SocketAddr>,

    /// Plugin discovery file to write, e.g. /etc/docker/plugins/tmpsync.spec.
    #[arg(long, env = "TMPSYNC_SPEC_FILE")]
    pub spec_file: Option<PathBuf>,

    #[arg(long, env = "TMPSYNC_RSYNC")]
    pub rsync: Option<PathBuf>,

    /// Abort a sync after this many seconds.
    #[arg(long, env = "TMPSYNC_SYNC_TIMEOUT")]
    pub sync_timeout: Option<u64>,

    #[arg(long, env = "TMPSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Build the effective configuration: defaults, then the config file,
    /// then driver options, then explicit flags. The root always comes out
    /// absolute and normalized.
    pub fn resolve(&self) -> Result<PluginConfig> {
        let mut config = if self.config.exists() {
            PluginConfig::from_file(&self.config)?
        } else {
            PluginConfig::default()
        };

        config.apply_driver_options(&self.options)?;

        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        config.root = absolute_root(&config.root)?;
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(spec_file) = &self.spec_file {
            config.spec_file = Some(spec_file.clone());
        }
        if let Some(rsync) = &self.rsync {
            config.rsync_path = rsync.clone();
        }
        if let Some(secs) = self.sync_timeout {
            config.sync_timeout_secs = Some(secs);
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }
}
