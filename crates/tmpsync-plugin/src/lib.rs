//! tmpsync volume plugin: configuration, CLI and the Docker plugin protocol
//! adapter around [`tmpsync_core::VolumeController`].

pub mod api;
pub mod cli;
pub mod config;

pub use api::PluginApi;
pub use config::{ConfigError, PluginConfig};
