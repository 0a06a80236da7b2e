//! Volume records and per-volume create options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, VolumeError};
use crate::sync::{SyncMode, UnknownSyncFlag};

/// Whether a volume's tmpfs is currently attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// Backing directory exists, nothing mounted.
    #[default]
    Created,
    /// tmpfs attached at the mountpoint.
    Mounted,
}

/// Options accepted when creating a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeOptions {
    /// tmpfs size bound, passed through verbatim (e.g. `512m`).
    pub size_limit: String,
    /// Local path or `user@host:path` receiving the contents on release.
    pub target: String,
    /// Flags applied to the release-time sync.
    pub sync_mode: SyncMode,
    /// SSH key used for remote targets.
    pub auth_key: Option<PathBuf>,
}

impl VolumeOptions {
    /// Parse the `fssize`, `target`, `opmode` and `sshkey` create options.
    pub fn parse(opts: &HashMap<String, String>) -> Result<Self> {
        let mut options = VolumeOptions::default();

        for (key, value) in opts {
            match key.as_str() {
                "fssize" => options.size_limit = value.trim().to_string(),
                "target" => options.target = value.trim().to_string(),
                "opmode" => {
                    options.sync_mode = value.parse().map_err(|e: UnknownSyncFlag| {
                        VolumeError::InvalidValue {
                            key: key.clone(),
                            value: value.clone(),
                            reason: e.to_string(),
                        }
                    })?
                }
                "sshkey" => {
                    let value = value.trim();
                    options.auth_key = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                _ => {
                    return Err(VolumeError::InvalidOption {
                        key: key.clone(),
                        value: value.clone(),
                    })
                }
            }
        }

        if options.target.is_empty() {
            return Err(VolumeError::MissingOption {
                key: "target".to_string(),
            });
        }

        Ok(options)
    }
}

/// One named volume as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume name.
    pub name: String,
    /// `<root>/<name>`, fixed at creation.
    pub mountpoint: PathBuf,
    /// tmpfs size bound; empty means the kernel default.
    pub size_limit: String,
    /// Sync destination.
    pub target: String,
    /// Flags applied to the release-time sync.
    pub sync_mode: SyncMode,
    /// SSH key for remote targets.
    pub auth_key: Option<PathBuf>,
    /// Whether the tmpfs is attached.
    pub state: VolumeState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Volume {
    /// Build a new, unmounted volume rooted under `root`.
    pub fn new(root: &Path, name: &str, options: VolumeOptions) -> Self {
        Self {
            name: name.to_string(),
            mountpoint: mountpoint_for(root, name),
            size_limit: options.size_limit,
            target: options.target,
            sync_mode: options.sync_mode,
            auth_key: options.auth_key,
            state: VolumeState::Created,
            created_at: Utc::now(),
        }
    }

    /// True while the tmpfs is attached.
    pub fn is_mounted(&self) -> bool {
        self.state == VolumeState::Mounted
    }

    /// Snapshot for Get and List replies.
    pub fn info(&self) -> VolumeInfo {
        VolumeInfo {
            name: self.name.clone(),
            mountpoint: self.mountpoint.clone(),
            created_at: self.created_at,
            state: self.state,
        }
    }
}

/// Read-only view of a volume returned by Get and List.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume name.
    pub name: String,
    /// Where the tmpfs is (or will be) attached.
    pub mountpoint: PathBuf,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Current mount state.
    pub state: VolumeState,
}

/// Scope a volume driver reports to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Volumes exist only on the host running the plugin.
    Local,
}

impl Scope {
    /// Wire name of the scope.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
        }
    }
}

/// Driver capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Reported volume scope.
    pub scope: Scope,
}

/// Mountpoint of volume `name` under `root`.
pub fn mountpoint_for(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// Reject names that are not a single, ordinary path component.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0');
    if invalid {
        return Err(VolumeError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
