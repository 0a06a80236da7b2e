//! Volume lifecycle: create, mount, unmount (sync then detach), remove.
//!
//! Every operation holds the registry lock for its full duration, including
//! the mount syscalls and the sync subprocess. Mutating operations take the
//! write lock; Get, List and Path share the read lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, VolumeError};
use crate::mount::Mounter;
use crate::registry::VolumeRegistry;
use crate::sync::Synchronizer;
use crate::volume::{
    validate_name, Capabilities, Scope, Volume, VolumeInfo, VolumeOptions, VolumeState,
};

/// Entry point for all volume operations.
pub struct VolumeController {
    root: PathBuf,
    registry: RwLock<VolumeRegistry>,
    mounter: Arc<dyn Mounter>,
    synchronizer: Arc<dyn Synchronizer>,
}

impl VolumeController {
    /// Create a controller whose volumes live under `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        mounter: Arc<dyn Mounter>,
        synchronizer: Arc<dyn Synchronizer>,
    ) -> Self {
        Self {
            root: root.into(),
            registry: RwLock::new(VolumeRegistry::new()),
            mounter,
            synchronizer,
        }
    }

    /// Directory under which every volume's mountpoint is created.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a volume and create its backing directory.
    pub async fn create(&self, name: &str, opts: &HashMap<String, String>) -> Result<()> {
        tracing::info!(volume = name, ?opts, "create");
        validate_name(name)?;

        let mut registry = self.registry.write().await;
        if registry.contains(name) {
            return Err(VolumeError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let options = VolumeOptions::parse(opts)?;
        if let Some(key) = &options.auth_key {
            tracing::warn!(
                volume = name,
                key = %key.display(),
                "host key verification disabled for sync"
            );
        }

        let volume = Volume::new(&self.root, name, options);
        tokio::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&volume.mountpoint)
            .await?;

        registry.insert(volume)
    }

    /// Attach a tmpfs at the volume's mountpoint and return that mountpoint.
    pub async fn mount(&self, name: &str) -> Result<PathBuf> {
        tracing::info!(volume = name, "mount");

        let mut registry = self.registry.write().await;
        let volume = registry.get_mut(name)?;
        if volume.is_mounted() {
            return Err(VolumeError::AlreadyMounted {
                name: name.to_string(),
            });
        }

        self.mounter
            .attach(&volume.mountpoint, &volume.size_limit)
            .map_err(|source| VolumeError::Mount {
                name: name.to_string(),
                source,
            })?;

        volume.state = VolumeState::Mounted;
        Ok(volume.mountpoint.clone())
    }

    /// Mountpoint of an existing volume.
    pub async fn path(&self, name: &str) -> Result<PathBuf> {
        tracing::info!(volume = name, "path");

        let registry = self.registry.read().await;
        Ok(registry.get(name)?.mountpoint.clone())
    }

    /// Push the volume's contents to its target, then detach the tmpfs.
    ///
    /// If the sync fails the tmpfs stays attached and the volume stays
    /// mounted, so its data is still reachable and the unmount can be retried.
    pub async fn unmount(&self, name: &str) -> Result<()> {
        tracing::info!(volume = name, "unmount");

        let mut registry = self.registry.write().await;
        let volume = registry.get_mut(name)?;
        if !volume.is_mounted() {
            return Err(VolumeError::NotMounted {
                name: name.to_string(),
            });
        }

        self.synchronizer
            .sync(
                &volume.mountpoint,
                &volume.target,
                volume.sync_mode,
                volume.auth_key.as_deref(),
            )
            .await
            .map_err(|source| VolumeError::Sync {
                name: name.to_string(),
                source,
            })?;
        tracing::info!(volume = name, dest = %volume.target, mode = %volume.sync_mode, "synced");

        if let Err(e) = self.mounter.detach(&volume.mountpoint) {
            tracing::warn!(volume = name, error = %e, "detach failed after successful sync");
        }

        volume.state = VolumeState::Created;
        Ok(())
    }

    /// Name, mountpoint, creation time and state of one volume.
    pub async fn get(&self, name: &str) -> Result<VolumeInfo> {
        tracing::info!(volume = name, "get");

        let registry = self.registry.read().await;
        Ok(registry.get(name)?.info())
    }

    /// Every registered volume, ordered by name.
    pub async fn list(&self) -> Vec<VolumeInfo> {
        tracing::info!("list");

        let registry = self.registry.read().await;
        registry.list().into_iter().map(Volume::info).collect()
    }

    /// Delete the volume's backing directory and forget it.
    ///
    /// A mounted volume is detached first without syncing; its data is discarded.
    pub async fn remove(&self, name: &str) -> Result<()> {
        tracing::info!(volume = name, "remove");

        let mut registry = self.registry.write().await;
        let volume = registry.get_mut(name)?;

        if volume.is_mounted() {
            tracing::warn!(volume = name, "removing mounted volume, contents are discarded");
            self.mounter
                .detach(&volume.mountpoint)
                .map_err(|source| VolumeError::Mount {
                    name: name.to_string(),
                    source,
                })?;
            volume.state = VolumeState::Created;
        }

        match tokio::fs::remove_dir_all(&volume.mountpoint).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        registry.remove(name)?;
        Ok(())
    }

    /// Volumes are local to this host.
    pub fn capabilities(&self) -> Capabilities {
        tracing::info!("capabilities");

        Capabilities {
            scope: Scope::Local,
        }
    }
}
