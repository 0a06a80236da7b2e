#![warn(missing_docs)]

//! tmpsync core: tmpfs-backed volumes that are pushed to durable storage
//! with rsync when released.

pub mod controller;
pub mod error;
pub mod mount;
pub mod registry;
pub mod sync;
pub mod volume;

pub use controller::VolumeController;
pub use error::{Result, VolumeError};
pub use mount::{MountError, Mounter, TmpfsMounter};
pub use registry::VolumeRegistry;
pub use sync::{RsyncSynchronizer, SyncError, SyncMode, Synchronizer};
pub use volume::{Capabilities, Scope, Volume, VolumeInfo, VolumeOptions, VolumeState};
