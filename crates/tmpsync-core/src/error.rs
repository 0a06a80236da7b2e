//! Errors returned by volume operations.

use thiserror::Error;

use crate::mount::MountError;
use crate::sync::SyncError;

/// Error returned by [`VolumeController`](crate::VolumeController) operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// No volume is registered under `name`.
    #[error("volume {name} not found")]
    NotFound {
        /// Requested volume name.
        name: String,
    },

    /// A volume with this name is already registered.
    #[error("volume {name} already exists")]
    AlreadyExists {
        /// Conflicting volume name.
        name: String,
    },

    /// The name is empty or not a single path component.
    #[error("invalid volume name: {name:?}")]
    InvalidName {
        /// Rejected name.
        name: String,
    },

    /// A create option key is not recognised.
    #[error("unknown option ({key} = {value})")]
    InvalidOption {
        /// Unrecognised key.
        key: String,
        /// Value supplied with it.
        value: String,
    },

    /// A required create option was absent or empty.
    #[error("missing required option {key}")]
    MissingOption {
        /// Option key.
        key: String,
    },

    /// A known create option carried a value that could not be parsed.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Option key.
        key: String,
        /// Rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Mount was requested for a volume that is already mounted.
    #[error("volume {name} is already mounted")]
    AlreadyMounted {
        /// Volume name.
        name: String,
    },

    /// Unmount was requested for a volume that is not mounted.
    #[error("volume {name} is not mounted")]
    NotMounted {
        /// Volume name.
        name: String,
    },

    /// Attaching or detaching the tmpfs failed.
    #[error("could not mount tmpfs on {name}: {source}")]
    Mount {
        /// Volume name.
        name: String,
        /// Underlying mount failure.
        #[source]
        source: MountError,
    },

    /// Pushing the volume contents to its target failed.
    #[error("could not sync {name}: {source}")]
    Sync {
        /// Volume name.
        name: String,
        /// Underlying sync failure.
        #[source]
        source: SyncError,
    },

    /// Filesystem error while managing the mountpoint directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for volume operations.
pub type Result<T> = std::result::Result<T, VolumeError>;
