//! tmpfs mount management for tmpsync volumes.
//!
//! Attaches a size-bounded tmpfs at a volume's mountpoint and detaches it
//! again, including anything mounted underneath it.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Errors that can occur during mount operations.
#[derive(Debug, Error)]
pub enum MountError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Permission denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid option.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// The mount(2) call failed.
    #[error("Could not mount tmpfs on {path}: {reason}")]
    AttachFailed {
        /// Mountpoint passed to mount(2).
        path: String,
        /// OS error text.
        reason: String,
    },

    /// The umount2(2) call failed.
    #[error("Could not unmount {path}: {reason}")]
    DetachFailed {
        /// Mountpoint passed to umount2(2).
        path: String,
        /// OS error text.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for MountError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => MountError::IoError(format!("not found: {}", e)),
            std::io::ErrorKind::PermissionDenied => {
                MountError::PermissionDenied(format!("permission denied: {}", e))
            }
            _ => MountError::IoError(e.to_string()),
        }
    }
}

/// Attaches and detaches memory-backed filesystems.
pub trait Mounter: Send + Sync {
    /// Mount a tmpfs at `path`, bounded by `size_limit` when it is non-empty.
    fn attach(&self, path: &Path, size_limit: &str) -> Result<(), MountError>;

    /// Unmount everything at or below `path`. Succeeds when nothing is mounted.
    fn detach(&self, path: &Path) -> Result<(), MountError>;
}

/// [`Mounter`] backed by the Linux mount syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct TmpfsMounter;

impl TmpfsMounter {
    /// Create a new tmpfs mounter.
    pub fn new() -> Self {
        TmpfsMounter
    }
}

impl Mounter for TmpfsMounter {
    fn attach(&self, path: &Path, size_limit: &str) -> Result<(), MountError> {
        validate_mountpoint(path)?;

        let data = tmpfs_data(size_limit);
        let source = c_string("tmpfs")?;
        let target = path_to_c_string(path)?;
        let data = c_string(&data)?;

        // SAFETY: all pointers come from live CStrings for the duration of the call.
        let rc = unsafe {
            libc::mount(
                source.as_ptr(),
                target.as_ptr(),
                source.as_ptr(),
                0,
                data.as_ptr() as *const libc::c_void,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EPERM) | Some(libc::EACCES) => {
                    MountError::PermissionDenied(path.display().to_string())
                }
                _ => MountError::AttachFailed {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                },
            });
        }

        tracing::debug!(path = %path.display(), size = size_limit, "tmpfs attached");
        Ok(())
    }

    fn detach(&self, path: &Path) -> Result<(), MountError> {
        let mountinfo = std::fs::read_to_string(MOUNTINFO)?;
        // mountinfo lists resolved paths
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| clean_path(path));

        for mountpoint in mounts_under(&mountinfo, &path) {
            let target = path_to_c_string(&mountpoint)?;
            // SAFETY: target is a valid NUL-terminated path.
            let rc = unsafe { libc::umount2(target.as_ptr(), 0) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                // EINVAL: already gone underneath us
                if err.raw_os_error() == Some(libc::EINVAL) {
                    continue;
                }
                return Err(MountError::DetachFailed {
                    path: mountpoint.display().to_string(),
                    reason: err.to_string(),
                });
            }
            tracing::debug!(path = %mountpoint.display(), "unmounted");
        }

        Ok(())
    }
}

/// Validate a mountpoint path.
pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }

    Ok(())
}

/// Build the tmpfs mount data string for a size limit.
pub fn tmpfs_data(size_limit: &str) -> String {
    let size_limit = size_limit.trim();
    if size_limit.is_empty() {
        String::new()
    } else {
        format!("size={}", size_limit)
    }
}

/// Lexically normalize `path`: drop `.` components and fold `..` into
/// their parent. Symlinks are not resolved.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Mountpoints at or below `root` listed in mountinfo content, deepest first.
///
/// `root` is normalized with [`clean_path`] before matching.
pub fn mounts_under(mountinfo: &str, root: &Path) -> Vec<PathBuf> {
    let root = clean_path(root);
    let mut found: Vec<PathBuf> = mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(|field| PathBuf::from(unescape_mountinfo(field)))
        .filter(|mountpoint| mountpoint.starts_with(&root))
        .collect();

    found.sort_by_key(|mountpoint| std::cmp::Reverse(mountpoint.components().count()));
    found
}

// mountinfo escapes space, tab, newline and backslash as octal.
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).ok();
            if let Some(value) = octal.and_then(|o| u8::from_str_radix(o, 8).ok()) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn c_string(s: &str) -> Result<CString, MountError> {
    CString::new(s).map_err(|_| MountError::InvalidOption(s.to_string()))
}

fn path_to_c_string(path: &Path) -> Result<CString, MountError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| MountError::InvalidOption(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
40 22 0:35 / /srv/plugin/v1 rw,relatime shared:20 - tmpfs tmpfs rw,size=102400k
41 40 0:36 / /srv/plugin/v1/nested rw,relatime shared:21 - tmpfs tmpfs rw
42 22 0:37 / /srv/plugin/v10 rw,relatime shared:22 - tmpfs tmpfs rw
43 22 0:38 / /srv/plugin/with\\040space rw,relatime shared:23 - tmpfs tmpfs rw
";

    #[test]
    fn test_tmpfs_data_with_size() {
        assert_eq!(tmpfs_data("100m"), "size=100m");
    }

    #[test]
    fn test_tmpfs_data_empty_size_has_no_option() {
        assert_eq!(tmpfs_data(""), "");
        assert_eq!(tmpfs_data("  "), "");
    }

    #[test]
    fn test_mounts_under_returns_deepest_first() {
        let mounts = mounts_under(SAMPLE, Path::new("/srv/plugin/v1"));
        assert_eq!(
            mounts,
            vec![
                PathBuf::from("/srv/plugin/v1/nested"),
                PathBuf::from("/srv/plugin/v1"),
            ]
        );
    }

    #[test]
    fn test_mounts_under_ignores_sibling_prefix() {
        let mounts = mounts_under(SAMPLE, Path::new("/srv/plugin/v1"));
        assert!(!mounts.contains(&PathBuf::from("/srv/plugin/v10")));
    }

    #[test]
    fn test_mounts_under_nothing_mounted() {
        let mounts = mounts_under(SAMPLE, Path::new("/srv/plugin/absent"));
        assert!(mounts.is_empty());
    }

    #[test]
    fn test_mounts_under_unescapes_spaces() {
        let mounts = mounts_under(SAMPLE, Path::new("/srv/plugin/with space"));
        assert_eq!(mounts, vec![PathBuf::from("/srv/plugin/with space")]);
    }

    #[test]
    fn test_mounts_under_normalizes_root() {
        let mounts = mounts_under(SAMPLE, Path::new("/srv/app/../plugin/./v1/"));
        assert_eq!(
            mounts,
            vec![
                PathBuf::from("/srv/plugin/v1/nested"),
                PathBuf::from("/srv/plugin/v1"),
            ]
        );
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(clean_path(Path::new("../../b")), PathBuf::from("../../b"));
        assert_eq!(clean_path(Path::new("/srv/plugin/")), PathBuf::from("/srv/plugin"));
    }

    #[test]
    fn test_validate_mountpoint_with_nonexistent_path() {
        let result = validate_mountpoint(Path::new("/nonexistent_path_12345"));
        assert!(matches!(result, Err(MountError::PathNotFound(_))));
    }

    #[test]
    fn test_validate_mountpoint_with_file_not_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        fs::write(&file, "test").unwrap();

        let result = validate_mountpoint(&file);
        assert!(matches!(result, Err(MountError::NotADirectory(_))));
    }

    #[test]
    fn test_attach_on_missing_path_fails_before_syscall() {
        let mounter = TmpfsMounter::new();
        let result = mounter.attach(Path::new("/nonexistent_path_12345"), "10m");
        assert!(matches!(result, Err(MountError::PathNotFound(_))));
    }

    #[test]
    fn test_detach_with_nothing_mounted_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mounter = TmpfsMounter::new();
        assert!(mounter.detach(dir.path()).is_ok());
    }

    #[test]
    fn test_io_error_permission_denied_conversion() {
        let io_err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err: MountError = io_err.into();
        assert!(matches!(err, MountError::PermissionDenied(_)));
    }
}
