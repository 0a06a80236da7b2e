//! One-way synchronization of a volume's contents to its durable target.
//!
//! The argument set handed to rsync is a pure function of the volume's
//! [`SyncMode`] and optional SSH key, so it can be checked without running
//! anything. [`RsyncSynchronizer`] is the subprocess-backed implementation of
//! [`Synchronizer`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Errors raised while synchronizing a volume to its target.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The sync program could not be started.
    #[error("could not start {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Why the spawn failed.
        #[source]
        source: std::io::Error,
    },

    /// The sync program exited unsuccessfully.
    #[error("sync to {target} failed ({status}): {output}")]
    Failed {
        /// Destination that was being synced to.
        target: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Combined stdout and stderr of the sync program.
        output: String,
    },

    /// The sync program did not finish within the configured timeout.
    #[error("sync to {target} timed out after {after_ms}ms")]
    TimedOut {
        /// Destination that was being synced to.
        target: String,
        /// The timeout that expired.
        after_ms: u128,
    },
}

/// An `opmode` item that is not a known sync flag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sync mode flag: {0}")]
pub struct UnknownSyncFlag(pub String);

/// Independent sync policy flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMode {
    /// Preserve metadata and recurse.
    pub archive: bool,
    /// Compress data in transit.
    pub compress: bool,
    /// Delete files at the target that are absent from the source.
    pub delete: bool,
    /// Descend into subdirectories.
    pub recursive: bool,
}

impl SyncMode {
    /// True when no flag is set.
    pub fn is_empty(&self) -> bool {
        !(self.archive || self.compress || self.delete || self.recursive)
    }

    fn flags(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.archive, "archive"),
            (self.compress, "compress"),
            (self.delete, "delete"),
            (self.recursive, "recursive"),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name)
    }
}

impl FromStr for SyncMode {
    type Err = UnknownSyncFlag;

    /// Parse a comma-separated flag list such as `archive,delete`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mode = SyncMode::default();
        for flag in s.split(',') {
            match flag.trim() {
                "archive" => mode.archive = true,
                "compress" => mode.compress = true,
                "delete" => mode.delete = true,
                "recursive" => mode.recursive = true,
                "" => {}
                other => return Err(UnknownSyncFlag(other.to_string())),
            }
        }
        Ok(mode)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<&str> = self.flags().collect();
        f.write_str(&flags.join(","))
    }
}

/// Transport override that authenticates with `key` and skips host-key checks.
pub fn ssh_transport(key: &Path) -> String {
    format!(
        "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o LogLevel=quiet -i {}",
        key.display()
    )
}

/// Build the rsync argument list for one sync.
///
/// `source` is passed exactly as given; without a trailing slash rsync
/// creates `<target>/<basename of source>`.
pub fn build_rsync_args(
    source: &Path,
    target: &str,
    mode: SyncMode,
    auth_key: Option<&Path>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = mode.flags().map(|f| format!("--{}", f).into()).collect();

    if let Some(key) = auth_key {
        args.push("-e".into());
        args.push(ssh_transport(key).into());
    }

    args.push(source.as_os_str().to_owned());
    args.push(target.into());
    args
}

/// Pushes a local directory to a durable target.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Synchronize `source` into `target`. Fails unless the target is known
    /// to hold the source's contents.
    async fn sync(
        &self,
        source: &Path,
        target: &str,
        mode: SyncMode,
        auth_key: Option<&Path>,
    ) -> Result<(), SyncError>;
}

/// [`Synchronizer`] that shells out to rsync.
#[derive(Debug, Clone)]
pub struct RsyncSynchronizer {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl RsyncSynchronizer {
    /// Run `program` (normally `rsync`) with no timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the sync and fail when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for RsyncSynchronizer {
    fn default() -> Self {
        Self::new("rsync")
    }
}

#[async_trait]
impl Synchronizer for RsyncSynchronizer {
    async fn sync(
        &self,
        source: &Path,
        target: &str,
        mode: SyncMode,
        auth_key: Option<&Path>,
    ) -> Result<(), SyncError> {
        let args = build_rsync_args(source, target, mode, auth_key);
        tracing::debug!(program = %self.program.display(), ?args, "running sync");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args).stdin(Stdio::null()).kill_on_drop(true);

        let (status, output) = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run_combined(cmd))
                .await
                .map_err(|_| SyncError::TimedOut {
                    target: target.to_string(),
                    after_ms: limit.as_millis(),
                })?,
            None => run_combined(cmd).await,
        }
        .map_err(|source| SyncError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if status.success() {
            return Ok(());
        }

        let output = output.trim().to_string();
        tracing::error!(dest = target, status = %status, output = %output, "sync failed");

        Err(SyncError::Failed {
            target: target.to_string(),
            status: status.to_string(),
            output,
        })
    }
}

/// Run `cmd` to completion, collecting stdout and stderr into one stream in
/// the order the chunks arrive.
async fn run_combined(mut cmd: Command) -> std::io::Result<(ExitStatus, String)> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut combined = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf) => match n? {
                0 => stdout = None,
                n => combined.extend_from_slice(&out_buf[..n]),
            },
            n = read_chunk(&mut stderr, &mut err_buf) => match n? {
                0 => stderr = None,
                n => combined.extend_from_slice(&err_buf[..n]),
            },
        }
    }

    let status = child.wait().await?;
    Ok((status, String::from_utf8_lossy(&combined).into_owned()))
}

// Never resolves once the stream has been closed.
async fn read_chunk<R: AsyncRead + Unpin>(
    stream: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match stream {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}
