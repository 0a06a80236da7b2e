//! End-to-end volume lifecycles against a scratch directory.
//!
//! Mounting is simulated (no privileges needed); the synchronizer copies files
//! in-process so the target's final contents can be checked.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tmpsync_core::{
    MountError, Mounter, SyncError, SyncMode, Synchronizer, VolumeController, VolumeError,
    VolumeState,
};

#[derive(Default)]
struct RecordingMounter {
    mounted: Mutex<Vec<PathBuf>>,
}

impl Mounter for RecordingMounter {
    fn attach(&self, path: &Path, _size_limit: &str) -> Result<(), MountError> {
        self.mounted.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    fn detach(&self, path: &Path) -> Result<(), MountError> {
        self.mounted.lock().unwrap().retain(|p| p != path);
        Ok(())
    }
}

/// Copies top-level files from `source` into `target/<source name>`, the
/// way rsync treats a source without a trailing slash. `delete` prunes only
/// that subdirectory.
struct CopySynchronizer;

#[async_trait]
impl Synchronizer for CopySynchronizer {
    async fn sync(
        &self,
        source: &Path,
        target: &str,
        mode: SyncMode,
        _auth_key: Option<&Path>,
    ) -> Result<(), SyncError> {
        let target_root = PathBuf::from(target);
        let fail = |e: std::io::Error| SyncError::Failed {
            target: target_root.display().to_string(),
            status: "exit status: 11".to_string(),
            output: e.to_string(),
        };

        if !target_root.is_dir() {
            return Err(fail(std::io::Error::from(std::io::ErrorKind::NotFound)));
        }
        let name = source
            .file_name()
            .ok_or_else(|| fail(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;
        let target = target_root.join(name);
        std::fs::create_dir_all(&target).map_err(fail)?;

        let mut seen = Vec::new();
        for entry in std::fs::read_dir(source).map_err(fail)? {
            let entry = entry.map_err(fail)?;
            std::fs::copy(entry.path(), target.join(entry.file_name())).map_err(fail)?;
            seen.push(entry.file_name());
        }

        if mode.delete {
            for entry in std::fs::read_dir(&target).map_err(fail)? {
                let entry = entry.map_err(fail)?;
                if !seen.contains(&entry.file_name()) {
                    std::fs::remove_file(entry.path()).map_err(fail)?;
                }
            }
        }
        Ok(())
    }
}

fn opts(target: &Path, opmode: &str) -> HashMap<String, String> {
    [
        ("fssize", "100m".to_string()),
        ("target", target.display().to_string()),
        ("opmode", opmode.to_string()),
        ("sshkey", String::new()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn controller(root: &Path) -> (Arc<RecordingMounter>, VolumeController) {
    let mounter = Arc::new(RecordingMounter::default());
    let controller = VolumeController::new(root, mounter.clone(), Arc::new(CopySynchronizer));
    (mounter, controller)
}

#[tokio::test]
async fn test_write_then_release_lands_in_target() {
    let root = tempfile::tempdir().unwrap();
    let backup = tempfile::tempdir().unwrap();
    std::fs::create_dir(backup.path().join("v1")).unwrap();
    std::fs::write(backup.path().join("v1").join("stale.txt"), "old").unwrap();
    let (mounter, controller) = controller(root.path());

    controller
        .create("v1", &opts(backup.path(), "archive,delete"))
        .await
        .unwrap();
    let mountpoint = controller.mount("v1").await.unwrap();
    assert_eq!(mountpoint, root.path().join("v1"));
    assert_eq!(*mounter.mounted.lock().unwrap(), vec![mountpoint.clone()]);

    std::fs::write(mountpoint.join("data.txt"), "payload").unwrap();
    controller.unmount("v1").await.unwrap();

    assert!(mounter.mounted.lock().unwrap().is_empty());
    assert_eq!(
        std::fs::read_to_string(backup.path().join("v1").join("data.txt")).unwrap(),
        "payload"
    );
    assert!(!backup.path().join("v1").join("stale.txt").exists());
}

#[tokio::test]
async fn test_shared_target_keeps_each_volume_separate() {
    let root = tempfile::tempdir().unwrap();
    let backup = tempfile::tempdir().unwrap();
    let (_, controller) = controller(root.path());

    for name in ["v1", "v2"] {
        controller
            .create(name, &opts(backup.path(), "archive,delete"))
            .await
            .unwrap();
        let mountpoint = controller.mount(name).await.unwrap();
        std::fs::write(mountpoint.join(format!("{}.txt", name)), name).unwrap();
        controller.unmount(name).await.unwrap();
    }

    assert!(backup.path().join("v1").join("v1.txt").exists());
    assert!(backup.path().join("v2").join("v2.txt").exists());
}

#[tokio::test]
async fn test_failed_release_keeps_data_and_retry_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let parent = tempfile::tempdir().unwrap();
    let target = parent.path().join("not-yet");
    let (mounter, controller) = controller(root.path());

    controller.create("v1", &opts(&target, "archive")).await.unwrap();
    let mountpoint = controller.mount("v1").await.unwrap();
    std::fs::write(mountpoint.join("data.txt"), "payload").unwrap();

    let err = controller.unmount("v1").await.unwrap_err();
    assert!(matches!(err, VolumeError::Sync { .. }));
    assert_eq!(mounter.mounted.lock().unwrap().len(), 1);
    assert!(mountpoint.join("data.txt").exists());

    std::fs::create_dir(&target).unwrap();
    controller.unmount("v1").await.unwrap();
    assert!(mounter.mounted.lock().unwrap().is_empty());
    assert!(target.join("v1").join("data.txt").exists());
    assert_eq!(
        controller.get("v1").await.unwrap().state,
        VolumeState::Created
    );
}

#[tokio::test]
async fn test_volume_can_be_mounted_again_after_release() {
    let root = tempfile::tempdir().unwrap();
    let backup = tempfile::tempdir().unwrap();
    let (_, controller) = controller(root.path());

    controller.create("v1", &opts(backup.path(), "")).await.unwrap();
    for _ in 0..3 {
        controller.mount("v1").await.unwrap();
        controller.unmount("v1").await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_lose_nothing() {
    let root = tempfile::tempdir().unwrap();
    let backup = tempfile::tempdir().unwrap();
    let (_, controller) = controller(root.path());
    let controller = Arc::new(controller);

    let handles: Vec<_> = (0..64)
        .map(|i| {
            let controller = controller.clone();
            let o = opts(backup.path(), "archive");
            tokio::spawn(async move { controller.create(&format!("vol{}", i), &o).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let volumes = controller.list().await;
    assert_eq!(volumes.len(), 64);
    for i in 0..64 {
        assert!(root.path().join(format!("vol{}", i)).is_dir());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_same_name_exactly_one_wins() {
    let root = tempfile::tempdir().unwrap();
    let backup = tempfile::tempdir().unwrap();
    let (_, controller) = controller(root.path());
    let controller = Arc::new(controller);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let controller = controller.clone();
            let o = opts(backup.path(), "archive");
            tokio::spawn(async move { controller.create("shared", &o).await })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(VolumeError::AlreadyExists { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(controller.list().await.len(), 1);
}

#[tokio::test]
async fn test_remove_then_get_is_not_found() {
    let root = tempfile::tempdir().unwrap();
    let backup = tempfile::tempdir().unwrap();
    let (_, controller) = controller(root.path());

    controller.create("v1", &opts(backup.path(), "")).await.unwrap();
    controller.remove("v1").await.unwrap();

    assert!(matches!(
        controller.get("v1").await,
        Err(VolumeError::NotFound { .. })
    ));
    assert!(!root.path().join("v1").exists());
}
