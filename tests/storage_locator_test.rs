//! Capture directory fallback order.

use astro_rig::error::RigError;
use astro_rig::storage::{StorageCandidates, StorageLocator};
use std::fs;
use std::path::PathBuf;

/// A "directory" that cannot hold anything: it is a regular file.
fn blocked_location(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"not a directory").unwrap();
    path
}

#[test]
fn test_falls_back_to_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let volume = blocked_location(dir.path(), "usb-stick");
    let home = blocked_location(dir.path(), "home");
    let cwd = dir.path().join("cwd");
    fs::create_dir(&cwd).unwrap();

    let locator = StorageLocator::new(StorageCandidates {
        external_volumes: vec![volume],
        home_dir: Some(home),
        working_dir: Some(cwd.clone()),
        capture_subdir: "astro_captures".to_string(),
    });

    assert_eq!(
        locator.get_capture_directory().unwrap(),
        cwd.join("astro_captures")
    );
}

#[test]
fn test_external_volume_preferred() {
    let dir = tempfile::tempdir().unwrap();
    let volume = dir.path().join("usb-stick");
    let home = dir.path().join("home");
    fs::create_dir_all(&volume).unwrap();
    fs::create_dir_all(&home).unwrap();

    let locator = StorageLocator::new(StorageCandidates {
        external_volumes: vec![volume.clone()],
        home_dir: Some(home),
        working_dir: None,
        capture_subdir: "astro_captures".to_string(),
    });

    assert_eq!(
        locator.get_capture_directory().unwrap(),
        volume.join("astro_captures")
    );
}

#[test]
fn test_nothing_writable_is_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let locator = StorageLocator::new(StorageCandidates {
        external_volumes: Vec::new(),
        home_dir: Some(blocked_location(dir.path(), "home")),
        working_dir: Some(blocked_location(dir.path(), "cwd")),
        capture_subdir: "astro_captures".to_string(),
    });

    let err = locator.get_capture_directory().unwrap_err();
    assert!(matches!(err, RigError::StorageUnavailable(_)));
    assert!(err.to_string().contains("cwd"));
}
