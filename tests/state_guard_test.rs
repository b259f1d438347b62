//! Settings snapshot/restore and the shutdown sequence.

mod common;

use astro_rig::device::simulated::{FaultInjector, SimulatedCamera, SimulatedMount};
use astro_rig::device::{CameraHandle, Direction, MountHandle, SettingsMap};
use astro_rig::shutdown::ShutdownSequence;
use astro_rig::state_guard::StateGuard;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_save_then_restore_without_changes_is_identity() {
    let camera = CameraHandle::new(Box::new(SimulatedCamera::new()));
    let before = camera.read_settings().await;

    let guard = StateGuard::new(camera.clone());
    guard.save_original_state().await;
    let report = guard.restore_original_state().await;

    assert!(report.is_clean());
    assert_eq!(report.restored.len(), before.len());
    assert_eq!(camera.read_settings().await, before);
}

#[tokio::test]
async fn test_restore_undoes_session_changes() {
    let camera = CameraHandle::new(Box::new(SimulatedCamera::new()));
    let guard = StateGuard::new(camera.clone());
    guard.save_original_state().await;
    let original = guard.original_state().cloned().unwrap();

    let mut night = SettingsMap::new();
    night.insert("exposure_us".to_string(), json!(30_000_000));
    night.insert("gain".to_string(), json!(8.0));
    camera.configure(&night).await.unwrap();
    assert_ne!(camera.read_settings().await, original);

    guard.restore_original_state().await;
    assert_eq!(camera.read_settings().await, original);
}

#[tokio::test]
async fn test_second_release_is_noop() {
    let camera = CameraHandle::new(Box::new(SimulatedCamera::new()));
    let guard = StateGuard::new(camera.clone());
    guard.save_original_state().await;

    let first = guard.release().await;
    let second = guard.release().await;

    assert!(!first.already_released);
    assert!(second.already_released);
    assert!(second.restored.is_empty());
    assert!(camera.status().released);
}

#[tokio::test]
async fn test_shutdown_sequence_restores_every_device_once() {
    let faults = FaultInjector::new();
    let camera = CameraHandle::new(Box::new(SimulatedCamera::with_faults(faults)));
    let mount = MountHandle::new(Box::new(SimulatedMount::new()));
    let shutdown = ShutdownSequence::new();

    let camera_guard = Arc::new(StateGuard::new(camera.clone()));
    camera_guard.save_original_state().await;
    camera_guard.register_release(&shutdown);
    let mount_guard = Arc::new(StateGuard::new(mount.clone()));
    mount_guard.save_original_state().await;
    mount_guard.register_release(&shutdown);

    let mut update = SettingsMap::new();
    update.insert("awb".to_string(), json!("tungsten"));
    camera.configure(&update).await.unwrap();
    mount.start_tracking(Direction::East, 1.0).await.unwrap();

    assert_eq!(shutdown.run().await, 2);
    assert_eq!(shutdown.run().await, 0);

    assert!(camera.status().released);
    assert_eq!(camera.status().settings["awb"], json!("auto"));
    assert!(mount.status().released);
    assert!(!mount.is_tracking());
}

#[tokio::test]
async fn test_rig_shutdown_restores_devices() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;
    let original = rig.camera_original_state().cloned().unwrap();

    let mut update = SettingsMap::new();
    update.insert("width".to_string(), json!(1024));
    rig.update_camera_settings(&update).await.unwrap();
    rig.start_tracking(Direction::East, 1.0).await.unwrap();

    rig.shutdown().await;
    rig.shutdown().await;

    assert_eq!(rig.get_camera_status().settings, original);
    assert!(rig.get_camera_status().released);
    assert!(rig.get_mount_status().tracking.is_none());
}

#[tokio::test]
async fn test_release_leaves_original_tracking_running() {
    let mount = MountHandle::new(Box::new(SimulatedMount::new()));
    mount.start_tracking(Direction::West, 0.5).await.unwrap();
    let guard = StateGuard::new(mount.clone());
    guard.save_original_state().await;

    mount.stop_tracking().await.unwrap();
    let report = guard.release().await;

    assert_eq!(report.restored, vec!["tracking".to_string()]);
    assert!(mount.status().released);
    let tracking = mount.tracking().expect("tracking restored before release");
    assert_eq!(tracking.direction, Direction::West);
    assert_eq!(tracking.speed, 0.5);
}
