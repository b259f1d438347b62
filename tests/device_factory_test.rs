//! Driver probing and fallback.

mod common;

use astro_rig::config::DeviceConfig;
use astro_rig::device::simulated::SimulatedMount;
use astro_rig::device::{DeviceFactory, Direction, MountCandidate};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_failing_preferred_drivers_fall_back_to_simulation() {
    let factory = common::failing_hardware_factory();

    let camera = factory.create_camera().await;
    let mount = factory.create_mount().await;

    assert_eq!(camera.driver_name(), "simulated-camera");
    assert_eq!(mount.driver_name(), "simulated-mount");

    // The fallback handles are usable, not placeholders
    let dir = tempfile::tempdir().unwrap();
    let record = camera.capture_still(&dir.path().join("a.pgm")).await.unwrap();
    assert!(record.file_path.exists());
    mount.start_tracking(Direction::West, 1.0).await.unwrap();
    assert!(mount.is_tracking());
}

#[tokio::test]
async fn test_default_ranking_without_hardware() {
    // Point every real driver at hardware that cannot exist on a build host
    let mut config = DeviceConfig::default();
    config.camera.still_commands = vec!["astro-rig-no-such-still-tool".to_string()];
    config.camera.usb_device = PathBuf::from("/dev/astro-rig-no-such-video");
    config.mount.serial_port = "/dev/astro-rig-no-such-tty".to_string();

    let factory = DeviceFactory::from_config(&config);
    assert_eq!(factory.create_camera().await.driver_name(), "simulated-camera");
    assert_eq!(factory.create_mount().await.driver_name(), "simulated-mount");
}

#[tokio::test]
async fn test_probing_stops_at_first_success() {
    let later_builds = Arc::new(AtomicU32::new(0));
    let counter = later_builds.clone();

    let factory = DeviceFactory::from_config(&DeviceConfig::default()).with_mount_candidates(vec![
        MountCandidate::new("absent", || Box::new(common::AbsentMount)),
        MountCandidate::new("works", || Box::new(common::NamedMount::new("works"))),
        MountCandidate::new("never-reached", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(SimulatedMount::new())
        }),
    ]);

    let mount = factory.create_mount().await;
    assert_eq!(mount.driver_name(), "works");
    assert_eq!(later_builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_forced_simulation_never_builds_hardware_drivers() {
    let builds = Arc::new(AtomicU32::new(0));
    let counter = builds.clone();
    let config = DeviceConfig {
        force_simulation: true,
        ..DeviceConfig::default()
    };

    let factory = DeviceFactory::from_config(&config).with_mount_candidates(vec![
        MountCandidate::new("counting", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(SimulatedMount::new())
        }),
    ]);

    assert_eq!(factory.create_mount().await.driver_name(), "simulated-mount");
    assert_eq!(builds.load(Ordering::SeqCst), 0);
}
