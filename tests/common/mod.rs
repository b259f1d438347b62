//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use astro_rig::config::RigConfig;
use astro_rig::device::simulated::{FaultInjector, SimulatedCamera, SimulatedMount};
use astro_rig::device::{
    Camera, CameraCandidate, CaptureRecord, DeviceFactory, Direction, FrameBuffer, Mount,
    MountCandidate, SettingsMap, TrackingState,
};
use astro_rig::error::{RigError, RigResult};
use astro_rig::storage::{StorageCandidates, StorageLocator};
use astro_rig::RigContext;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Camera whose hardware is never there.
pub struct AbsentCamera(pub &'static str);

#[async_trait]
impl Camera for AbsentCamera {
    fn driver_name(&self) -> &'static str {
        self.0
    }

    fn file_extension(&self) -> &'static str {
        "jpg"
    }

    async fn initialize(&mut self) -> RigResult<()> {
        Err(RigError::unavailable(self.0, "no such device"))
    }

    async fn start(&mut self) -> RigResult<()> {
        Err(RigError::operation("start", "absent"))
    }

    async fn stop(&mut self) -> RigResult<()> {
        Err(RigError::operation("stop", "absent"))
    }

    async fn capture_still(&mut self, _path: &Path) -> RigResult<CaptureRecord> {
        Err(RigError::operation("capture_still", "absent"))
    }

    async fn capture_frame(&mut self) -> RigResult<FrameBuffer> {
        Err(RigError::operation("capture_frame", "absent"))
    }

    async fn configure(&mut self, _settings: &SettingsMap) -> RigResult<()> {
        Err(RigError::operation("configure", "absent"))
    }

    fn read_settings(&self) -> SettingsMap {
        SettingsMap::new()
    }

    async fn cleanup(&mut self) {}
}

/// Mount whose controller never answers.
pub struct AbsentMount;

#[async_trait]
impl Mount for AbsentMount {
    fn driver_name(&self) -> &'static str {
        "absent-mount"
    }

    async fn initialize(&mut self) -> RigResult<()> {
        Err(RigError::unavailable("absent-mount", "port not found"))
    }

    async fn start_tracking(&mut self, _direction: Direction, _speed: f64) -> RigResult<()> {
        Err(RigError::operation("start_tracking", "absent"))
    }

    async fn stop_tracking(&mut self) -> RigResult<()> {
        Err(RigError::operation("stop_tracking", "absent"))
    }

    fn tracking(&self) -> Option<TrackingState> {
        None
    }

    async fn cleanup(&mut self) {}
}

/// Working in-memory mount that reports its own driver name.
pub struct NamedMount {
    pub name: &'static str,
    inner: SimulatedMount,
}

impl NamedMount {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: SimulatedMount::new(),
        }
    }
}

#[async_trait]
impl Mount for NamedMount {
    fn driver_name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&mut self) -> RigResult<()> {
        self.inner.initialize().await
    }

    async fn start_tracking(&mut self, direction: Direction, speed: f64) -> RigResult<()> {
        self.inner.start_tracking(direction, speed).await
    }

    async fn stop_tracking(&mut self) -> RigResult<()> {
        self.inner.stop_tracking().await
    }

    fn tracking(&self) -> Option<TrackingState> {
        self.inner.tracking()
    }

    async fn cleanup(&mut self) {
        self.inner.cleanup().await
    }
}

/// Factory whose hardware candidates all fail, so the simulated drivers win.
pub fn failing_hardware_factory() -> DeviceFactory {
    DeviceFactory::from_config(&Default::default())
        .with_camera_candidates(vec![
            CameraCandidate::new("pi-camera", || Box::new(AbsentCamera("pi-camera"))),
            CameraCandidate::new("usb-camera", || Box::new(AbsentCamera("usb-camera"))),
        ])
        .with_mount_candidates(vec![MountCandidate::new("serial-mount", || {
            Box::new(AbsentMount)
        })])
}

/// Factory that hands out a simulated camera wired to `faults`.
pub fn faulty_camera_factory(faults: FaultInjector) -> DeviceFactory {
    DeviceFactory::from_config(&Default::default())
        .with_camera_candidates(vec![CameraCandidate::new("faulty", move || {
            Box::new(SimulatedCamera::with_faults(faults.clone()))
        })])
        .with_mount_candidates(vec![MountCandidate::new("sim", || {
            Box::new(SimulatedMount::new())
        })])
}

/// Storage rooted at `dir/captures`.
pub fn storage_in(dir: &Path) -> StorageLocator {
    StorageLocator::new(StorageCandidates {
        external_volumes: Vec::new(),
        home_dir: Some(dir.to_path_buf()),
        working_dir: None,
        capture_subdir: "captures".to_string(),
    })
}

/// Configuration that keeps every file inside `dir`.
pub fn test_config(dir: &Path) -> RigConfig {
    let mut config = RigConfig::default();
    config.session.retry_backoff = Duration::from_millis(10);
    config.session.config_file = Some(dir.join("session.json"));
    config.preview.interval = Duration::from_millis(10);
    config
}

/// A fully simulated rig writing into `dir`.
pub async fn simulated_rig(dir: &Path, faults: FaultInjector) -> RigContext {
    RigContext::from_parts(test_config(dir), faulty_camera_factory(faults), storage_in(dir))
        .await
        .expect("rig should initialise against a writable temp dir")
}
