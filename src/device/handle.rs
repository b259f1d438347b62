//! Shared, lock-guarded device handles.
//!
//! A handle owns exactly one driver. Cloning the handle shares the driver; it
//! does not duplicate it. Hardware calls acquire the handle's `tokio::sync::Mutex`
//! for their whole duration, so at most one operation is in flight per device.
//! The guard is scoped to each method and is released on every return path,
//! including errors.
//!
//! Status queries never take the hardware lock. Each handle mirrors its
//! last-known state into a `watch` channel that readers can borrow while a long
//! exposure holds the lock.

use super::{Camera, CaptureRecord, Direction, FrameBuffer, Mount, SettingsMap, TrackingState};
use crate::error::{RigError, RigResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Snapshot of a camera as last observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    pub driver: String,
    /// Settings after the last successful configure
    pub settings: SettingsMap,
    /// A hardware operation currently holds the camera
    pub busy: bool,
    /// Most recent still written by this camera
    pub last_capture: Option<PathBuf>,
    /// The driver has been cleaned up; further calls fail
    pub released: bool,
}

/// Snapshot of a mount as last observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MountStatus {
    pub driver: String,
    /// `None` when the mount is not moving
    pub tracking: Option<TrackingState>,
    /// The driver has been cleaned up; further calls fail
    pub released: bool,
}

/// Marks the camera busy for as long as it lives.
struct BusyGuard<'a> {
    status: &'a watch::Sender<CameraStatus>,
}

impl<'a> BusyGuard<'a> {
    fn engage(status: &'a watch::Sender<CameraStatus>) -> Self {
        status.send_modify(|s| s.busy = true);
        Self { status }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.status.send_modify(|s| s.busy = false);
    }
}

// =============================================================================
// CameraHandle
// =============================================================================

struct CameraShared {
    driver: Mutex<Box<dyn Camera>>,
    driver_name: &'static str,
    file_extension: &'static str,
    status: watch::Sender<CameraStatus>,
    released: AtomicBool,
}

/// Owned camera shared between the session loop, the preview loop and requests.
#[derive(Clone)]
pub struct CameraHandle {
    inner: Arc<CameraShared>,
}

impl std::fmt::Debug for CameraHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraHandle")
            .field("driver", &self.inner.driver_name)
            .finish()
    }
}

impl CameraHandle {
    /// Wrap an already initialized driver.
    pub fn new(driver: Box<dyn Camera>) -> Self {
        let driver_name = driver.driver_name();
        let file_extension = driver.file_extension();
        let (status, _) = watch::channel(CameraStatus {
            driver: driver_name.to_string(),
            settings: driver.read_settings(),
            busy: false,
            last_capture: None,
            released: false,
        });
        Self {
            inner: Arc::new(CameraShared {
                driver: Mutex::new(driver),
                driver_name,
                file_extension,
                status,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.inner.driver_name
    }

    /// Extension of the stills this driver writes.
    pub fn file_extension(&self) -> &'static str {
        self.inner.file_extension
    }

    /// Last-known status without touching the hardware.
    pub fn status(&self) -> CameraStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraStatus> {
        self.inner.status.subscribe()
    }

    /// Settings as of the last successful `configure()` or `read_settings()`.
    pub fn cached_settings(&self) -> SettingsMap {
        self.inner.status.borrow().settings.clone()
    }

    fn ensure_live(&self, operation: &str) -> RigResult<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(RigError::operation(operation, "camera has been released"));
        }
        Ok(())
    }

    pub async fn start(&self) -> RigResult<()> {
        self.ensure_live("start")?;
        self.inner.driver.lock().await.start().await
    }

    pub async fn stop(&self) -> RigResult<()> {
        self.ensure_live("stop")?;
        self.inner.driver.lock().await.stop().await
    }

    /// Expose one still. Waits for any preview frame in progress.
    pub async fn capture_still(&self, path: &Path) -> RigResult<CaptureRecord> {
        self.ensure_live("capture_still")?;
        let mut driver = self.inner.driver.lock().await;
        let _busy = BusyGuard::engage(&self.inner.status);

        let record = driver.capture_still(path).await?;
        self.inner
            .status
            .send_modify(|s| s.last_capture = Some(record.file_path.clone()));
        Ok(record)
    }

    /// Grab a preview frame, waiting for the camera lock.
    pub async fn capture_frame(&self) -> RigResult<FrameBuffer> {
        self.ensure_live("capture_frame")?;
        let mut driver = self.inner.driver.lock().await;
        let _busy = BusyGuard::engage(&self.inner.status);
        driver.capture_frame().await
    }

    /// Grab a preview frame only if the camera is idle right now.
    ///
    /// Returns `None` without waiting when another operation holds the lock.
    pub async fn try_capture_frame(&self) -> Option<RigResult<FrameBuffer>> {
        if let Err(e) = self.ensure_live("capture_frame") {
            return Some(Err(e));
        }
        let mut driver = self.inner.driver.try_lock().ok()?;
        let _busy = BusyGuard::engage(&self.inner.status);
        Some(driver.capture_frame().await)
    }

    /// Apply settings and refresh the cached status.
    pub async fn configure(&self, settings: &SettingsMap) -> RigResult<()> {
        self.ensure_live("configure")?;
        let mut driver = self.inner.driver.lock().await;
        let _busy = BusyGuard::engage(&self.inner.status);

        let result = driver.configure(settings).await;
        // Refresh the mirror on failure too; a driver may have applied part of it
        let current = driver.read_settings();
        self.inner.status.send_modify(|s| s.settings = current);
        result
    }

    /// Read settings from the driver, refreshing the cached mirror.
    pub async fn read_settings(&self) -> SettingsMap {
        let driver = self.inner.driver.lock().await;
        let current = driver.read_settings();
        self.inner
            .status
            .send_modify(|s| s.settings = current.clone());
        current
    }

    /// Clean up the driver. Only the first call has any effect.
    pub async fn release(&self) -> bool {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            debug!(driver = self.inner.driver_name, "Camera already released");
            return false;
        }
        self.inner.driver.lock().await.cleanup().await;
        self.inner.status.send_modify(|s| s.released = true);
        info!(driver = self.inner.driver_name, "Camera released");
        true
    }
}

// =============================================================================
// MountHandle
// =============================================================================

struct MountShared {
    driver: Mutex<Box<dyn Mount>>,
    driver_name: &'static str,
    status: watch::Sender<MountStatus>,
    released: AtomicBool,
}

/// Owned mount; its lock is independent of the camera's.
#[derive(Clone)]
pub struct MountHandle {
    inner: Arc<MountShared>,
}

impl std::fmt::Debug for MountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountHandle")
            .field("driver", &self.inner.driver_name)
            .finish()
    }
}

impl MountHandle {
    /// Wrap an already initialized driver.
    pub fn new(driver: Box<dyn Mount>) -> Self {
        let driver_name = driver.driver_name();
        let (status, _) = watch::channel(MountStatus {
            driver: driver_name.to_string(),
            tracking: driver.tracking(),
            released: false,
        });
        Self {
            inner: Arc::new(MountShared {
                driver: Mutex::new(driver),
                driver_name,
                status,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.inner.driver_name
    }

    /// Cached status; never waits for the mount lock.
    pub fn status(&self) -> MountStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MountStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.status.borrow().tracking.is_some()
    }

    pub fn tracking(&self) -> Option<TrackingState> {
        self.inner.status.borrow().tracking
    }

    fn ensure_live(&self, operation: &str) -> RigResult<()> {
        if self.inner.released.load(Ordering::SeqCst) {
            return Err(RigError::operation(operation, "mount has been released"));
        }
        Ok(())
    }

    /// Validates `speed` before the driver sees it.
    pub async fn start_tracking(&self, direction: Direction, speed: f64) -> RigResult<()> {
        self.ensure_live("start_tracking")?;
        let mut driver = self.inner.driver.lock().await;
        let result = driver.start_tracking(direction, speed).await;
        let tracking = driver.tracking();
        self.inner.status.send_modify(|s| s.tracking = tracking);
        result
    }

    pub async fn stop_tracking(&self) -> RigResult<()> {
        self.ensure_live("stop_tracking")?;
        let mut driver = self.inner.driver.lock().await;
        let result = driver.stop_tracking().await;
        let tracking = driver.tracking();
        self.inner.status.send_modify(|s| s.tracking = tracking);
        result
    }

    /// Clean up the driver. Only the first call has any effect.
    pub async fn release(&self) -> bool {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            debug!(driver = self.inner.driver_name, "Mount already released");
            return false;
        }
        let mut driver = self.inner.driver.lock().await;
        driver.cleanup().await;
        let tracking = driver.tracking();
        self.inner.status.send_modify(|s| {
            s.tracking = tracking;
            s.released = true;
        });
        info!(driver = self.inner.driver_name, "Mount released");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::{FaultInjector, SimulatedCamera, SimulatedMount};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_readable_during_capture() {
        let dir = tempfile::tempdir().unwrap();
        let faults = FaultInjector::new();
        faults.set_capture_delay(Duration::from_millis(200));
        let camera = CameraHandle::new(Box::new(SimulatedCamera::with_faults(faults)));

        let capturing = camera.clone();
        let path = dir.path().join("long.pgm");
        let task = tokio::spawn(async move { capturing.capture_still(&path).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = camera.status();
        assert!(status.busy);
        assert!(camera.try_capture_frame().await.is_none());

        task.await.unwrap().unwrap();
        let status = camera.status();
        assert!(!status.busy);
        assert_eq!(status.last_capture, Some(dir.path().join("long.pgm")));
    }

    #[tokio::test]
    async fn test_busy_cleared_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let faults = FaultInjector::new();
        faults.set_fail_all_captures(true);
        let camera = CameraHandle::new(Box::new(SimulatedCamera::with_faults(faults)));

        assert!(camera.capture_still(&dir.path().join("x.pgm")).await.is_err());
        assert!(!camera.status().busy);
        // Lock was released on the error path
        assert!(camera.try_capture_frame().await.is_some());
    }

    #[tokio::test]
    async fn test_configure_updates_cached_settings() {
        let camera = CameraHandle::new(Box::new(SimulatedCamera::new()));
        let mut update = SettingsMap::new();
        update.insert("gain".to_string(), json!(8.0));
        camera.configure(&update).await.unwrap();
        assert_eq!(camera.cached_settings()["gain"], json!(8.0));
    }

    #[tokio::test]
    async fn test_release_once() {
        let camera = CameraHandle::new(Box::new(SimulatedCamera::new()));
        assert!(camera.release().await);
        assert!(!camera.release().await);
        assert!(camera.status().released);
        assert!(camera.capture_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_mount_status_mirrors_driver() {
        let mount = MountHandle::new(Box::new(SimulatedMount::new()));
        mount.start_tracking(Direction::East, 1.0).await.unwrap();
        assert!(mount.is_tracking());

        assert!(mount.start_tracking(Direction::East, -1.0).await.is_err());
        // Rejected request leaves the previous motion in place
        assert_eq!(mount.tracking().map(|t| t.speed), Some(1.0));

        mount.release().await;
        // Release closes the driver without touching the motion
        assert!(mount.is_tracking());
        assert!(mount.status().released);
        assert!(mount.stop_tracking().await.is_err());
    }
}
