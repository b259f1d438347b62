//! Snapshot and restore of device settings around a usage session.
//!
//! A [`StateGuard`] records a device's full settings map right after it is
//! initialized and reapplies it when the device is released. Restoration is
//! best-effort per key: a key that fails to apply is logged and reported, and
//! the remaining keys are still restored. Release happens once; repeated
//! releases are no-ops.
//!
//! Mounts expose their state as a single `tracking` key whose value is either
//! `false` or `{ "direction": ..., "speed": ... }`.

use crate::device::{CameraHandle, Direction, MountHandle, SettingsMap};
use crate::error::{RigError, RigResult};
use crate::shutdown::ShutdownSequence;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A device whose settings can be snapshotted and reapplied key by key.
#[async_trait]
pub trait GuardedDevice: Send + Sync + 'static {
    /// Name used in logs and reports.
    fn device_name(&self) -> String;

    /// Full current settings.
    async fn snapshot(&self) -> SettingsMap;

    /// Reapply a single setting.
    async fn apply(&self, key: &str, value: &Value) -> RigResult<()>;

    /// Release the underlying hardware.
    async fn release(&self);
}

#[async_trait]
impl GuardedDevice for CameraHandle {
    fn device_name(&self) -> String {
        self.driver_name().to_string()
    }

    async fn snapshot(&self) -> SettingsMap {
        self.read_settings().await
    }

    async fn apply(&self, key: &str, value: &Value) -> RigResult<()> {
        let mut single = SettingsMap::new();
        single.insert(key.to_string(), value.clone());
        self.configure(&single).await
    }

    async fn release(&self) {
        CameraHandle::release(self).await;
    }
}

#[async_trait]
impl GuardedDevice for MountHandle {
    fn device_name(&self) -> String {
        self.driver_name().to_string()
    }

    async fn snapshot(&self) -> SettingsMap {
        let tracking = match self.tracking() {
            Some(t) => json!({ "direction": t.direction, "speed": t.speed }),
            None => Value::Bool(false),
        };
        SettingsMap::from([("tracking".to_string(), tracking)])
    }

    async fn apply(&self, key: &str, value: &Value) -> RigResult<()> {
        if key != "tracking" {
            return Err(RigError::operation(
                "restore",
                format!("mount has no setting '{}'", key),
            ));
        }
        match value {
            Value::Bool(false) | Value::Null => {
                if self.is_tracking() {
                    self.stop_tracking().await?;
                }
                Ok(())
            }
            Value::Object(motion) => {
                let direction: Direction = motion
                    .get("direction")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()?
                    .unwrap_or_default();
                let speed = motion.get("speed").and_then(Value::as_f64).unwrap_or(1.0);
                self.start_tracking(direction, speed).await
            }
            other => Err(RigError::operation(
                "restore",
                format!("unexpected tracking value {}", other),
            )),
        }
    }

    async fn release(&self) {
        MountHandle::release(self).await;
    }
}

/// Outcome of a restore pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub device: String,
    /// Keys reapplied successfully
    pub restored: Vec<String>,
    /// Key and failure reason
    pub failed: Vec<(String, String)>,
    /// The device had already been released; nothing was done
    pub already_released: bool,
}

impl RestoreReport {
    /// Every key was restored.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Guards one device's original settings.
pub struct StateGuard<D: GuardedDevice> {
    device: D,
    original: OnceCell<SettingsMap>,
    released: AtomicBool,
}

impl<D: GuardedDevice> StateGuard<D> {
    /// Guard with no snapshot yet.
    pub fn new(device: D) -> Self {
        Self {
            device,
            original: OnceCell::new(),
            released: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// The captured snapshot, if any.
    pub fn original_state(&self) -> Option<&SettingsMap> {
        self.original.get()
    }

    /// Record the device's current settings. Only the first call records.
    pub async fn save_original_state(&self) {
        if self.original.get().is_some() {
            warn!(device = %self.device.device_name(), "Original state already saved; keeping first snapshot");
            return;
        }
        let snapshot = self.device.snapshot().await;
        info!(device = %self.device.device_name(), keys = snapshot.len(), "Saved original device state");
        if self.original.set(snapshot).is_err() {
            warn!(device = %self.device.device_name(), "Concurrent snapshot; keeping first");
        }
    }

    /// Reapply the recorded settings, one key at a time. Runs once.
    pub async fn restore_original_state(&self) -> RestoreReport {
        let mut report = RestoreReport {
            device: self.device.device_name(),
            ..RestoreReport::default()
        };

        if self.released.swap(true, Ordering::SeqCst) {
            report.already_released = true;
            return report;
        }

        let Some(original) = self.original.get() else {
            warn!(device = %report.device, "No original state recorded; nothing to restore");
            return report;
        };

        for (key, value) in original {
            match self.device.apply(key, value).await {
                Ok(()) => report.restored.push(key.clone()),
                Err(e) => {
                    warn!(device = %report.device, key = %key, error = %e, "Failed to restore setting");
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }

        info!(
            device = %report.device,
            restored = report.restored.len(),
            failed = report.failed.len(),
            "Original device state restored"
        );
        report
    }

    /// Restore, then release the hardware.
    pub async fn release(&self) -> RestoreReport {
        let report = self.restore_original_state().await;
        if !report.already_released {
            self.device.release().await;
        }
        report
    }

    /// Arrange for [`release`](Self::release) to run with the shutdown sequence.
    pub fn register_release(self: &Arc<Self>, shutdown: &ShutdownSequence) {
        let guard = Arc::clone(self);
        let name = format!("restore {}", self.device.device_name());
        shutdown.register(name, move || async move {
            guard.release().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::{FaultInjector, SimulatedCamera, SimulatedMount};

    #[tokio::test]
    async fn test_second_save_keeps_first_snapshot() {
        let camera = CameraHandle::new(Box::new(SimulatedCamera::new()));
        let guard = StateGuard::new(camera.clone());
        guard.save_original_state().await;

        let mut update = SettingsMap::new();
        update.insert("gain".to_string(), json!(3.0));
        camera.configure(&update).await.unwrap();
        guard.save_original_state().await;

        assert_eq!(guard.original_state().unwrap()["gain"], json!(1.0));
    }

    #[tokio::test]
    async fn test_restore_without_snapshot() {
        let guard = StateGuard::new(CameraHandle::new(Box::new(SimulatedCamera::new())));
        let report = guard.restore_original_state().await;
        assert!(report.restored.is_empty());
        assert!(!report.already_released);
    }

    #[tokio::test]
    async fn test_failed_key_does_not_abort_restore() {
        let faults = FaultInjector::new();
        let camera = CameraHandle::new(Box::new(SimulatedCamera::with_faults(faults.clone())));
        let guard = StateGuard::new(camera.clone());
        guard.save_original_state().await;

        let mut update = SettingsMap::new();
        update.insert("gain".to_string(), json!(6.0));
        update.insert("awb".to_string(), json!("daylight"));
        update.insert("width".to_string(), json!(320));
        camera.configure(&update).await.unwrap();

        faults.reject_setting("awb");
        let report = guard.restore_original_state().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "awb");
        let settings = camera.read_settings().await;
        assert_eq!(settings["gain"], json!(1.0));
        assert_eq!(settings["width"], json!(640));
        assert_eq!(settings["awb"], json!("daylight"));
    }

    #[tokio::test]
    async fn test_mount_restore_stops_tracking() {
        let mount = MountHandle::new(Box::new(SimulatedMount::new()));
        let guard = StateGuard::new(mount.clone());
        guard.save_original_state().await;

        mount.start_tracking(Direction::East, 1.0).await.unwrap();
        let report = guard.restore_original_state().await;
        assert!(report.is_clean());
        assert!(!mount.is_tracking());
    }

    #[tokio::test]
    async fn test_mount_restore_resumes_tracking() {
        let mount = MountHandle::new(Box::new(SimulatedMount::new()));
        mount.start_tracking(Direction::West, 0.5).await.unwrap();
        let guard = StateGuard::new(mount.clone());
        guard.save_original_state().await;

        mount.stop_tracking().await.unwrap();
        guard.restore_original_state().await;
        let tracking = mount.tracking().unwrap();
        assert_eq!(tracking.direction, Direction::West);
        assert_eq!(tracking.speed, 0.5);
    }
}
