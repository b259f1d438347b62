//! Runtime driver selection.
//!
//! The factory walks a ranked list of named driver constructors, initializes
//! each in turn and keeps the first one that comes up. A candidate that fails
//! is logged and skipped; probing never fails as a whole because the simulated
//! driver is always tried last and always initializes.
//!
//! Default ranking:
//!
//! ```text
//! camera: pi-camera -> usb-camera -> simulated-camera
//! mount:  serial-mount -> simulated-mount
//! ```

use super::handle::{CameraHandle, MountHandle};
use super::pi_camera::PiCamera;
use super::serial_mount::SerialMount;
use super::simulated::{SimulatedCamera, SimulatedMount};
use super::usb_camera::UsbCamera;
use super::{Camera, Mount};
use crate::config::DeviceConfig;
use tracing::{error, info, warn};

type CameraConstructor = Box<dyn Fn() -> Box<dyn Camera> + Send + Sync>;
type MountConstructor = Box<dyn Fn() -> Box<dyn Mount> + Send + Sync>;

/// A named way of building one camera driver.
pub struct CameraCandidate {
    /// Name used in probe logs
    pub name: &'static str,
    build: CameraConstructor,
}

impl CameraCandidate {
    pub fn new<F>(name: &'static str, build: F) -> Self
    where
        F: Fn() -> Box<dyn Camera> + Send + Sync + 'static,
    {
        Self {
            name,
            build: Box::new(build),
        }
    }
}

/// A named way of building one mount driver.
pub struct MountCandidate {
    /// Name used in probe logs
    pub name: &'static str,
    build: MountConstructor,
}

impl MountCandidate {
    pub fn new<F>(name: &'static str, build: F) -> Self
    where
        F: Fn() -> Box<dyn Mount> + Send + Sync + 'static,
    {
        Self {
            name,
            build: Box::new(build),
        }
    }
}

/// Builds camera and mount handles from the best available drivers.
pub struct DeviceFactory {
    force_simulation: bool,
    camera_candidates: Vec<CameraCandidate>,
    mount_candidates: Vec<MountCandidate>,
}

impl DeviceFactory {
    /// Factory with the default hardware ranking.
    pub fn from_config(config: &DeviceConfig) -> Self {
        let pi_config = config.camera.clone();
        let usb_config = config.camera.clone();
        let mount_config = config.mount.clone();

        Self {
            force_simulation: config.force_simulation,
            camera_candidates: vec![
                CameraCandidate::new("pi-camera", move || Box::new(PiCamera::new(&pi_config))),
                CameraCandidate::new("usb-camera", move || Box::new(UsbCamera::new(&usb_config))),
            ],
            mount_candidates: vec![MountCandidate::new("serial-mount", move || {
                Box::new(SerialMount::new(&mount_config))
            })],
        }
    }

    /// Factory that only ever produces simulated devices.
    pub fn simulated() -> Self {
        Self {
            force_simulation: true,
            camera_candidates: Vec::new(),
            mount_candidates: Vec::new(),
        }
    }

    /// Replace the ranked hardware cameras. The simulated fallback is kept.
    pub fn with_camera_candidates(mut self, candidates: Vec<CameraCandidate>) -> Self {
        self.camera_candidates = candidates;
        self
    }

    /// Replace the ranked hardware mounts. The simulated fallback is kept.
    pub fn with_mount_candidates(mut self, candidates: Vec<MountCandidate>) -> Self {
        self.mount_candidates = candidates;
        self
    }

    /// Probe camera drivers in rank order and return the first that initializes.
    pub async fn create_camera(&self) -> CameraHandle {
        if self.force_simulation {
            info!("Simulation forced; skipping camera hardware probing");
        } else {
            for candidate in &self.camera_candidates {
                let mut driver = (candidate.build)();
                match driver.initialize().await {
                    Ok(()) => {
                        info!(driver = candidate.name, "Camera driver selected");
                        return CameraHandle::new(driver);
                    }
                    Err(e) => {
                        warn!(driver = candidate.name, error = %e, "Camera driver unavailable, trying next");
                    }
                }
            }
        }

        let mut driver = SimulatedCamera::new();
        if let Err(e) = driver.initialize().await {
            error!(error = %e, "Simulated camera reported an initialization error");
        }
        info!(driver = driver.driver_name(), "Camera driver selected");
        CameraHandle::new(Box::new(driver))
    }

    /// Probe mount drivers in rank order and return the first that initializes.
    pub async fn create_mount(&self) -> MountHandle {
        if self.force_simulation {
            info!("Simulation forced; skipping mount hardware probing");
        } else {
            for candidate in &self.mount_candidates {
                let mut driver = (candidate.build)();
                match driver.initialize().await {
                    Ok(()) => {
                        info!(driver = candidate.name, "Mount driver selected");
                        return MountHandle::new(driver);
                    }
                    Err(e) => {
                        warn!(driver = candidate.name, error = %e, "Mount driver unavailable, trying next");
                    }
                }
            }
        }

        let mut driver = SimulatedMount::new();
        if let Err(e) = driver.initialize().await {
            error!(error = %e, "Simulated mount reported an initialization error");
        }
        info!(driver = driver.driver_name(), "Mount driver selected");
        MountHandle::new(Box::new(driver))
    }
}
