//! Device capability contracts and driver implementations.
//!
//! Every camera and mount driver implements one of two async traits:
//!
//! - [`Camera`]: still capture, preview frames and a settings map
//! - [`Mount`]: sidereal tracking control
//!
//! Drivers are never shared directly. The [`DeviceFactory`](factory::DeviceFactory)
//! probes them in rank order and wraps the winner in a [`CameraHandle`] or
//! [`MountHandle`], which serialises hardware access behind a per-device lock.
//!
//! # Driver Variants
//!
//! | Driver | Device | Backend |
//! |---|---|---|
//! | [`PiCamera`](pi_camera::PiCamera) | SBC camera connector | `rpicam-still` / `libcamera-still` |
//! | [`UsbCamera`](usb_camera::UsbCamera) | USB video class | `fswebcam` on a V4L2 node |
//! | [`SimulatedCamera`](simulated::SimulatedCamera) | none | synthetic star field |
//! | [`SerialMount`](serial_mount::SerialMount) | motor controller | line protocol over serial |
//! | [`SimulatedMount`](simulated::SimulatedMount) | none | in-memory |

use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod command;
pub mod factory;
pub mod handle;
pub mod pi_camera;
pub mod serial_mount;
pub mod settings;
pub mod simulated;
pub mod usb_camera;

pub use factory::{CameraCandidate, DeviceFactory, MountCandidate};
pub use handle::{CameraHandle, CameraStatus, MountHandle, MountStatus};

/// Setting name to value, as read from or written to a device.
pub type SettingsMap = BTreeMap<String, Value>;

// =============================================================================
// Data Types
// =============================================================================

/// Right-ascension drive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Normal sidereal direction for the northern hemisphere
    #[default]
    East,
    /// Reverse drive (southern hemisphere)
    West,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "east" | "e" => Ok(Direction::East),
            "west" | "w" => Ok(Direction::West),
            other => Err(RigError::InvalidParameter(format!(
                "unknown tracking direction '{}'",
                other
            ))),
        }
    }
}

/// Current tracking motion of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingState {
    pub direction: Direction,
    /// Multiple of the sidereal rate
    pub speed: f64,
}

/// Checks a requested tracking speed before it reaches a driver.
pub fn validate_tracking_speed(speed: f64) -> RigResult<()> {
    if !speed.is_finite() || speed <= 0.0 {
        return Err(RigError::InvalidParameter(format!(
            "tracking speed must be a positive multiple of sidereal rate, got {}",
            speed
        )));
    }
    Ok(())
}

/// One still image written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Position within the owning session (0 for manual captures)
    pub sequence_index: u32,
    pub timestamp: DateTime<Utc>,
    pub file_path: PathBuf,
    /// Camera settings in effect for this exposure
    pub exposure: SettingsMap,
}

impl CaptureRecord {
    /// Record for a capture that just finished writing `file_path`.
    pub fn new(file_path: impl Into<PathBuf>, exposure: SettingsMap) -> Self {
        Self {
            sequence_index: 0,
            timestamp: Utc::now(),
            file_path: file_path.into(),
            exposure,
        }
    }

    /// Position the record within its session.
    pub fn with_sequence_index(mut self, sequence_index: u32) -> Self {
        self.sequence_index = sequence_index;
        self
    }
}

/// Encoding of a preview frame's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Jpeg,
    /// Binary portable graymap (P5)
    Pgm,
}

/// A single live-preview frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    /// Encoded bytes in `format`
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Capability Traits
// =============================================================================

/// Camera capability contract.
///
/// Every call completes (or fails) before returning. Callers go through a
/// [`CameraHandle`] so that only one hardware operation is in flight at a time.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Short identifier used in logs and status reports
    fn driver_name(&self) -> &'static str;

    /// File extension for stills written by this driver
    fn file_extension(&self) -> &'static str;

    /// Bring the device up. Fails with `DeviceUnavailable` when absent.
    async fn initialize(&mut self) -> RigResult<()>;

    /// Begin streaming for preview, where the driver needs it.
    async fn start(&mut self) -> RigResult<()>;

    async fn stop(&mut self) -> RigResult<()>;

    /// Expose and write one still to `path`.
    async fn capture_still(&mut self, path: &Path) -> RigResult<CaptureRecord>;

    /// Grab a low-resolution frame for live preview.
    async fn capture_frame(&mut self) -> RigResult<FrameBuffer>;

    /// Apply a partial settings map. Unknown keys or out-of-range values are
    /// rejected and nothing is applied.
    async fn configure(&mut self, settings: &SettingsMap) -> RigResult<()>;

    /// Full current settings map.
    fn read_settings(&self) -> SettingsMap;

    /// Release driver resources. Never fails; problems are logged.
    async fn cleanup(&mut self);
}

/// Equatorial mount capability contract.
#[async_trait]
pub trait Mount: Send + Sync {
    /// Stable name used in logs and status.
    fn driver_name(&self) -> &'static str;

    /// Connect and verify the hardware is present.
    async fn initialize(&mut self) -> RigResult<()>;

    /// Drive the RA axis in `direction` at `speed` times sidereal rate.
    async fn start_tracking(&mut self, direction: Direction, speed: f64) -> RigResult<()>;

    async fn stop_tracking(&mut self) -> RigResult<()>;

    fn is_tracking(&self) -> bool {
        self.tracking().is_some()
    }

    /// Current motion, `None` when stopped.
    fn tracking(&self) -> Option<TrackingState>;

    /// Release the controller connection. Motion is left as it is; whoever
    /// owns the mount's original state decides whether it should stop.
    async fn cleanup(&mut self);
}
