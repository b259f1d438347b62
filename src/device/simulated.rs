//! Simulated Device Implementations
//!
//! Drivers that need no hardware. The device factory falls back to these when
//! every real driver fails to initialize, so they must always come up.
//!
//! # Available Simulations
//!
//! - `SimulatedCamera` - writes synthetic star-field PGM images
//! - `SimulatedMount` - keeps tracking state in memory
//!
//! Both use `tokio::time::sleep` for simulated timing, never `std::thread::sleep`.
//!
//! # Fault Injection
//!
//! [`FaultInjector`] is a cloneable handle shared with a `SimulatedCamera`. Tests
//! keep one clone and flip faults while the camera is owned by a handle or a
//! running session.

use super::settings::{get_f64, get_str, get_u64, validate_settings, SettingSpec};
use super::{
    Camera, CaptureRecord, Direction, FrameBuffer, FrameFormat, Mount, SettingsMap, TrackingState,
};
use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

const CAMERA_SPECS: &[SettingSpec] = &[
    SettingSpec::integer("exposure_us", 1, 600_000_000),
    SettingSpec::float("gain", 1.0, 16.0),
    SettingSpec::choice(
        "awb",
        &["auto", "daylight", "cloudy", "tungsten", "fluorescent", "indoor"],
    ),
    SettingSpec::integer("width", 16, 4096),
    SettingSpec::integer("height", 16, 4096),
];

const PREVIEW_WIDTH: u32 = 160;
const PREVIEW_HEIGHT: u32 = 120;

// =============================================================================
// FaultInjector
// =============================================================================

#[derive(Debug, Default)]
struct FaultState {
    fail_all_captures: AtomicBool,
    fail_next_captures: AtomicU32,
    capture_delay_ms: AtomicU64,
    captures_attempted: AtomicU32,
    rejected_keys: Mutex<HashSet<String>>,
}

/// Shared switchboard for making a [`SimulatedCamera`] misbehave.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every capture fail until cleared.
    pub fn set_fail_all_captures(&self, fail: bool) {
        self.state.fail_all_captures.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` captures fail.
    pub fn fail_next_captures(&self, count: u32) {
        self.state.fail_next_captures.store(count, Ordering::SeqCst);
    }

    /// Simulated readout time per still capture.
    pub fn set_capture_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.state.capture_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Make `configure()` reject any map containing `key`.
    pub fn reject_setting(&self, key: &str) {
        self.state
            .rejected_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn clear_rejected_settings(&self) {
        self.state
            .rejected_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of `capture_still` calls seen, including failed ones.
    pub fn captures_attempted(&self) -> u32 {
        self.state.captures_attempted.load(Ordering::SeqCst)
    }

    fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.state.capture_delay_ms.load(Ordering::SeqCst))
    }

    fn take_capture_fault(&self) -> bool {
        self.state.captures_attempted.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_all_captures.load(Ordering::SeqCst) {
            return true;
        }
        self.state
            .fail_next_captures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn rejected_key(&self, settings: &SettingsMap) -> Option<String> {
        let rejected = self
            .state
            .rejected_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        settings.keys().find(|k| rejected.contains(*k)).cloned()
    }
}

// =============================================================================
// SimulatedCamera
// =============================================================================

/// Camera that renders a deterministic synthetic star field.
///
/// Stills are binary PGM files at the configured `width` x `height`
/// (default 640x480). Preview frames are 160x120.
pub struct SimulatedCamera {
    settings: SettingsMap,
    faults: FaultInjector,
    frame_counter: u64,
    started: bool,
}

impl SimulatedCamera {
    pub fn new() -> Self {
        Self::with_faults(FaultInjector::new())
    }

    /// Simulated camera sharing `faults` with the test that built it.
    pub fn with_faults(faults: FaultInjector) -> Self {
        let mut settings = SettingsMap::new();
        settings.insert("exposure_us".to_string(), json!(1_000_000));
        settings.insert("gain".to_string(), json!(1.0));
        settings.insert("awb".to_string(), json!("auto"));
        settings.insert("width".to_string(), json!(640));
        settings.insert("height".to_string(), json!(480));
        Self {
            settings,
            faults,
            frame_counter: 0,
            started: false,
        }
    }

    pub fn faults(&self) -> FaultInjector {
        self.faults.clone()
    }

    fn render(&mut self, width: u32, height: u32) -> Vec<u8> {
        self.frame_counter += 1;
        let gain = get_f64(&self.settings, "gain", 1.0);
        let exposure_s = get_u64(&self.settings, "exposure_us", 1_000_000) as f64 / 1e6;
        star_field(width, height, self.frame_counter, gain * exposure_s.sqrt())
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new()
    }
}

/// P5 graymap with a noisy sky background and a fixed set of stars.
fn star_field(width: u32, height: u32, seed: u64, brightness: f64) -> Vec<u8> {
    let header = format!("P5\n{} {}\n255\n", width, height);
    let mut data = Vec::with_capacity(header.len() + (width * height) as usize);
    data.extend_from_slice(header.as_bytes());

    // Linear congruential generator; deterministic per frame
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 33) as u32
    };

    let stars: Vec<(u32, u32)> = (0..(width * height / 2000).max(3))
        .map(|i| {
            let x = ((i as u64 * 7919 + 13) % width as u64) as u32;
            let y = ((i as u64 * 104_729 + 7) % height as u64) as u32;
            (x, y)
        })
        .collect();

    let sky = (12.0 * brightness).min(60.0);
    let mut pixels: Vec<f64> = (0..width * height)
        .map(|_| sky + (next() % 8) as f64)
        .collect();

    for (sx, sy) in stars {
        for y in sy.saturating_sub(1)..=(sy + 1).min(height - 1) {
            for x in sx.saturating_sub(1)..=(sx + 1).min(width - 1) {
                let peak = if x == sx && y == sy { 200.0 } else { 60.0 };
                pixels[(y * width + x) as usize] += peak * brightness.min(1.0);
            }
        }
    }

    data.extend(pixels.into_iter().map(|v| v.clamp(0.0, 255.0) as u8));
    data
}

#[async_trait]
impl Camera for SimulatedCamera {
    fn driver_name(&self) -> &'static str {
        "simulated-camera"
    }

    fn file_extension(&self) -> &'static str {
        "pgm"
    }

    async fn initialize(&mut self) -> RigResult<()> {
        info!("Simulated camera initialized");
        Ok(())
    }

    async fn start(&mut self) -> RigResult<()> {
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> RigResult<()> {
        self.started = false;
        Ok(())
    }

    async fn capture_still(&mut self, path: &Path) -> RigResult<CaptureRecord> {
        if self.faults.take_capture_fault() {
            return Err(RigError::operation(
                "capture_still",
                "simulated sensor readout failure",
            ));
        }

        // Simulate readout time
        let delay = self.faults.capture_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let width = get_u64(&self.settings, "width", 640) as u32;
        let height = get_u64(&self.settings, "height", 480) as u32;
        let image = self.render(width, height);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &image)
            .await
            .map_err(|e| RigError::operation("capture_still", format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), frame = self.frame_counter, "Simulated still written");
        Ok(CaptureRecord::new(path, self.settings.clone()))
    }

    async fn capture_frame(&mut self) -> RigResult<FrameBuffer> {
        let data = self.render(PREVIEW_WIDTH, PREVIEW_HEIGHT);
        Ok(FrameBuffer {
            width: PREVIEW_WIDTH,
            height: PREVIEW_HEIGHT,
            format: FrameFormat::Pgm,
            data,
            timestamp: Utc::now(),
        })
    }

    async fn configure(&mut self, settings: &SettingsMap) -> RigResult<()> {
        validate_settings(self.driver_name(), CAMERA_SPECS, settings)?;
        if let Some(key) = self.faults.rejected_key(settings) {
            return Err(RigError::operation(
                "configure",
                format!("simulated camera refused setting '{}'", key),
            ));
        }
        for (key, value) in settings {
            self.settings.insert(key.clone(), value.clone());
        }
        debug!(awb = get_str(&self.settings, "awb", "auto"), "Simulated camera configured");
        Ok(())
    }

    fn read_settings(&self) -> SettingsMap {
        self.settings.clone()
    }

    async fn cleanup(&mut self) {
        self.started = false;
        info!(frames = self.frame_counter, "Simulated camera released");
    }
}

// =============================================================================
// SimulatedMount
// =============================================================================

/// Mount that only records what it was told to do.
#[derive(Debug, Default)]
pub struct SimulatedMount {
    tracking: Option<TrackingState>,
}

impl SimulatedMount {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Mount for SimulatedMount {
    fn driver_name(&self) -> &'static str {
        "simulated-mount"
    }

    async fn initialize(&mut self) -> RigResult<()> {
        info!("Simulated mount initialized");
        Ok(())
    }

    async fn start_tracking(&mut self, direction: Direction, speed: f64) -> RigResult<()> {
        super::validate_tracking_speed(speed)?;
        self.tracking = Some(TrackingState { direction, speed });
        info!(%direction, speed, "Simulated mount tracking");
        Ok(())
    }

    async fn stop_tracking(&mut self) -> RigResult<()> {
        self.tracking = None;
        Ok(())
    }

    fn tracking(&self) -> Option<TrackingState> {
        self.tracking
    }

    async fn cleanup(&mut self) {
        debug!(tracking = ?self.tracking, "Simulated mount released");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_writes_pgm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.pgm");
        let mut camera = SimulatedCamera::new();
        camera.initialize().await.unwrap();

        let record = camera.capture_still(&path).await.unwrap();
        assert_eq!(record.file_path, path);
        assert_eq!(record.exposure, camera.read_settings());

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5\n640 480\n255\n"));
        assert_eq!(bytes.len(), "P5\n640 480\n255\n".len() + 640 * 480);
    }

    #[tokio::test]
    async fn test_fail_next_captures() {
        let dir = tempfile::tempdir().unwrap();
        let faults = FaultInjector::new();
        let mut camera = SimulatedCamera::with_faults(faults.clone());
        faults.fail_next_captures(1);

        assert!(camera.capture_still(&dir.path().join("a.pgm")).await.is_err());
        assert!(camera.capture_still(&dir.path().join("b.pgm")).await.is_ok());
        assert_eq!(faults.captures_attempted(), 2);
    }

    #[tokio::test]
    async fn test_configure_is_all_or_nothing() {
        let mut camera = SimulatedCamera::new();
        let before = camera.read_settings();

        let mut update = SettingsMap::new();
        update.insert("gain".to_string(), json!(4.0));
        update.insert("iso".to_string(), json!(800));
        assert!(camera.configure(&update).await.is_err());
        assert_eq!(camera.read_settings(), before);

        update.remove("iso");
        camera.configure(&update).await.unwrap();
        assert_eq!(camera.read_settings()["gain"], json!(4.0));
    }

    #[tokio::test]
    async fn test_rejected_setting() {
        let faults = FaultInjector::new();
        let mut camera = SimulatedCamera::with_faults(faults.clone());
        faults.reject_setting("awb");

        let mut update = SettingsMap::new();
        update.insert("awb".to_string(), json!("daylight"));
        assert!(camera.configure(&update).await.is_err());

        faults.clear_rejected_settings();
        assert!(camera.configure(&update).await.is_ok());
    }

    #[tokio::test]
    async fn test_preview_frame_dimensions() {
        let mut camera = SimulatedCamera::new();
        let frame = camera.capture_frame().await.unwrap();
        assert_eq!((frame.width, frame.height), (PREVIEW_WIDTH, PREVIEW_HEIGHT));
        assert_eq!(frame.format, FrameFormat::Pgm);
    }

    #[tokio::test]
    async fn test_simulated_mount_tracking() {
        let mut mount = SimulatedMount::new();
        mount.initialize().await.unwrap();
        assert!(!mount.is_tracking());

        mount.start_tracking(Direction::West, 0.5).await.unwrap();
        assert_eq!(
            mount.tracking(),
            Some(TrackingState {
                direction: Direction::West,
                speed: 0.5
            })
        );

        assert!(mount.start_tracking(Direction::East, 0.0).await.is_err());
        mount.stop_tracking().await.unwrap();
        assert!(!mount.is_tracking());
    }
}
