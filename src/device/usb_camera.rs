//! Generic USB video camera driver
//!
//! Captures through `fswebcam` from a V4L2 device node. Works with webcams and
//! most USB planetary cameras that expose a UVC interface.
//!
//! ## Settings
//!
//! | Key | Type | Range |
//! |---|---|---|
//! | `width` / `height` | integer | 32 - 7680 / 32 - 4320 |
//! | `skip_frames` | integer | 0 - 100 (frames discarded while exposure settles) |
//! | `brightness` / `contrast` | integer | 0 - 100 (percent) |
//! | `quality` | integer | 1 - 100 (JPEG) |

use super::command::{run_checked, run_tool};
use super::settings::{get_u64, validate_settings, SettingSpec};
use super::{Camera, CaptureRecord, FrameBuffer, FrameFormat, SettingsMap};
use crate::config::CameraDriverConfig;
use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const SPECS: &[SettingSpec] = &[
    SettingSpec::integer("width", 32, 7680),
    SettingSpec::integer("height", 32, 4320),
    SettingSpec::integer("skip_frames", 0, 100),
    SettingSpec::integer("brightness", 0, 100),
    SettingSpec::integer("contrast", 0, 100),
    SettingSpec::integer("quality", 1, 100),
];

const PREVIEW_WIDTH: u32 = 320;
const PREVIEW_HEIGHT: u32 = 240;

/// USB video class camera behind a V4L2 node.
pub struct UsbCamera {
    device: PathBuf,
    program: String,
    settings: SettingsMap,
    timeout: Duration,
    ready: bool,
}

impl UsbCamera {
    pub fn new(config: &CameraDriverConfig) -> Self {
        let mut settings = SettingsMap::new();
        settings.insert("width".to_string(), json!(1280));
        settings.insert("height".to_string(), json!(720));
        settings.insert("skip_frames".to_string(), json!(10));
        settings.insert("brightness".to_string(), json!(50));
        settings.insert("contrast".to_string(), json!(50));
        settings.insert("quality".to_string(), json!(95));
        Self {
            device: config.usb_device.clone(),
            program: config.usb_command.clone(),
            settings,
            timeout: config.command_timeout,
            ready: false,
        }
    }

    fn ensure_ready(&self) -> RigResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(RigError::operation("usb-camera", "camera not initialized"))
        }
    }

    fn capture_args(&self, width: u64, height: u64, output: &str) -> Vec<String> {
        let s = &self.settings;
        vec![
            "--quiet".to_string(),
            "--no-banner".to_string(),
            "--device".to_string(),
            self.device.display().to_string(),
            "--resolution".to_string(),
            format!("{}x{}", width, height),
            "--skip".to_string(),
            get_u64(s, "skip_frames", 10).to_string(),
            "--set".to_string(),
            format!("brightness={}%", get_u64(s, "brightness", 50)),
            "--set".to_string(),
            format!("contrast={}%", get_u64(s, "contrast", 50)),
            "--jpeg".to_string(),
            get_u64(s, "quality", 95).to_string(),
            output.to_string(),
        ]
    }
}

#[async_trait]
impl Camera for UsbCamera {
    fn driver_name(&self) -> &'static str {
        "usb-camera"
    }

    fn file_extension(&self) -> &'static str {
        "jpg"
    }

    async fn initialize(&mut self) -> RigResult<()> {
        if tokio::fs::metadata(&self.device).await.is_err() {
            return Err(RigError::unavailable(
                self.driver_name(),
                format!("no video device at {}", self.device.display()),
            ));
        }

        // Any exit status is fine; we only need the tool to exist
        run_tool(&self.program, &["--version".to_string()], self.timeout)
            .await
            .map_err(|e| RigError::unavailable(self.driver_name(), e.to_string()))?;

        info!(device = %self.device.display(), "USB camera detected");
        self.ready = true;
        Ok(())
    }

    async fn start(&mut self) -> RigResult<()> {
        self.ensure_ready()
    }

    async fn stop(&mut self) -> RigResult<()> {
        Ok(())
    }

    async fn capture_still(&mut self, path: &Path) -> RigResult<CaptureRecord> {
        self.ensure_ready()?;
        let width = get_u64(&self.settings, "width", 1280);
        let height = get_u64(&self.settings, "height", 720);
        let args = self.capture_args(width, height, &path.display().to_string());

        debug!(path = %path.display(), "Capturing USB still");
        run_checked(&self.program, &args, self.timeout).await?;

        if tokio::fs::metadata(path).await.is_err() {
            return Err(RigError::operation(
                "capture_still",
                format!("{} wrote no file (device busy?)", self.program),
            ));
        }
        Ok(CaptureRecord::new(path, self.settings.clone()))
    }

    async fn capture_frame(&mut self) -> RigResult<FrameBuffer> {
        self.ensure_ready()?;
        let args = self.capture_args(PREVIEW_WIDTH as u64, PREVIEW_HEIGHT as u64, "-");
        let data = run_checked(&self.program, &args, self.timeout).await?;
        if data.is_empty() {
            return Err(RigError::operation("capture_frame", "empty frame"));
        }
        Ok(FrameBuffer {
            width: PREVIEW_WIDTH,
            height: PREVIEW_HEIGHT,
            format: FrameFormat::Jpeg,
            data,
            timestamp: Utc::now(),
        })
    }

    async fn configure(&mut self, settings: &SettingsMap) -> RigResult<()> {
        validate_settings(self.driver_name(), SPECS, settings)?;
        for (key, value) in settings {
            self.settings.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn read_settings(&self) -> SettingsMap {
        self.settings.clone()
    }

    async fn cleanup(&mut self) {
        self.ready = false;
    }
}
