//! SBC camera-connector driver (libcamera stack)
//!
//! Drives the camera attached to the board's CSI connector through the
//! libcamera still-capture tool. Newer OS images ship `rpicam-still`, older ones
//! `libcamera-still`; both accept the same arguments, so the driver uses the
//! first one that lists a camera.
//!
//! ## Settings
//!
//! | Key | Type | Range | Tool argument |
//! |---|---|---|---|
//! | `exposure_us` | integer | 1 - 600 000 000 | `--shutter` |
//! | `gain` | float | 1.0 - 16.0 | `--gain` |
//! | `awb` | string | auto, daylight, cloudy, tungsten, fluorescent, indoor | `--awb` |
//! | `width` / `height` | integer | 64 - 9152 / 64 - 6944 | `--width` / `--height` |
//! | `quality` | integer | 1 - 100 | `--quality` |
//! | `denoise` | string | auto, off, cdn_off, cdn_fast, cdn_hq | `--denoise` |

use super::command::{output_text, run_checked, run_tool};
use super::settings::{get_str, get_u64, validate_settings, SettingSpec};
use super::{Camera, CaptureRecord, FrameBuffer, FrameFormat, SettingsMap};
use crate::config::CameraDriverConfig;
use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const SPECS: &[SettingSpec] = &[
    SettingSpec::integer("exposure_us", 1, 600_000_000),
    SettingSpec::float("gain", 1.0, 16.0),
    SettingSpec::choice(
        "awb",
        &["auto", "daylight", "cloudy", "tungsten", "fluorescent", "indoor"],
    ),
    SettingSpec::integer("width", 64, 9152),
    SettingSpec::integer("height", 64, 6944),
    SettingSpec::integer("quality", 1, 100),
    SettingSpec::choice("denoise", &["auto", "off", "cdn_off", "cdn_fast", "cdn_hq"]),
];

const PREVIEW_WIDTH: u32 = 640;
const PREVIEW_HEIGHT: u32 = 480;
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Camera on the SBC's dedicated camera connector.
pub struct PiCamera {
    candidates: Vec<String>,
    program: Option<String>,
    settings: SettingsMap,
    timeout_margin: Duration,
    started: bool,
}

impl PiCamera {
    /// Unprobed driver; [`initialize`](Camera::initialize) checks for a sensor.
    pub fn new(config: &CameraDriverConfig) -> Self {
        let mut settings = SettingsMap::new();
        settings.insert("exposure_us".to_string(), json!(1_000_000));
        settings.insert("gain".to_string(), json!(1.0));
        settings.insert("awb".to_string(), json!("auto"));
        settings.insert("width".to_string(), json!(4056));
        settings.insert("height".to_string(), json!(3040));
        settings.insert("quality".to_string(), json!(93));
        settings.insert("denoise".to_string(), json!("auto"));
        Self {
            candidates: config.still_commands.clone(),
            program: None,
            settings,
            timeout_margin: config.command_timeout,
            started: false,
        }
    }

    fn program(&self) -> RigResult<&str> {
        self.program
            .as_deref()
            .ok_or_else(|| RigError::operation("pi-camera", "camera not initialized"))
    }

    /// Exposure plus the configured margin. The tool may run the sensor for up
    /// to two frames when the shutter is long.
    fn capture_timeout(&self) -> Duration {
        let exposure = Duration::from_micros(get_u64(&self.settings, "exposure_us", 1_000_000));
        exposure * 2 + self.timeout_margin
    }

    fn exposure_args(&self) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "--nopreview".to_string(),
            "--immediate".to_string(),
            "--shutter".to_string(),
            get_u64(s, "exposure_us", 1_000_000).to_string(),
            "--awb".to_string(),
            get_str(s, "awb", "auto").to_string(),
            "--denoise".to_string(),
            get_str(s, "denoise", "auto").to_string(),
        ];
        if let Some(gain) = s.get("gain").and_then(|v| v.as_f64()) {
            args.push("--gain".to_string());
            args.push(format!("{:.2}", gain));
        }
        args
    }
}

/// Does `--list-cameras` output report at least one sensor?
fn lists_camera(text: &str) -> bool {
    !text.contains("No cameras available") && text.contains("Available cameras")
}

#[async_trait]
impl Camera for PiCamera {
    fn driver_name(&self) -> &'static str {
        "pi-camera"
    }

    fn file_extension(&self) -> &'static str {
        "jpg"
    }

    async fn initialize(&mut self) -> RigResult<()> {
        let mut reasons = Vec::new();
        for program in &self.candidates {
            let args = vec!["--list-cameras".to_string()];
            match run_tool(program, &args, PROBE_TIMEOUT).await {
                Ok(output) if lists_camera(&output_text(&output)) => {
                    info!(program = %program, "SBC camera detected");
                    self.program = Some(program.clone());
                    return Ok(());
                }
                Ok(_) => reasons.push(format!("{}: no cameras available", program)),
                Err(e) => reasons.push(e.to_string()),
            }
        }
        Err(RigError::unavailable(self.driver_name(), reasons.join("; ")))
    }

    async fn start(&mut self) -> RigResult<()> {
        self.program()?;
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> RigResult<()> {
        self.started = false;
        Ok(())
    }

    async fn capture_still(&mut self, path: &Path) -> RigResult<CaptureRecord> {
        let program = self.program()?.to_string();
        let s = &self.settings;
        let mut args = self.exposure_args();
        args.extend([
            "--width".to_string(),
            get_u64(s, "width", 4056).to_string(),
            "--height".to_string(),
            get_u64(s, "height", 3040).to_string(),
            "--quality".to_string(),
            get_u64(s, "quality", 93).to_string(),
            "--output".to_string(),
            path.display().to_string(),
        ]);

        debug!(path = %path.display(), "Capturing still");
        run_checked(&program, &args, self.capture_timeout()).await?;

        if tokio::fs::metadata(path).await.is_err() {
            return Err(RigError::operation(
                "capture_still",
                format!("{} reported success but wrote no file", program),
            ));
        }
        Ok(CaptureRecord::new(path, self.settings.clone()))
    }

    async fn capture_frame(&mut self) -> RigResult<FrameBuffer> {
        let program = self.program()?.to_string();
        let mut args = self.exposure_args();
        args.extend([
            "--width".to_string(),
            PREVIEW_WIDTH.to_string(),
            "--height".to_string(),
            PREVIEW_HEIGHT.to_string(),
            "--encoding".to_string(),
            "jpg".to_string(),
            "--output".to_string(),
            "-".to_string(),
        ]);

        let data = run_checked(&program, &args, self.capture_timeout()).await?;
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
        if self.started {
            if let Err(e) = self.stop().await {
                warn!(error = %e, "Failed to stop SBC camera");
            }
        }
        self.program = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(commands: &[&str]) -> CameraDriverConfig {
        CameraDriverConfig {
            still_commands: commands.iter().map(|c| c.to_string()).collect(),
            ..CameraDriverConfig::default()
        }
    }

    #[test]
    fn test_list_cameras_parsing() {
        assert!(lists_camera(
            "Available cameras\n-----------------\n0 : imx477 [4056x3040 12-bit RGGB]"
        ));
        assert!(!lists_camera("No cameras available!"));
        assert!(!lists_camera(""));
    }

    #[tokio::test]
    async fn test_initialize_without_tools_is_unavailable() {
        let mut camera = PiCamera::new(&config_with(&[
            "/nonexistent/rpicam-still",
            "/nonexistent/libcamera-still",
        ]));
        let err = camera.initialize().await.unwrap_err();
        assert!(matches!(err, RigError::DeviceUnavailable { .. }));
        assert!(err.to_string().contains("libcamera-still"));
    }

    #[tokio::test]
    async fn test_capture_before_initialize_fails() {
        let mut camera = PiCamera::new(&config_with(&["/nonexistent/rpicam-still"]));
        let err = camera
            .capture_still(Path::new("/tmp/never.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::DeviceOperationFailed { .. }));
    }

    #[test]
    fn test_capture_timeout_scales_with_exposure() {
        let mut camera = PiCamera::new(&CameraDriverConfig::default());
        camera
            .settings
            .insert("exposure_us".to_string(), json!(30_000_000));
        assert_eq!(camera.capture_timeout(), Duration::from_secs(70));
    }

    #[test]
    fn test_exposure_args() {
        let camera = PiCamera::new(&CameraDriverConfig::default());
        let args = camera.exposure_args();
        let shutter = args.iter().position(|a| a == "--shutter").unwrap();
        assert_eq!(args[shutter + 1], "1000000");
        assert!(args.contains(&"--gain".to_string()));
    }
}
