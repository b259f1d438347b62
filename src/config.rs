//! Rig configuration using Figment
//!
//! Configuration is layered, lowest to highest precedence:
//! 1. Built-in defaults ([`RigConfig::default`])
//! 2. A TOML file (`config/rig.toml` unless another path is given)
//! 3. Environment variables prefixed with `ASTRO_RIG_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated with a double underscore:
//!
//! ```text
//! ASTRO_RIG_LOGGING__LEVEL=debug
//! ASTRO_RIG_DEVICES__FORCE_SIMULATION=true
//! ASTRO_RIG_SESSION__RETRY_BACKOFF=2s
//! ```
//!
//! Durations use humantime notation (`"500ms"`, `"30s"`, `"1h 30m"`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rig.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "ASTRO_RIG_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be read or extracted
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level rig configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Driver selection and driver-specific settings
    #[serde(default)]
    pub devices: DeviceConfig,
    /// Capture directory selection
    #[serde(default)]
    pub storage: StorageConfig,
    /// Session orchestration settings
    #[serde(default)]
    pub session: SessionSettings,
    /// Live preview loop settings
    #[serde(default)]
    pub preview: PreviewConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Device probing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Skip hardware probing and use the simulated drivers
    #[serde(default)]
    pub force_simulation: bool,
    /// Camera driver settings
    #[serde(default)]
    pub camera: CameraDriverConfig,
    /// Mount driver settings
    #[serde(default)]
    pub mount: MountDriverConfig,
}

/// Settings for the command-line driven camera drivers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDriverConfig {
    /// Still-capture tools for the SBC camera, tried in order
    pub still_commands: Vec<String>,
    /// V4L2 device node used by the USB driver
    pub usb_device: PathBuf,
    /// Capture tool for the USB driver
    pub usb_command: String,
    /// Time allowed for a tool invocation on top of the exposure time
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for CameraDriverConfig {
    fn default() -> Self {
        Self {
            still_commands: vec!["rpicam-still".to_string(), "libcamera-still".to_string()],
            usb_device: PathBuf::from("/dev/video0"),
            usb_command: "fswebcam".to_string(),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings for the serial motor controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountDriverConfig {
    /// Serial port (e.g., "/dev/ttyACM0")
    pub serial_port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Reply timeout per command
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MountDriverConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Capture directory candidates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directories whose subdirectories are treated as mounted external volumes
    pub external_roots: Vec<PathBuf>,
    /// Name of the capture directory created inside each candidate location
    pub capture_subdir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            external_roots: vec![PathBuf::from("/media"), PathBuf::from("/mnt")],
            capture_subdir: "astro_captures".to_string(),
        }
    }
}

/// Session orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Pause before retrying a failed capture
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Where the saved session configuration lives (defaults to the user config dir)
    #[serde(default)]
    pub config_file: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(500),
            config_file: None,
        }
    }
}

impl SessionSettings {
    /// Resolved path of the saved session configuration file.
    pub fn config_file_path(&self) -> PathBuf {
        self.config_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("astro_rig")
                .join("session.json")
        })
    }
}

/// Live preview configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Time between preview frames
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Start the preview loop together with the rig
    #[serde(default)]
    pub start_on_launch: bool,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            start_on_launch: false,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl RigConfig {
    /// Load configuration from `config/rig.toml` and environment variables.
    ///
    /// A missing file is not an error; defaults and environment overrides apply.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path.as_ref()).extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// The layered provider stack, exposed so callers can add their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - At least one SBC still-capture command is configured
    /// - Capture subdirectory is a single, non-empty path component
    /// - Preview interval is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.devices.camera.still_commands.is_empty() {
            return Err(ConfigError::ValidationError(
                "devices.camera.still_commands cannot be empty".to_string(),
            ));
        }

        let subdir = self.storage.capture_subdir.trim();
        if subdir.is_empty() || subdir.contains(['/', '\\']) || subdir == ".." {
            return Err(ConfigError::ValidationError(format!(
                "Invalid storage.capture_subdir '{}'. Must be a single directory name",
                self.storage.capture_subdir
            )));
        }

        if self.preview.interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "preview.interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
