//! Capture sessions: configuration, observable state and the orchestrator.
//!
//! A session is one bounded (`count`) or time-boxed (`time`) run of automated
//! stills. [`SessionConfig`] is validated into a [`SessionLimit`] before
//! anything changes; the [`SessionOrchestrator`] then owns the
//! [`SessionState`] for the life of the run.
//!
//! ```text
//! Idle ──start──> Running ──limit reached──> Completed
//!                    │    ──retry failed───> Failed
//!                    └─request_stop──> Stopping ──> Idle
//! ```
//!
//! `Completed` and `Failed` describe the previous run; both accept a new `start`.

use crate::device::{Direction, SettingsMap};
use crate::error::{RigError, RigResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub mod metadata;
pub mod orchestrator;
pub mod store;

pub use metadata::SessionMetadata;
pub use orchestrator::SessionOrchestrator;
pub use store::SessionConfigStore;

/// How a session decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Stop after `total_images` stills
    #[default]
    Count,
    /// Stop once `total_time` has elapsed
    Time,
}

/// User-supplied description of a session.
///
/// Fields missing from a serialized config take their [`Default`] values,
/// except the two limits: an absent `total_images` or `total_time` is `None`,
/// so a time-mode payload does not inherit the default image count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Used for the session directory and the capture file names
    pub name: String,
    /// Which of the two limits ends the session
    pub mode: SessionMode,
    /// Stills to take in count mode
    #[serde(default)]
    pub total_images: Option<u32>,
    /// Session length in time mode
    #[serde(default, with = "humantime_serde")]
    pub total_time: Option<Duration>,
    /// Pause between the end of one capture and the start of the next
    #[serde(with = "humantime_serde")]
    pub capture_interval: Duration,
    /// Run sidereal tracking for the length of the session
    pub enable_tracking: bool,
    /// Leave the camera as it is instead of applying `camera_settings`
    pub use_current_camera_settings: bool,
    pub camera_settings: SettingsMap,
    pub tracking_direction: Direction,
    /// Multiple of the sidereal rate
    pub tracking_speed: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            mode: SessionMode::Count,
            total_images: Some(10),
            total_time: None,
            capture_interval: Duration::from_secs(5),
            enable_tracking: false,
            use_current_camera_settings: true,
            camera_settings: SettingsMap::new(),
            tracking_direction: Direction::East,
            tracking_speed: 1.0,
        }
    }
}

/// The validated stopping rule of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLimit {
    /// Stop after this many successful captures
    Count(u32),
    /// Stop once this much time has elapsed
    Time(Duration),
}

impl SessionLimit {
    /// Image count for count-bound sessions.
    pub fn total_images(&self) -> Option<u32> {
        match self {
            SessionLimit::Count(n) => Some(*n),
            SessionLimit::Time(_) => None,
        }
    }

    /// Duration for time-bound sessions.
    pub fn total_time(&self) -> Option<Duration> {
        match self {
            SessionLimit::Count(_) => None,
            SessionLimit::Time(t) => Some(*t),
        }
    }
}

impl SessionConfig {
    /// Count-bound session of `total_images` stills, no pause between them.
    pub fn count(name: impl Into<String>, total_images: u32) -> Self {
        Self {
            name: name.into(),
            mode: SessionMode::Count,
            total_images: Some(total_images),
            total_time: None,
            capture_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Time-bound session lasting `total_time`, no pause between stills.
    pub fn timed(name: impl Into<String>, total_time: Duration) -> Self {
        Self {
            name: name.into(),
            mode: SessionMode::Time,
            total_images: None,
            total_time: Some(total_time),
            capture_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Pause `interval` between captures.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.capture_interval = interval;
        self
    }

    /// Track in `direction` at `speed` times sidereal while the session runs.
    pub fn with_tracking(mut self, direction: Direction, speed: f64) -> Self {
        self.enable_tracking = true;
        self.tracking_direction = direction;
        self.tracking_speed = speed;
        self
    }

    /// Apply `settings` to the camera when the session starts.
    pub fn with_camera_settings(mut self, settings: SettingsMap) -> Self {
        self.use_current_camera_settings = false;
        self.camera_settings = settings;
        self
    }

    /// Check the configuration and return its stopping rule.
    ///
    /// Out-of-range values are rejected, never clamped. Setting both
    /// `total_images` and `total_time` is rejected regardless of `mode`.
    pub fn validate(&self) -> RigResult<SessionLimit> {
        let invalid = |msg: String| Err(RigError::InvalidSessionConfig(msg));

        if self.name.trim().is_empty() {
            return invalid("name cannot be empty".to_string());
        }

        let limit = match (self.mode, self.total_images, self.total_time) {
            (_, Some(_), Some(_)) => {
                return invalid(
                    "total_images and total_time are mutually exclusive".to_string(),
                )
            }
            (SessionMode::Count, Some(0), None) => {
                return invalid("total_images must be at least 1".to_string())
            }
            (SessionMode::Count, Some(n), None) => SessionLimit::Count(n),
            (SessionMode::Count, None, _) => {
                return invalid("count mode requires total_images".to_string())
            }
            (SessionMode::Time, None, Some(t)) if t.is_zero() => {
                return invalid("total_time must be greater than zero".to_string())
            }
            (SessionMode::Time, None, Some(t)) => SessionLimit::Time(t),
            (SessionMode::Time, _, None) => {
                return invalid("time mode requires total_time".to_string())
            }
        };

        if self.enable_tracking
            && (!self.tracking_speed.is_finite() || self.tracking_speed <= 0.0)
        {
            return invalid(format!(
                "tracking_speed must be positive, got {}",
                self.tracking_speed
            ));
        }

        Ok(limit)
    }
}

/// Externally visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session, or the last one was stopped on request
    #[default]
    Idle,
    Running,
    /// Stop requested; the in-flight capture is finishing
    Stopping,
    /// The limit was reached
    Completed,
    /// Stopped by an error; see `last_error`
    Failed,
}

impl SessionStatus {
    /// A session task exists for this status.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Stopping)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observable state of the current (or most recent) session.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    pub session_name: Option<String>,
    /// Successful captures so far; never decreases during a run
    pub captured_images: u32,
    pub total_images: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub total_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub elapsed_time: Duration,
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent capture or persistence failure
    pub last_error: Option<String>,
    /// Where this session writes images and metadata
    pub session_dir: Option<PathBuf>,
}

impl SessionState {
    /// Fresh `Running` state for a session that starts now.
    pub(crate) fn running(
        name: &str,
        limit: SessionLimit,
        started_at: DateTime<Utc>,
        session_dir: PathBuf,
    ) -> Self {
        Self {
            status: SessionStatus::Running,
            session_name: Some(name.to_string()),
            captured_images: 0,
            total_images: limit.total_images(),
            total_time: limit.total_time(),
            elapsed_time: Duration::ZERO,
            started_at: Some(started_at),
            last_error: None,
            session_dir: Some(session_dir),
        }
    }
}
