//! Persistent record of a finished session.
//!
//! One `session_metadata.json` is written into the session directory when a
//! session reaches a terminal state, whatever that state is. It carries the
//! configuration that drove the run, every [`CaptureRecord`] in capture order
//! and the outcome, so a folder of images can be understood on its own.

use super::{SessionConfig, SessionLimit, SessionMode, SessionStatus};
use crate::device::CaptureRecord;
use crate::error::RigResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the record inside the session directory.
pub const METADATA_FILE_NAME: &str = "session_metadata.json";

/// Contents of `session_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_name: String,
    pub mode: SessionMode,
    pub total_images: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub total_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub capture_interval: Duration,
    pub tracking_enabled: bool,
    /// Successful captures in order
    pub captures: Vec<CaptureRecord>,
    pub final_status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub elapsed_time: Duration,
    pub last_error: Option<String>,
    /// The session was stopped on request rather than reaching its limit
    #[serde(default)]
    pub cancelled: bool,
    /// Version of the rig software that ran the session.
    pub software_version: String,
}

impl SessionMetadata {
    /// Start a record for a session that has just been accepted.
    pub fn begin(config: &SessionConfig, limit: SessionLimit, started_at: DateTime<Utc>) -> Self {
        Self {
            session_name: config.name.clone(),
            mode: config.mode,
            total_images: limit.total_images(),
            total_time: limit.total_time(),
            capture_interval: config.capture_interval,
            tracking_enabled: config.enable_tracking,
            captures: Vec::new(),
            final_status: SessionStatus::Running,
            started_at,
            finished_at: started_at,
            elapsed_time: Duration::ZERO,
            last_error: None,
            cancelled: false,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Stamp the outcome.
    pub fn finish(&mut self, status: SessionStatus, elapsed: Duration, last_error: Option<String>) {
        self.final_status = status;
        self.finished_at = Utc::now();
        self.elapsed_time = elapsed;
        self.last_error = last_error;
    }

    /// Write the record into `session_dir`, replacing any previous one.
    ///
    /// The JSON goes to a temporary file first and is renamed into place, so
    /// readers never see a partial record.
    pub async fn write_to(&self, session_dir: &Path) -> RigResult<PathBuf> {
        let target = session_dir.join(METADATA_FILE_NAME);
        let partial = session_dir.join(format!(".{}.partial", METADATA_FILE_NAME));

        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&partial, json).await?;
        tokio::fs::rename(&partial, &target).await?;
        Ok(target)
    }

    pub async fn read_from(path: &Path) -> RigResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
