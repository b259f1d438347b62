//! Session state machine and background capture task.
//!
//! The orchestrator owns the session's [`SessionState`] in a `watch` channel.
//! Only two parties write it: the background task, and `request_stop()` when it
//! flips `Running` to `Stopping`. Everyone else reads.
//!
//! # Capture loop
//!
//! ```text
//! loop {
//!     cancelled?                -> Idle
//!     count / time limit hit?   -> Completed
//!     capture_still             (never interrupted once started)
//!       failed -> backoff, retry once; failed again -> Failed
//!     sleep(capture_interval)   (cancellation wakes it immediately)
//! }
//! ```
//!
//! On the way out the task stops any tracking it started, writes the metadata
//! record, sets the final status and then publishes exactly one terminal event.

use super::metadata::SessionMetadata;
use super::{SessionConfig, SessionLimit, SessionState, SessionStatus};
use crate::broadcaster::{RigEvent, StatusBroadcaster};
use crate::device::{CameraHandle, CaptureRecord, MountHandle};
use crate::error::{RigError, RigResult};
use crate::storage::{sanitize_name, StorageLocator};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ActiveSession {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs at most one capture session at a time.
pub struct SessionOrchestrator {
    camera: CameraHandle,
    mount: MountHandle,
    storage: Arc<StorageLocator>,
    broadcaster: StatusBroadcaster,
    retry_backoff: Duration,
    state: Arc<watch::Sender<SessionState>>,
    /// Serialises start/stop and holds the running task.
    control: Mutex<Option<ActiveSession>>,
}

impl SessionOrchestrator {
    /// Orchestrator driving `camera` and `mount`.
    ///
    /// `retry_backoff` is the pause before the one retry of a failed capture.
    pub fn new(
        camera: CameraHandle,
        mount: MountHandle,
        storage: Arc<StorageLocator>,
        broadcaster: StatusBroadcaster,
        retry_backoff: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            camera,
            mount,
            storage,
            broadcaster,
            retry_backoff,
            state: Arc::new(state),
            control: Mutex::new(None),
        }
    }

    /// Current state, with `elapsed_time` brought up to date while a session runs.
    pub fn status(&self) -> SessionState {
        let mut state = self.state.borrow().clone();
        if state.status.is_active() {
            if let Some(started_at) = state.started_at {
                state.elapsed_time = (Utc::now() - started_at).to_std().unwrap_or_default();
            }
        }
        state
    }

    /// Watch state transitions. Elapsed time is only updated per capture here.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// A session is running or stopping.
    pub fn is_active(&self) -> bool {
        self.state.borrow().status.is_active()
    }

    /// Validate `config` and launch the background capture task.
    ///
    /// # Errors
    ///
    /// - `InvalidSessionConfig` before anything is touched
    /// - `SessionAlreadyRunning` while a session is `Running` or `Stopping`
    /// - `StorageUnavailable`, or a device error from applying camera settings
    ///   or starting tracking
    pub async fn start(&self, config: SessionConfig) -> RigResult<SessionState> {
        let limit = config.validate()?;

        let mut control = self.control.lock().await;
        if self.state.borrow().status.is_active() {
            warn!(session = %config.name, "Start rejected; a session is already running");
            return Err(RigError::SessionAlreadyRunning);
        }

        let started_at = Utc::now();
        let name = config.name.clone();
        let session_dir = self
            .storage
            .blocking(move |storage| storage.session_directory(&name, started_at))
            .await?;

        // Tracking that was already running before the session is left running
        let stop_tracking_on_exit = config.enable_tracking && !self.mount.is_tracking();
        if let Err(e) = self.prepare_devices(&config).await {
            abandon_directory(&session_dir).await;
            return Err(e);
        }

        let state = SessionState::running(&config.name, limit, started_at, session_dir.clone());
        self.state.send_replace(state.clone());
        info!(session = %config.name, dir = %session_dir.display(), ?limit, "Session started");
        self.broadcaster.emit(RigEvent::SessionStarted {
            session_name: config.name.clone(),
            total_images: limit.total_images(),
            total_time: limit.total_time(),
        });

        let cancel = CancellationToken::new();
        let run = SessionRun {
            metadata: SessionMetadata::begin(&config, limit, started_at),
            file_stem: sanitize_name(&config.name),
            name: config.name,
            limit,
            camera: self.camera.clone(),
            mount: self.mount.clone(),
            broadcaster: self.broadcaster.clone(),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
            retry_backoff: self.retry_backoff,
            capture_interval: config.capture_interval,
            session_dir,
            started: Instant::now(),
            stop_tracking_on_exit,
        };
        let task = spawn_guarded(run, Arc::clone(&self.state), self.broadcaster.clone());
        *control = Some(ActiveSession { cancel, task });

        Ok(state)
    }

    async fn prepare_devices(&self, config: &SessionConfig) -> RigResult<()> {
        if !config.use_current_camera_settings && !config.camera_settings.is_empty() {
            self.camera.configure(&config.camera_settings).await?;
            debug!(settings = ?config.camera_settings, "Applied session camera settings");
            let status = self.camera.status();
            self.broadcaster.emit(RigEvent::CameraStatusChanged {
                driver: status.driver,
                busy: status.busy,
                settings: status.settings,
            });
        }

        if config.enable_tracking {
            self.mount
                .start_tracking(config.tracking_direction, config.tracking_speed)
                .await?;
            self.broadcaster.emit(RigEvent::MountStatusChanged {
                driver: self.mount.driver_name().to_string(),
                tracking: self.mount.tracking(),
            });
        }
        Ok(())
    }

    /// Ask the running session to stop.
    ///
    /// The visible status becomes `Stopping` at once; the task reaches `Idle`
    /// after any in-flight capture finishes.
    pub async fn request_stop(&self) -> RigResult<SessionState> {
        let control = self.control.lock().await;
        let Some(active) = control.as_ref().filter(|_| self.is_active()) else {
            return Err(RigError::NoActiveSession);
        };

        active.cancel.cancel();
        self.state.send_if_modified(|s| {
            if s.status == SessionStatus::Running {
                s.status = SessionStatus::Stopping;
                true
            } else {
                false
            }
        });
        info!("Session stop requested");
        Ok(self.status())
    }

    /// Wait until no session is running and return the final state.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(|s| !s.status.is_active()).await.map(|s| s.clone());
        match result {
            Ok(state) => state,
            Err(_) => self.status(),
        }
    }

    /// Stop any running session and wait for its task to exit.
    pub async fn shutdown(&self) {
        let active = self.control.lock().await.take();
        let Some(active) = active else {
            return;
        };
        active.cancel.cancel();
        self.state.send_if_modified(|s| {
            if s.status == SessionStatus::Running {
                s.status = SessionStatus::Stopping;
                true
            } else {
                false
            }
        });
        if let Err(e) = active.task.await {
            error!(error = %e, "Session task ended abnormally");
        }
    }
}

/// Remove an unused, still empty session directory.
async fn abandon_directory(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir(dir).await {
        debug!(path = %dir.display(), error = %e, "Could not remove unused session directory");
    }
}

/// Spawn the session task; a panic inside it still ends the session as `Failed`.
fn spawn_guarded(
    run: SessionRun,
    state: Arc<watch::Sender<SessionState>>,
    broadcaster: StatusBroadcaster,
) -> JoinHandle<()> {
    let name = run.name.clone();
    tokio::spawn(async move {
        if AssertUnwindSafe(run.run()).catch_unwind().await.is_err() {
            let reason = "session task panicked".to_string();
            error!(session = %name, "{}", reason);
            state.send_modify(|s| {
                s.status = SessionStatus::Failed;
                s.last_error = Some(reason.clone());
            });
            broadcaster.emit(RigEvent::SessionFailed {
                session_name: name,
                reason,
            });
        }
    })
}

enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Everything the background task needs, moved into it at spawn.
struct SessionRun {
    name: String,
    file_stem: String,
    limit: SessionLimit,
    camera: CameraHandle,
    mount: MountHandle,
    broadcaster: StatusBroadcaster,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    retry_backoff: Duration,
    capture_interval: Duration,
    session_dir: PathBuf,
    started: Instant,
    stop_tracking_on_exit: bool,
    metadata: SessionMetadata,
}

impl SessionRun {
    async fn run(mut self) {
        let outcome = self.capture_loop().await;
        self.finish(outcome).await;
    }

    async fn capture_loop(&mut self) -> Outcome {
        let mut index: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            match self.limit {
                SessionLimit::Count(total) if index >= total => return Outcome::Completed,
                SessionLimit::Time(total) if self.started.elapsed() >= total => {
                    return Outcome::Completed
                }
                _ => {}
            }

            let path = self.session_dir.join(format!(
                "{}_{:04}.{}",
                self.file_stem,
                index,
                self.camera.file_extension()
            ));
            let record = match self.capture_with_retry(&path).await {
                Ok(record) => record.with_sequence_index(index),
                Err(outcome) => return outcome,
            };

            index += 1;
            let elapsed = self.started.elapsed();
            self.state.send_modify(|s| {
                s.captured_images = index;
                s.elapsed_time = elapsed;
            });
            self.broadcaster.emit(RigEvent::CaptureCompleted {
                file_path: record.file_path.clone(),
            });
            self.broadcaster.emit(RigEvent::SessionProgress {
                captured_images: index,
                total_images: self.limit.total_images(),
                elapsed_time: elapsed,
            });
            debug!(index, path = %record.file_path.display(), "Capture stored");
            self.metadata.captures.push(record);

            if matches!(self.limit, SessionLimit::Count(total) if index >= total) {
                continue;
            }
            if !self.pause(self.capture_interval).await {
                return Outcome::Cancelled;
            }
        }
    }

    /// One capture, retried once after the backoff.
    async fn capture_with_retry(&mut self, path: &Path) -> Result<CaptureRecord, Outcome> {
        let first = match self.attempt(path).await {
            Ok(record) => return Ok(record),
            Err(reason) => reason,
        };
        warn!(error = %first, backoff = ?self.retry_backoff, "Capture failed, retrying once");

        if !self.pause(self.retry_backoff).await {
            return Err(Outcome::Cancelled);
        }

        self.attempt(path).await.map_err(|second| {
            error!(error = %second, "Capture failed again");
            Outcome::Failed(second)
        })
    }

    async fn attempt(&mut self, path: &Path) -> Result<CaptureRecord, String> {
        self.broadcaster.emit(RigEvent::CaptureStarted {
            file_path: path.to_path_buf(),
        });
        match self.camera.capture_still(path).await {
            Ok(record) => Ok(record),
            Err(e) => {
                let reason = e.to_string();
                self.state.send_modify(|s| s.last_error = Some(reason.clone()));
                self.broadcaster.emit(RigEvent::CaptureFailed {
                    reason: reason.clone(),
                });
                Err(reason)
            }
        }
    }

    /// Sleep for `wait` (capped at the remaining time in time mode).
    /// Returns `false` if cancelled first.
    async fn pause(&self, wait: Duration) -> bool {
        let wait = match self.limit {
            SessionLimit::Time(total) => wait.min(total.saturating_sub(self.started.elapsed())),
            SessionLimit::Count(_) => wait,
        };
        if wait.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    async fn finish(mut self, outcome: Outcome) {
        let elapsed = self.started.elapsed();

        if self.stop_tracking_on_exit {
            match self.mount.stop_tracking().await {
                Ok(()) => {
                    self.broadcaster.emit(RigEvent::MountStatusChanged {
                        driver: self.mount.driver_name().to_string(),
                        tracking: self.mount.tracking(),
                    });
                }
                Err(e) => warn!(error = %e, "Failed to stop tracking at session end"),
            }
        }

        let mut last_error = self.state.borrow().last_error.clone();
        let status = match &outcome {
            Outcome::Completed => SessionStatus::Completed,
            Outcome::Failed(reason) => {
                last_error = Some(reason.clone());
                SessionStatus::Failed
            }
            Outcome::Cancelled => SessionStatus::Idle,
        };

        self.metadata.finish(status, elapsed, last_error.clone());
        self.metadata.cancelled = matches!(outcome, Outcome::Cancelled);
        match self.metadata.write_to(&self.session_dir).await {
            Ok(path) => debug!(path = %path.display(), "Session metadata written"),
            Err(e) => {
                error!(error = %e, "Failed to write session metadata");
                let write_error = format!("failed to write session metadata: {}", e);
                last_error = Some(match last_error {
                    Some(cause) => format!("{}; {}", cause, write_error),
                    None => write_error,
                });
            }
        }

        let captured_images = self.metadata.captures.len() as u32;
        self.state.send_modify(|s| {
            s.status = status;
            s.elapsed_time = elapsed;
            s.last_error = last_error;
        });

        let session_name = self.name.clone();
        let event = match outcome {
            Outcome::Completed => {
                info!(captured_images, ?elapsed, "Session completed");
                RigEvent::SessionCompleted {
                    session_name,
                    captured_images,
                }
            }
            Outcome::Failed(reason) => {
                error!(captured_images, reason = %reason, "Session failed");
                RigEvent::SessionFailed {
                    session_name,
                    reason,
                }
            }
            Outcome::Cancelled => {
                info!(captured_images, "Session stopped");
                RigEvent::SessionStopped {
                    session_name,
                    captured_images,
                }
            }
        };
        self.broadcaster.emit(event);
    }
}
