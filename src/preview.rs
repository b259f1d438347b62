//! Live-preview frame loop.
//!
//! Grabs a low-resolution frame from the camera every `interval` and keeps the
//! newest one in a `watch` channel. The loop never waits for the camera lock:
//! if a still or a configure is in progress, or a session is running, the tick
//! is skipped so preview can never delay a capture.

use crate::device::{CameraHandle, FrameBuffer};
use crate::error::{RigError, RigResult};
use crate::session::SessionState;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the preview task and the newest frame.
pub struct PreviewLoop {
    camera: CameraHandle,
    session: watch::Receiver<SessionState>,
    frames: watch::Sender<Option<FrameBuffer>>,
    running: Mutex<Option<Running>>,
}

impl PreviewLoop {
    /// Idle loop; `session` tells it when to stay out of the way.
    pub fn new(camera: CameraHandle, session: watch::Receiver<SessionState>) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            camera,
            session,
            frames,
            running: Mutex::new(None),
        }
    }

    /// Start grabbing frames. A loop that is already running is replaced.
    pub fn start(&self, interval: Duration) -> RigResult<()> {
        if interval.is_zero() {
            return Err(RigError::InvalidParameter(
                "preview interval must be greater than zero".to_string(),
            ));
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(preview_task(
            self.camera.clone(),
            self.session.clone(),
            self.frames.clone(),
            interval,
            cancel.clone(),
        ));

        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Running { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
            debug!("Replaced running preview loop");
        }
        info!(?interval, "Preview started");
        Ok(())
    }

    /// Stop the loop and wait for it to exit. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return false;
        };
        running.cancel.cancel();
        if let Err(e) = running.task.await {
            warn!(error = %e, "Preview task ended abnormally");
        }
        info!("Preview stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }

    /// Newest frame, if any arrived since startup.
    pub fn latest_frame(&self) -> Option<FrameBuffer> {
        self.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<FrameBuffer>> {
        self.frames.subscribe()
    }
}

async fn preview_task(
    camera: CameraHandle,
    session: watch::Receiver<SessionState>,
    frames: watch::Sender<Option<FrameBuffer>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if session.borrow().status.is_active() {
            trace!("Session running; preview frame skipped");
            continue;
        }

        match camera.try_capture_frame().await {
            None => trace!("Camera busy; preview frame skipped"),
            Some(Ok(frame)) => {
                frames.send_replace(Some(frame));
            }
            Some(Err(e)) => warn!(error = %e, "Preview frame failed"),
        }
    }
}
