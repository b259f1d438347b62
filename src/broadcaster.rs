//! In-process status events.
//!
//! ```text
//! orchestrator / context --publish--> broadcast::channel (per topic) ---> UI bridge
//!                                                                   \--> event logger
//! ```
//!
//! Publishing never blocks and never fails. Each topic has its own bounded
//! `broadcast` channel, so a subscriber that falls behind loses the oldest
//! events of that topic only, and a topic with no subscribers drops events.

use crate::device::{SettingsMap, TrackingState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Events buffered per topic before slow subscribers start losing them.
pub const TOPIC_CAPACITY: usize = 256;

/// Event channel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Camera status and still captures
    Camera,
    /// Tracking changes
    Mount,
    /// Session lifecycle and progress
    Session,
}

impl Topic {
    /// Every topic, in subscription order.
    pub const ALL: [Topic; 3] = [Topic::Camera, Topic::Mount, Topic::Session];
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Camera => "camera",
            Topic::Mount => "mount",
            Topic::Session => "session",
        };
        f.write_str(name)
    }
}

/// Status event delivered to observers.
///
/// Serialises with an `event` tag, e.g.
/// `{"event":"capture_completed","file_path":"/media/usb/astro_captures/m42_0001.jpg"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RigEvent {
    /// Camera settings or busy flag changed.
    CameraStatusChanged {
        driver: String,
        busy: bool,
        settings: SettingsMap,
    },
    /// A still is being exposed into `file_path`.
    CaptureStarted {
        file_path: PathBuf,
    },
    /// The still at `file_path` is on disk.
    CaptureCompleted {
        file_path: PathBuf,
    },
    CaptureFailed {
        reason: String,
    },
    SessionStarted {
        session_name: String,
        total_images: Option<u32>,
        #[serde(default, with = "humantime_serde")]
        total_time: Option<Duration>,
    },
    /// Sent after every successful session capture.
    SessionProgress {
        captured_images: u32,
        total_images: Option<u32>,
        #[serde(with = "humantime_serde")]
        elapsed_time: Duration,
    },
    /// The session reached its limit.
    SessionCompleted {
        session_name: String,
        captured_images: u32,
    },
    /// A capture failed twice in a row, or the session task died.
    SessionFailed {
        session_name: String,
        reason: String,
    },
    /// The session was stopped on request.
    SessionStopped {
        session_name: String,
        captured_images: u32,
    },
    MountStatusChanged {
        driver: String,
        tracking: Option<TrackingState>,
    },
}

impl RigEvent {
    /// The topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            RigEvent::CameraStatusChanged { .. }
            | RigEvent::CaptureStarted { .. }
            | RigEvent::CaptureCompleted { .. }
            | RigEvent::CaptureFailed { .. } => Topic::Camera,
            RigEvent::MountStatusChanged { .. } => Topic::Mount,
            RigEvent::SessionStarted { .. }
            | RigEvent::SessionProgress { .. }
            | RigEvent::SessionCompleted { .. }
            | RigEvent::SessionFailed { .. }
            | RigEvent::SessionStopped { .. } => Topic::Session,
        }
    }

    /// True for the single event that closes a session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RigEvent::SessionCompleted { .. }
                | RigEvent::SessionFailed { .. }
                | RigEvent::SessionStopped { .. }
        )
    }
}

/// Topic-based fan-out of [`RigEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct StatusBroadcaster {
    camera: broadcast::Sender<RigEvent>,
    mount: broadcast::Sender<RigEvent>,
    session: broadcast::Sender<RigEvent>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(TOPIC_CAPACITY)
    }
}

impl StatusBroadcaster {
    /// Broadcaster buffering `capacity` events per topic (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (camera, _) = broadcast::channel(capacity);
        let (mount, _) = broadcast::channel(capacity);
        let (session, _) = broadcast::channel(capacity);
        Self {
            camera,
            mount,
            session,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<RigEvent> {
        match topic {
            Topic::Camera => &self.camera,
            Topic::Mount => &self.mount,
            Topic::Session => &self.session,
        }
    }

    /// Publish on an explicit topic. Returns how many subscribers received it.
    pub fn publish(&self, topic: Topic, event: RigEvent) -> usize {
        match self.sender(topic).send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!(%topic, "Event dropped; no subscribers");
                0
            }
        }
    }

    /// Publish on the event's own topic.
    pub fn emit(&self, event: RigEvent) -> usize {
        self.publish(event.topic(), event)
    }

    /// Receiver for events published after this call.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<RigEvent> {
        self.sender(topic).subscribe()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    /// Forward every topic into `tracing` until `cancel` fires.
    pub fn spawn_event_logger(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let mut camera = self.subscribe(Topic::Camera);
        let mut mount = self.subscribe(Topic::Mount);
        let mut session = self.subscribe(Topic::Session);

        tokio::spawn(async move {
            debug!("Event logger started");
            loop {
                let keep_going = tokio::select! {
                    _ = cancel.cancelled() => false,
                    received = camera.recv() => log_received(Topic::Camera, received),
                    received = mount.recv() => log_received(Topic::Mount, received),
                    received = session.recv() => log_received(Topic::Session, received),
                };
                if !keep_going {
                    break;
                }
            }
            debug!("Event logger stopped");
        })
    }
}

fn log_received(topic: Topic, received: Result<RigEvent, RecvError>) -> bool {
    match received {
        Ok(event) if event.is_terminal() => {
            info!(%topic, ?event, "Session ended");
            true
        }
        Ok(event) => {
            debug!(%topic, ?event, "Event");
            true
        }
        Err(RecvError::Lagged(skipped)) => {
            warn!(%topic, skipped, "Event logger fell behind");
            true
        }
        Err(RecvError::Closed) => false,
    }
}
