//! The rig as seen by a front end.
//!
//! [`RigContext`] owns both device handles, their state guards, the session
//! orchestrator, the preview loop and the storage locator. Transport layers
//! (HTTP handlers, a websocket bridge, the CLI) hold a `RigContext` and call
//! its methods; nothing in the crate is reachable through global state.
//!
//! Construction acquires the devices, snapshots their settings and registers
//! everything that must be undone with the context's [`ShutdownSequence`]:
//!
//! ```text
//! registration order              shutdown runs in reverse
//! 1. restore camera settings      4. stop preview
//! 2. restore mount tracking       3. stop session (waits for in-flight capture)
//! 3. stop session                 2. restore mount tracking
//! 4. stop preview                 1. restore camera settings
//! ```

use crate::broadcaster::{RigEvent, StatusBroadcaster, Topic};
use crate::config::RigConfig;
use crate::device::{
    CameraHandle, CameraStatus, CaptureRecord, DeviceFactory, Direction, FrameBuffer,
    MountHandle, MountStatus, SettingsMap,
};
use crate::error::RigResult;
use crate::preview::PreviewLoop;
use crate::session::{SessionConfig, SessionConfigStore, SessionOrchestrator, SessionState};
use crate::shutdown::ShutdownSequence;
use crate::state_guard::StateGuard;
use crate::storage::{CaptureFile, CaptureFolder, StorageLocator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// One rig: devices, guards, session orchestrator, preview and storage.
///
/// Front ends call its methods; dropping it does not restore devices, call
/// [`shutdown`](Self::shutdown) for that.
pub struct RigContext {
    config: RigConfig,
    camera: CameraHandle,
    mount: MountHandle,
    camera_guard: Arc<StateGuard<CameraHandle>>,
    mount_guard: Arc<StateGuard<MountHandle>>,
    storage: Arc<StorageLocator>,
    broadcaster: StatusBroadcaster,
    orchestrator: Arc<SessionOrchestrator>,
    preview: Arc<PreviewLoop>,
    session_store: SessionConfigStore,
    shutdown: ShutdownSequence,
}

impl RigContext {
    /// Probe hardware and storage as described by `config`.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` when no capture directory is writable. Device
    /// probing cannot fail; missing hardware falls back to simulation.
    pub async fn initialize(config: RigConfig) -> RigResult<Self> {
        let factory = DeviceFactory::from_config(&config.devices);
        let storage = StorageLocator::from_config(&config.storage);
        Self::from_parts(config, factory, storage).await
    }

    /// Build a context from an explicit factory and storage locator.
    pub async fn from_parts(
        config: RigConfig,
        factory: DeviceFactory,
        storage: StorageLocator,
    ) -> RigResult<Self> {
        let storage = Arc::new(storage);
        let capture_dir = storage
            .blocking(|storage| storage.get_capture_directory())
            .await?;

        let camera = factory.create_camera().await;
        let mount = factory.create_mount().await;
        let shutdown = ShutdownSequence::new();

        let camera_guard = Arc::new(StateGuard::new(camera.clone()));
        camera_guard.save_original_state().await;
        camera_guard.register_release(&shutdown);

        let mount_guard = Arc::new(StateGuard::new(mount.clone()));
        mount_guard.save_original_state().await;
        mount_guard.register_release(&shutdown);

        let broadcaster = StatusBroadcaster::default();
        let orchestrator = Arc::new(SessionOrchestrator::new(
            camera.clone(),
            mount.clone(),
            Arc::clone(&storage),
            broadcaster.clone(),
            config.session.retry_backoff,
        ));
        let stopping = Arc::clone(&orchestrator);
        shutdown.register("stop session", move || async move {
            stopping.shutdown().await;
        });

        let preview = Arc::new(PreviewLoop::new(camera.clone(), orchestrator.subscribe()));
        let stopping = Arc::clone(&preview);
        shutdown.register("stop preview", move || async move {
            stopping.stop().await;
        });

        let session_store = SessionConfigStore::new(config.session.config_file_path());

        info!(
            camera = camera.driver_name(),
            mount = mount.driver_name(),
            capture_dir = %capture_dir.display(),
            "Rig ready"
        );

        Ok(Self {
            config,
            camera,
            mount,
            camera_guard,
            mount_guard,
            storage,
            broadcaster,
            orchestrator,
            preview,
            session_store,
            shutdown,
        })
    }

    /// Configuration the rig was built from.
    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraHandle {
        &self.camera
    }

    pub fn mount(&self) -> &MountHandle {
        &self.mount
    }

    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.broadcaster
    }

    /// Callbacks run by [`shutdown`](Self::shutdown).
    pub fn shutdown_sequence(&self) -> &ShutdownSequence {
        &self.shutdown
    }

    /// Camera settings as found at startup.
    pub fn camera_original_state(&self) -> Option<&SettingsMap> {
        self.camera_guard.original_state()
    }

    /// Mount tracking as found at startup.
    pub fn mount_original_state(&self) -> Option<&SettingsMap> {
        self.mount_guard.original_state()
    }

    /// The capture directory chosen at construction. Cached; no filesystem access.
    pub fn capture_directory(&self) -> RigResult<PathBuf> {
        self.storage.get_capture_directory()
    }

    // ---- camera ----------------------------------------------------------

    /// Never waits for the camera lock.
    pub fn get_camera_status(&self) -> CameraStatus {
        self.camera.status()
    }

    /// Apply a partial settings map. A rejected map changes nothing.
    ///
    /// `CameraStatusChanged` is published either way.
    pub async fn update_camera_settings(&self, settings: &SettingsMap) -> RigResult<CameraStatus> {
        let result = self.camera.configure(settings).await;
        self.publish_camera_status();
        result?;
        Ok(self.camera.status())
    }

    /// Take one still into the capture directory root.
    pub async fn trigger_still_capture(&self) -> RigResult<CaptureRecord> {
        let path = self.storage.still_path(self.camera.file_extension())?;
        self.broadcaster.emit(RigEvent::CaptureStarted {
            file_path: path.clone(),
        });

        match self.camera.capture_still(&path).await {
            Ok(record) => {
                info!(path = %record.file_path.display(), "Still captured");
                self.broadcaster.emit(RigEvent::CaptureCompleted {
                    file_path: record.file_path.clone(),
                });
                Ok(record)
            }
            Err(e) => {
                warn!(error = %e, "Still capture failed");
                self.broadcaster.emit(RigEvent::CaptureFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn publish_camera_status(&self) {
        let status = self.camera.status();
        self.broadcaster.emit(RigEvent::CameraStatusChanged {
            driver: status.driver,
            busy: status.busy,
            settings: status.settings,
        });
    }

    // ---- mount -----------------------------------------------------------

    pub fn get_mount_status(&self) -> MountStatus {
        self.mount.status()
    }

    /// Start sidereal tracking; `speed` is a multiple of the sidereal rate.
    pub async fn start_tracking(&self, direction: Direction, speed: f64) -> RigResult<MountStatus> {
        let result = self.mount.start_tracking(direction, speed).await;
        self.publish_mount_status();
        result?;
        Ok(self.mount.status())
    }

    pub async fn stop_tracking(&self) -> RigResult<MountStatus> {
        let result = self.mount.stop_tracking().await;
        self.publish_mount_status();
        result?;
        Ok(self.mount.status())
    }

    fn publish_mount_status(&self) {
        self.broadcaster.emit(RigEvent::MountStatusChanged {
            driver: self.mount.driver_name().to_string(),
            tracking: self.mount.tracking(),
        });
    }

    // ---- sessions --------------------------------------------------------

    /// Current or most recent session; elapsed time is live while running.
    pub fn get_session_status(&self) -> SessionState {
        self.orchestrator.status()
    }

    /// See [`SessionOrchestrator::start`].
    pub async fn start_session(&self, config: SessionConfig) -> RigResult<SessionState> {
        self.orchestrator.start(config).await
    }

    /// Ask the running session to stop after its in-flight capture.
    pub async fn stop_session(&self) -> RigResult<SessionState> {
        self.orchestrator.request_stop().await
    }

    /// Resolves once no session is running.
    pub async fn wait_for_session(&self) -> SessionState {
        self.orchestrator.wait().await
    }

    /// Last saved session configuration, or the default.
    pub async fn get_session_config(&self) -> RigResult<SessionConfig> {
        self.session_store.load().await
    }

    pub async fn save_session_config(&self, config: &SessionConfig) -> RigResult<()> {
        self.session_store.save(config).await
    }

    // ---- captures --------------------------------------------------------

    /// Images in a session folder, or in the capture directory root for `None`.
    pub async fn list_captures(&self, folder: Option<&str>) -> RigResult<Vec<CaptureFile>> {
        let folder = folder.map(str::to_owned);
        self.storage
            .blocking(move |storage| storage.list_captures(folder.as_deref()))
            .await
    }

    /// Session folders, newest first.
    pub async fn list_capture_folders(&self) -> RigResult<Vec<CaptureFolder>> {
        self.storage
            .blocking(|storage| storage.list_capture_folders())
            .await
    }

    // ---- preview ---------------------------------------------------------

    /// Start the preview loop; `None` uses `preview.interval` from the config.
    pub fn start_preview(&self, interval: Option<Duration>) -> RigResult<()> {
        self.preview
            .start(interval.unwrap_or(self.config.preview.interval))
    }

    /// Returns `false` if preview was not running.
    pub async fn stop_preview(&self) -> bool {
        self.preview.stop().await
    }

    pub fn latest_frame(&self) -> Option<FrameBuffer> {
        self.preview.latest_frame()
    }

    // ---- events & lifecycle ----------------------------------------------

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<RigEvent> {
        self.broadcaster.subscribe(topic)
    }

    /// Stop background work and restore both devices. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.shutdown.run().await;
    }
}
