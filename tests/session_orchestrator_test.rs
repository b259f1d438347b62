//! Session lifecycle against the simulated camera.

mod common;

use astro_rig::broadcaster::{RigEvent, Topic};
use astro_rig::device::simulated::FaultInjector;
use astro_rig::error::RigError;
use astro_rig::session::metadata::METADATA_FILE_NAME;
use astro_rig::session::{SessionConfig, SessionMetadata, SessionStatus};
use std::time::Duration;
use tokio::sync::broadcast;

/// Drain a session subscription up to and including the terminal event.
async fn collect_until_terminal(rx: &mut broadcast::Receiver<RigEvent>) -> Vec<RigEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("terminal event within timeout")
            .expect("session topic open");
        let done = event.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

#[tokio::test]
async fn test_three_image_session_completes_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;
    let mut session_events = rig.subscribe(Topic::Session);

    rig.start_session(SessionConfig::count("pleiades", 3)).await.unwrap();
    let events = collect_until_terminal(&mut session_events).await;
    let state = rig.wait_for_session().await;

    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.captured_images, 3);

    let progress: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            RigEvent::SessionProgress {
                captured_images, ..
            } => Some(*captured_images),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![1, 2, 3]);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(matches!(
        events.last(),
        Some(RigEvent::SessionCompleted {
            captured_images: 3,
            ..
        })
    ));

    let metadata_path = state.session_dir.unwrap().join(METADATA_FILE_NAME);
    let metadata = SessionMetadata::read_from(&metadata_path).await.unwrap();
    assert_eq!(metadata.final_status, SessionStatus::Completed);
    let indices: Vec<u32> = metadata.captures.iter().map(|c| c.sequence_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    for record in &metadata.captures {
        assert!(record.file_path.exists());
    }
}

#[tokio::test]
async fn test_count_session_of_n_records_n_captures() {
    for n in [1u32, 4, 7] {
        let dir = tempfile::tempdir().unwrap();
        let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;

        rig.start_session(SessionConfig::count(format!("n{}", n), n))
            .await
            .unwrap();
        let state = rig.wait_for_session().await;

        assert_eq!(state.status, SessionStatus::Completed);
        assert_eq!(state.captured_images, n);
        let metadata = SessionMetadata::read_from(
            &state.session_dir.unwrap().join(METADATA_FILE_NAME),
        )
        .await
        .unwrap();
        assert_eq!(metadata.captures.len(), n as usize);
    }
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let faults = FaultInjector::new();
    faults.set_capture_delay(Duration::from_millis(50));
    let rig = common::simulated_rig(dir.path(), faults).await;

    let first = rig
        .start_session(SessionConfig::count("first", 5))
        .await
        .unwrap();
    let err = rig
        .start_session(SessionConfig::count("second", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, RigError::SessionAlreadyRunning));

    let state = rig.get_session_status();
    assert_eq!(state.session_name.as_deref(), Some("first"));
    assert_eq!(state.session_dir, first.session_dir);

    let finished = rig.wait_for_session().await;
    assert_eq!(finished.status, SessionStatus::Completed);
    assert_eq!(finished.captured_images, 5);
}

#[tokio::test]
async fn test_completed_session_accepts_new_start() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;

    rig.start_session(SessionConfig::count("one", 1)).await.unwrap();
    rig.wait_for_session().await;
    rig.start_session(SessionConfig::count("two", 1)).await.unwrap();
    let state = rig.wait_for_session().await;
    assert_eq!(state.session_name.as_deref(), Some("two"));
    assert_eq!(rig.list_capture_folders().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stop_interrupts_interval_sleep() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;
    let mut session_events = rig.subscribe(Topic::Session);

    let config = SessionConfig::count("long", 100).with_interval(Duration::from_secs(30));
    rig.start_session(config).await.unwrap();

    // Wait for the first capture, after which the loop is sleeping for 30s
    let mut last_progress = 0;
    while last_progress == 0 {
        if let RigEvent::SessionProgress {
            captured_images, ..
        } = session_events.recv().await.unwrap()
        {
            last_progress = captured_images;
        }
    }

    let stopping = rig.stop_session().await.unwrap();
    assert!(matches!(
        stopping.status,
        SessionStatus::Stopping | SessionStatus::Idle
    ));

    let state = tokio::time::timeout(Duration::from_secs(2), rig.wait_for_session())
        .await
        .expect("cancellation should wake the interval sleep");
    assert_eq!(state.status, SessionStatus::Idle);
    assert!(state.captured_images <= last_progress);

    let events = collect_until_terminal(&mut session_events).await;
    assert!(matches!(
        events.last(),
        Some(RigEvent::SessionStopped { .. })
    ));

    let metadata = SessionMetadata::read_from(
        &state.session_dir.unwrap().join(METADATA_FILE_NAME),
    )
    .await
    .unwrap();
    assert!(metadata.cancelled);
    assert_eq!(metadata.final_status, SessionStatus::Idle);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_capture() {
    let dir = tempfile::tempdir().unwrap();
    let faults = FaultInjector::new();
    faults.set_capture_delay(Duration::from_millis(200));
    let rig = common::simulated_rig(dir.path(), faults.clone()).await;

    rig.start_session(SessionConfig::count("slow", 10)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.get_camera_status().busy);

    rig.stop_session().await.unwrap();
    let state = rig.wait_for_session().await;

    // The exposure that was running when stop arrived still finished and was kept
    assert_eq!(state.status, SessionStatus::Idle);
    assert_eq!(state.captured_images, 1);
    assert_eq!(faults.captures_attempted(), 1);
}

#[tokio::test]
async fn test_always_failing_camera_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let faults = FaultInjector::new();
    faults.set_fail_all_captures(true);
    let rig = common::simulated_rig(dir.path(), faults.clone()).await;
    let mut camera_events = rig.subscribe(Topic::Camera);

    rig.start_session(SessionConfig::count("cloudy", 3)).await.unwrap();
    let state = rig.wait_for_session().await;

    assert_eq!(state.status, SessionStatus::Failed);
    assert_eq!(state.captured_images, 0);
    assert!(state.last_error.is_some());
    assert_eq!(faults.captures_attempted(), 2);

    let mut failures = 0;
    while let Ok(event) = camera_events.try_recv() {
        if matches!(event, RigEvent::CaptureFailed { .. }) {
            failures += 1;
        }
    }
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_time_bound_session_completes() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;

    let config = SessionConfig::timed("short", Duration::from_millis(300))
        .with_interval(Duration::from_millis(100));
    rig.start_session(config).await.unwrap();
    let state = tokio::time::timeout(Duration::from_secs(5), rig.wait_for_session())
        .await
        .unwrap();

    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.captured_images >= 1);
    assert!(state.elapsed_time >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_stop_without_session_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;
    assert!(matches!(
        rig.stop_session().await,
        Err(RigError::NoActiveSession)
    ));
}

#[tokio::test]
async fn test_session_camera_settings_applied() {
    let dir = tempfile::tempdir().unwrap();
    let rig = common::simulated_rig(dir.path(), FaultInjector::new()).await;

    let mut settings = astro_rig::device::SettingsMap::new();
    settings.insert("gain".to_string(), serde_json::json!(4.0));
    let config = SessionConfig::count("gain4", 1).with_camera_settings(settings);

    rig.start_session(config).await.unwrap();
    let state = rig.wait_for_session().await;
    let metadata = SessionMetadata::read_from(
        &state.session_dir.unwrap().join(METADATA_FILE_NAME),
    )
    .await
    .unwrap();
    assert_eq!(metadata.captures[0].exposure["gain"], serde_json::json!(4.0));
}
