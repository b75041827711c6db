use super::*;
use crate::config::SessionConfig;
use crate::error::{BackendError, EmbedcamError, SessionError};
use crate::events::{NotificationBus, Operation, SessionEvent};
use crate::remote::{Camera, CaptureOptions, MockBackend, MockCall, MockOp, ProgressSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn lobby_and_gate() -> Vec<Camera> {
    vec![Camera::new(1, "Lobby"), Camera::new(2, "Gate")]
}

fn member() -> Member {
    Member::new(42, "Ada Lovelace")
}

async fn open_with(
    backend: &Arc<MockBackend>,
    settings: SessionConfig,
) -> (SessionOrchestrator, broadcast::Receiver<SessionEvent>) {
    let bus = NotificationBus::new(64);
    let events = bus.subscribe();
    let session = SessionOrchestrator::open(member(), backend.clone(), settings, bus).await;
    (session, events)
}

async fn open(backend: &Arc<MockBackend>) -> (SessionOrchestrator, broadcast::Receiver<SessionEvent>) {
    open_with(backend, SessionConfig::default()).await
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn count(events: &[SessionEvent], event_type: &str) -> usize {
    events
        .iter()
        .filter(|event| event.event_type() == event_type)
        .count()
}

async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_open_loads_directory_and_selects_first_camera() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    let view = session.view();
    assert_eq!(view.cameras, lobby_and_gate());
    assert!(view.cameras_loaded_at.is_some());
    assert_eq!(view.selected, Some(1));
    assert_eq!(view.collecting.len(), 2);
    assert!(view.collecting.values().all(|collecting| !collecting));
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(!view.busy);
}

#[tokio::test(start_paused = true)]
async fn test_collect_extract_until_done() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    session.select_camera(1).unwrap();
    session.start().await.unwrap();
    assert!(session.is_collecting(1));

    backend.push_progress(ProgressSnapshot::new("extracting", 40.0));
    backend.push_progress(ProgressSnapshot::new("done", 100.0));

    let message = session.extract().await.unwrap();
    assert_eq!(message, "Extraction started");
    assert_eq!(session.phase(), JobPhase::Polling);

    settle(10).await;
    let view = session.view();
    assert_eq!(view.phase, JobPhase::Polling);
    assert_eq!(view.last_snapshot.as_ref().map(|s| s.percent), Some(40.0));

    settle(1000).await;
    assert_eq!(session.phase(), JobPhase::Done);
    assert!(!session.is_polling());

    settle(5000).await;
    assert_eq!(backend.progress_polls_for(1), 2);

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "capture_started"), 1);
    assert_eq!(count(&seen, "extraction_started"), 1);
    assert_eq!(count(&seen, "extraction_completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_switching_camera_stops_polling_for_previous_camera() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(10).await;
    assert_eq!(backend.progress_polls_for(1), 1);
    assert!(session.is_polling());

    session.select_camera(2).unwrap();
    let view = session.view();
    assert_eq!(view.selected, Some(2));
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(view.last_snapshot.is_none());
    assert!(!session.is_polling());

    settle(5000).await;
    assert_eq!(backend.progress_polls_for(1), 1);
    assert_eq!(backend.progress_polls_for(2), 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_poll_is_discarded_after_switch() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.set_latency(MockOp::FetchProgress, Duration::from_millis(500));
    backend.push_progress(ProgressSnapshot::new("done", 100.0));
    let (session, mut events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(100).await;
    assert_eq!(backend.progress_polls_for(1), 1);

    session.select_camera(2).unwrap();
    settle(2000).await;

    let view = session.view();
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(view.last_snapshot.is_none());
    assert_eq!(count(&drain(&mut events), "extraction_completed"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_selecting_current_camera_keeps_job() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.extract().await.unwrap();
    session.select_camera(1).unwrap();

    assert_eq!(session.phase(), JobPhase::Polling);
    assert!(session.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_extract_keeps_one_poller() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.extract().await.unwrap();
    session.extract().await.unwrap();
    assert_eq!(backend.call_count(MockOp::BeginExtraction), 2);

    settle(10).await;
    assert_eq!(backend.progress_polls_for(1), 1);

    settle(3000).await;
    assert_eq!(backend.progress_polls_for(1), 4);
    assert_eq!(session.phase(), JobPhase::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_extract_after_done_starts_fresh_attempt() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.push_progress(ProgressSnapshot::new("done", 100.0));
    let (session, mut events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(10).await;
    assert_eq!(session.phase(), JobPhase::Done);

    backend.push_progress(ProgressSnapshot::new("extracting", 5.0));
    session.extract().await.unwrap();
    assert!(session.view().last_snapshot.is_none());

    settle(10).await;
    let view = session.view();
    assert_eq!(view.phase, JobPhase::Polling);
    assert_eq!(view.progress_percent(), Some(5.0));
    assert_eq!(count(&drain(&mut events), "extraction_completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_extraction_status_still_polls() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.set_extraction_status("queued");
    let (session, mut events) = open(&backend).await;

    let message = session.extract().await.unwrap();
    assert_eq!(message, "Extract: queued");
    assert_eq!(session.phase(), JobPhase::Polling);

    settle(10).await;
    assert_eq!(backend.progress_polls_for(1), 1);

    let started = drain(&mut events)
        .into_iter()
        .find(|event| event.event_type() == "extraction_started");
    assert!(matches!(
        started,
        Some(SessionEvent::ExtractionStarted { status, .. }) if status == "queued"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_keeps_last_snapshot() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.push_progress(ProgressSnapshot::new("extracting", 40.0));
    backend.push_progress_failure(MockBackend::transport_error("fetch_progress"));
    let (session, mut events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(1010).await;

    let view = session.view();
    assert_eq!(backend.progress_polls_for(1), 2);
    assert_eq!(view.phase, JobPhase::Polling);
    assert_eq!(view.last_snapshot.as_ref().map(|s| s.percent), Some(40.0));
    assert_eq!(count(&drain(&mut events), "operation_failed"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_stage_ends_job() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.push_progress(ProgressSnapshot::new("failed", 20.0));
    let (session, mut events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(3000).await;

    assert_eq!(session.phase(), JobPhase::Failed);
    assert_eq!(backend.progress_polls_for(1), 1);
    assert_eq!(count(&drain(&mut events), "extraction_failed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_deadline_fails_job() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let settings = SessionConfig {
        poll_interval_ms: 700,
        max_poll_seconds: 3,
        ..SessionConfig::default()
    };
    let (session, mut events) = open_with(&backend, settings).await;

    session.extract().await.unwrap();
    settle(5000).await;

    assert_eq!(session.phase(), JobPhase::Failed);
    assert!(!session.is_polling());
    assert_eq!(backend.progress_polls_for(1), 5);
    assert_eq!(count(&drain(&mut events), "extraction_failed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_extract_failure_returns_job_to_idle() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(10).await;
    drain(&mut events);

    backend.fail_next(
        MockOp::BeginExtraction,
        MockBackend::transport_error("begin_extraction"),
    );
    let result = session.extract().await;
    assert!(matches!(result, Err(EmbedcamError::Backend(_))));
    assert_eq!(session.phase(), JobPhase::Idle);
    assert!(!session.is_polling());

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].description(), "Failed to start extraction");
}

#[tokio::test(start_paused = true)]
async fn test_extract_resolving_after_switch_does_not_poll() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.set_latency(MockOp::BeginExtraction, Duration::from_millis(500));
    let (session, mut events) = open(&backend).await;

    let (extracted, switched) = tokio::join!(session.extract(), async {
        settle(100).await;
        session.select_camera(2)
    });
    extracted.unwrap();
    switched.unwrap();

    settle(3000).await;
    assert_eq!(session.phase(), JobPhase::Idle);
    assert_eq!(backend.call_count(MockOp::FetchProgress), 0);
    assert_eq!(count(&drain(&mut events), "extraction_started"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_while_polling_resets_state() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    session.start().await.unwrap();
    session.extract().await.unwrap();
    settle(10).await;

    let message = session.remove().await.unwrap();
    assert_eq!(message, "Embeddings removed");

    let view = session.view();
    assert!(!view.is_collecting(1));
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(view.last_snapshot.is_none());
    assert!(!session.is_polling());

    settle(3000).await;
    assert_eq!(backend.progress_polls_for(1), 1);
    assert!(backend.calls().contains(&MockCall::RemoveEmbeddings {
        member_id: 42,
        camera_id: 1,
    }));
    assert_eq!(count(&drain(&mut events), "embeddings_removed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remove_failure_leaves_state_alone() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.start().await.unwrap();
    session.extract().await.unwrap();
    backend.fail_next(
        MockOp::RemoveEmbeddings,
        MockBackend::transport_error("remove_embeddings"),
    );

    assert!(session.remove().await.is_err());
    assert!(session.is_collecting(1));
    assert_eq!(session.phase(), JobPhase::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_start_sends_capture_options() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let settings = SessionConfig {
        show_viewer: false,
        clear_existing: true,
        ..SessionConfig::default()
    };
    let (session, _events) = open_with(&backend, settings).await;

    let message = session.start().await.unwrap();
    assert_eq!(message, "Collection started for member 42");
    assert!(backend.calls().contains(&MockCall::BeginCapture {
        member_id: 42,
        camera_ids: vec![1],
        options: CaptureOptions {
            show_viewer: false,
            clear_existing: true,
        },
    }));
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_surfaces_backend_detail_once() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    backend.fail_next(
        MockOp::BeginCapture,
        BackendError::Http {
            operation: "begin_capture".to_string(),
            status: 409,
            detail: "Collector already running".to_string(),
        },
    );

    assert!(session.start().await.is_err());
    assert!(!session.is_collecting(1));
    assert!(!session.is_busy());

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        &seen[0],
        SessionEvent::OperationFailed { operation: Operation::StartCapture, message, .. }
            if message == "Collector already running"
    ));

    backend.fail_next(
        MockOp::BeginCapture,
        MockBackend::transport_error("begin_capture"),
    );
    assert!(session.start().await.is_err());
    assert_eq!(drain(&mut events)[0].description(), "Failed to start collection");

    session.start().await.unwrap();
    assert!(session.is_collecting(1));
}

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_follow_acknowledgements() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    session.start().await.unwrap();
    let rejected = session.start().await;
    assert!(matches!(
        rejected,
        Err(EmbedcamError::Session(SessionError::AlreadyCollecting { camera_id: 1 }))
    ));
    assert_eq!(backend.call_count(MockOp::BeginCapture), 1);

    let message = session.stop().await.unwrap();
    assert_eq!(message, "Collection stopped");
    assert!(!session.is_collecting(1));

    // Stopping an idle camera is passed through
    session.stop().await.unwrap();
    assert!(backend.calls().contains(&MockCall::EndCapture {
        reason: "user".to_string(),
    }));

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "validation_failed"), 1);
    assert_eq!(count(&seen, "capture_stopped"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_flags_are_per_camera() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.start().await.unwrap();
    session.select_camera(2).unwrap();
    session.start().await.unwrap();
    session.stop().await.unwrap();

    assert!(session.is_collecting(1));
    assert!(!session.is_collecting(2));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_operations_are_rejected() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.set_latency(MockOp::BeginCapture, Duration::from_millis(500));
    let (session, mut events) = open(&backend).await;

    let (started, extracted) = tokio::join!(session.start(), async {
        settle(100).await;
        assert!(session.view().busy);
        session.extract().await
    });

    started.unwrap();
    assert!(matches!(
        extracted,
        Err(EmbedcamError::Session(SessionError::Busy))
    ));
    assert!(!session.is_busy());
    assert_eq!(backend.call_count(MockOp::BeginExtraction), 0);
    assert_eq!(count(&drain(&mut events), "validation_failed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_selection_allowed_while_busy() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.set_latency(MockOp::BeginCapture, Duration::from_millis(500));
    let (session, _events) = open(&backend).await;

    let (started, switched) = tokio::join!(session.start(), async {
        settle(100).await;
        session.select_camera(2)
    });
    started.unwrap();
    switched.unwrap();

    assert_eq!(session.selected_camera(), Some(2));
    assert!(session.is_collecting(1));
    assert!(!session.is_collecting(2));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_camera_selection_rejected() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    let result = session.select_camera(9);
    assert!(matches!(
        result,
        Err(EmbedcamError::Session(SessionError::UnknownCamera { camera_id: 9 }))
    ));
    assert_eq!(session.selected_camera(), Some(1));
    assert_eq!(count(&drain(&mut events), "validation_failed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_directory_failure_leaves_empty_session() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.fail_next(MockOp::ListCameras, MockBackend::transport_error("list_cameras"));
    let (session, mut events) = open(&backend).await;

    let view = session.view();
    assert!(view.cameras.is_empty());
    assert!(view.collecting.is_empty());
    assert_eq!(view.selected, None);
    assert!(!view.can_start());

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].description(), "Failed to fetch cameras");

    let result = session.extract().await;
    assert!(matches!(
        result,
        Err(EmbedcamError::Session(SessionError::NoCameraSelected))
    ));
    assert_eq!(backend.call_count(MockOp::BeginExtraction), 0);
    assert_eq!(count(&drain(&mut events), "validation_failed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_reconciles_directory() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.start().await.unwrap();
    session.select_camera(2).unwrap();
    session.start().await.unwrap();
    session.extract().await.unwrap();

    backend.set_cameras(vec![Camera::new(1, "Lobby"), Camera::new(3, "Dock")]);
    assert_eq!(session.reload_cameras().await.unwrap(), 2);

    let view = session.view();
    assert_eq!(view.selected, Some(1));
    assert!(view.is_collecting(1));
    assert!(!view.collecting.contains_key(&2));
    assert_eq!(view.collecting.get(&3), Some(&false));
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(!session.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_reload_failure_empties_directory() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    session.start().await.unwrap();
    session.extract().await.unwrap();
    settle(10).await;
    drain(&mut events);

    backend.fail_next(MockOp::ListCameras, MockBackend::transport_error("list_cameras"));
    assert!(session.reload_cameras().await.is_err());

    let view = session.view();
    assert!(view.cameras.is_empty());
    assert!(view.cameras_loaded_at.is_none());
    assert!(view.collecting.is_empty());
    assert_eq!(view.selected, None);
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(view.last_snapshot.is_none());
    assert!(!view.busy);
    assert!(!session.is_polling());

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        &seen[0],
        SessionEvent::OperationFailed { operation: Operation::LoadCameras, .. }
    ));
    assert_eq!(seen[0].description(), "Failed to fetch cameras");

    settle(5000).await;
    assert_eq!(backend.progress_polls_for(1), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_resolving_after_dispose_is_rejected() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;
    backend.set_latency(MockOp::ListCameras, Duration::from_millis(500));

    let (result, ()) = tokio::join!(session.reload_cameras(), async {
        settle(100).await;
        session.dispose();
    });

    assert!(matches!(
        result,
        Err(EmbedcamError::Session(SessionError::Disposed))
    ));
    assert!(session.view().cameras.is_empty());

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_type(), "validation_failed");
}

#[tokio::test(start_paused = true)]
async fn test_stop_failure_keeps_flag() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, mut events) = open(&backend).await;

    session.start().await.unwrap();
    drain(&mut events);

    backend.fail_next(MockOp::EndCapture, MockBackend::transport_error("end_capture"));
    assert!(session.stop().await.is_err());
    assert!(session.is_collecting(1));
    assert!(!session.is_busy());

    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        &seen[0],
        SessionEvent::OperationFailed { operation: Operation::StopCapture, .. }
    ));
    assert_eq!(seen[0].description(), "Failed to stop collection");

    session.stop().await.unwrap();
    assert!(!session.is_collecting(1));
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_poll_settings_still_complete() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    backend.push_progress(ProgressSnapshot::new("extracting", 40.0));
    backend.push_progress(ProgressSnapshot::new("done", 100.0));
    let settings = SessionConfig {
        poll_interval_ms: 0,
        max_poll_seconds: u64::MAX,
        ..SessionConfig::default()
    };
    let (session, mut events) = open_with(&backend, settings).await;

    session.extract().await.unwrap();
    settle(5000).await;

    assert_eq!(session.phase(), JobPhase::Done);
    assert_eq!(backend.progress_polls_for(1), 2);
    assert!(!session.is_polling());
    assert_eq!(count(&drain(&mut events), "extraction_completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_is_idempotent_and_final() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(10).await;

    session.dispose();
    session.dispose();

    let view = session.view();
    assert!(view.closed);
    assert_eq!(view.phase, JobPhase::Idle);
    assert!(view.cameras.is_empty());
    assert!(!session.is_polling());

    assert!(matches!(
        session.start().await,
        Err(EmbedcamError::Session(SessionError::Disposed))
    ));
    assert!(session.select_camera(2).is_err());

    settle(3000).await;
    assert_eq!(backend.progress_polls_for(1), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_stops_polling() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (session, _events) = open(&backend).await;

    session.extract().await.unwrap();
    settle(10).await;
    drop(session);

    settle(3000).await;
    assert_eq!(backend.progress_polls_for(1), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_independent() {
    let backend = Arc::new(MockBackend::new(lobby_and_gate()));
    let (first, _first_events) = open(&backend).await;
    let (second, _second_events) = open(&backend).await;

    first.start().await.unwrap();
    second.select_camera(2).unwrap();

    assert!(first.is_collecting(1));
    assert!(!second.is_collecting(1));
    assert_eq!(first.selected_camera(), Some(1));
    assert_ne!(first.session_id(), second.session_id());
}
