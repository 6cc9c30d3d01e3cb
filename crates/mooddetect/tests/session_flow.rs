mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::sync::broadcast::Receiver;
use tokio::sync::Notify;

use common::*;
use mooddetect::inference::InferenceError;
use mooddetect::playback::{PlaybackError, ResourceState};
use mooddetect::tracks::FetchError;
use mooddetect::{SessionError, SessionEvent, SessionState};

fn drain(events: &mut Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn detect_publishes_mood_and_tracks() {
    let h = Harness::basic().ready().await;
    let mut events = h.session.subscribe();

    let (mood, tracks) = h.session.detect().await.unwrap();

    assert_eq!(mood.as_str(), "happy");
    assert_eq!(tracks.len(), 3);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(*h.tracks.requested.lock().unwrap(), vec!["happy".to_string()]);

    let events = drain(&mut events);
    assert_eq!(states(&events), vec![SessionState::Detecting, SessionState::Idle]);
    let mood_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::MoodDetected { .. }))
        .unwrap();
    let tracks_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::TracksPublished { .. }))
        .unwrap();
    assert!(mood_at < tracks_at);

    let snapshot = h.session.snapshot();
    assert!(snapshot.capture_ready);
    assert_eq!(snapshot.tracks, tracks);
    assert_eq!(snapshot.playback.len(), 3);
}

#[tokio::test]
async fn switching_tracks_pauses_the_previous_one_first() {
    let h = Harness::basic().ready().await;
    h.session.detect().await.unwrap();

    assert_eq!(h.session.select_track(1).await.unwrap(), ResourceState::Playing);
    assert_eq!(h.session.select_track(2).await.unwrap(), ResourceState::Playing);

    assert_eq!(
        entries(&h.audio_log),
        vec![
            "load:mem://happy/1",
            "play:mem://happy/1",
            "pause:mem://happy/1",
            "load:mem://happy/2",
            "play:mem://happy/2",
        ]
    );
    assert_eq!(h.session.pool().playing_count(), 1);
}

#[tokio::test]
async fn network_failure_returns_to_idle_without_publishing() {
    let tracks = MockTracks::new().then(Err(FetchError::Network {
        url: "http://localhost:3000".to_string(),
        message: "connection refused".to_string(),
    }));
    let h = Harness::new(MockCamera::new(), MockDetector::new(), tracks)
        .ready()
        .await;
    let mut events = h.session.subscribe();

    let err = h.session.detect().await.unwrap_err();

    assert!(matches!(err, SessionError::Network { .. }));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.session.snapshot().tracks.is_empty());

    let events = drain(&mut events);
    assert_eq!(
        states(&events),
        vec![SessionState::Detecting, SessionState::Error, SessionState::Idle]
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, SessionEvent::TracksPublished { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Notice { message } if message.contains("http://localhost:3000")
    )));
}

#[tokio::test]
async fn failed_cycle_keeps_previous_tracks() {
    let tracks = MockTracks::new()
        .then(Ok(tracks_for("happy", 2)))
        .then(Err(FetchError::Backend {
            status: Some(500),
            message: "boom".to_string(),
        }));
    let h = Harness::new(MockCamera::new(), MockDetector::new(), tracks)
        .ready()
        .await;

    h.session.detect().await.unwrap();
    h.session.select_track(0).await.unwrap();
    assert!(matches!(
        h.session.detect().await,
        Err(SessionError::Backend { status: Some(500), .. })
    ));

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.tracks.len(), 2);
    assert_eq!(snapshot.playback[0].state, ResourceState::Playing);
    assert!(snapshot.last_error.is_some());
}

#[tokio::test]
async fn frame_read_failure_returns_to_idle_and_recovers() {
    let h = Harness::basic().ready().await;
    *h.camera.grab_fault.lock().unwrap() = Some("unplugged".to_string());
    let mut events = h.session.subscribe();

    let err = h.session.detect().await.unwrap_err();

    assert!(matches!(err, SessionError::DeviceUnavailable(ref r) if r == "unplugged"));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
    let events = drain(&mut events);
    assert_eq!(
        states(&events),
        vec![SessionState::Detecting, SessionState::Error, SessionState::Idle]
    );

    *h.camera.grab_fault.lock().unwrap() = None;
    h.session.detect().await.unwrap();
    assert_eq!(h.camera.grabbed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn teardown_while_playing_pauses_once_and_releases_camera() {
    let h = Harness::basic().ready().await;
    h.session.detect().await.unwrap();
    h.session.select_track(0).await.unwrap();

    assert!(h.session.teardown());
    assert!(!h.session.teardown());

    assert_eq!(count(&h.audio_log, "pause:mem://happy/0"), 1);
    assert_eq!(count(&h.audio_log, "release:mem://happy/0"), 1);
    assert_eq!(h.stops(), 1);
    assert_eq!(h.session.state(), SessionState::Terminated);

    let Harness {
        session,
        camera,
        audio_log,
        ..
    } = h;
    drop(session);
    assert_eq!(camera.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(count(&audio_log, "pause:mem://happy/0"), 1);
}

#[tokio::test]
async fn concurrent_detect_is_rejected_busy() {
    let gate = Arc::new(Notify::new());
    let detector = MockDetector {
        gate: Some(gate.clone()),
        ..MockDetector::new()
    };
    let h = Harness::new(MockCamera::new(), detector, MockTracks::new())
        .ready()
        .await;

    let first = h.session.detect();
    tokio::pin!(first);
    tokio::select! {
        _ = &mut first => panic!("inference is gated"),
        _ = h.detector.entered.notified() => {}
    }

    assert_eq!(h.session.detect().await, Err(SessionError::Busy));
    assert_eq!(h.session.state(), SessionState::Detecting);

    gate.notify_one();
    let (mood, _) = first.await.unwrap();
    assert_eq!(mood.as_str(), "happy");
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn detect_before_capture_ready_is_rejected() {
    let h = Harness::basic();
    assert_eq!(h.session.detect().await, Err(SessionError::NotReady));

    h.session.initialize().await.unwrap();
    assert_eq!(h.session.state(), SessionState::AwaitingCapture);
    assert_eq!(h.session.detect().await, Err(SessionError::NotReady));
    assert_eq!(h.detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn teardown_during_detect_discards_results() {
    let gate = Arc::new(Notify::new());
    let tracks = MockTracks {
        gate: Some(gate.clone()),
        ..MockTracks::new()
    };
    let h = Harness::new(MockCamera::new(), MockDetector::new(), tracks)
        .ready()
        .await;

    let cycle = h.session.detect();
    tokio::pin!(cycle);
    tokio::select! {
        _ = &mut cycle => panic!("fetch is gated"),
        _ = h.tracks.entered.notified() => {}
    }

    h.session.teardown();
    assert_eq!(h.stops(), 1);

    gate.notify_one();
    assert_eq!(cycle.await, Err(SessionError::Terminated));
    assert_eq!(h.session.state(), SessionState::Terminated);
    assert!(h.session.snapshot().tracks.is_empty());
    assert!(entries(&h.audio_log).is_empty());
}

#[tokio::test]
async fn device_unavailable_keeps_awaiting_capture() {
    let camera = MockCamera {
        fail: Some("permission denied".to_string()),
        ..MockCamera::new()
    };
    let h = Harness::new(camera, MockDetector::new(), MockTracks::new());
    h.session.initialize().await.unwrap();
    let mut events = h.session.subscribe();

    let err = h.session.start_capture().await.unwrap_err();

    assert_eq!(err, SessionError::DeviceUnavailable("permission denied".to_string()));
    assert_eq!(h.session.state(), SessionState::AwaitingCapture);
    assert!(err.user_message().contains("camera permissions"));
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::Notice { .. })));
}

#[tokio::test]
async fn readiness_timeout_releases_camera() {
    tokio::time::pause();
    let camera = MockCamera {
        ready_gate: Some(Arc::new(Notify::new())),
        ..MockCamera::new()
    };
    let h = Harness::new(camera, MockDetector::new(), MockTracks::new());
    h.session.initialize().await.unwrap();

    let err = h.session.start_capture().await.unwrap_err();

    assert!(matches!(err, SessionError::DeviceUnavailable(_)));
    assert_eq!(h.stops(), 1);
    assert_eq!(h.session.state(), SessionState::AwaitingCapture);
}

#[tokio::test]
async fn teardown_while_waiting_for_readiness_releases_camera() {
    let gate = Arc::new(Notify::new());
    let camera = MockCamera {
        ready_gate: Some(gate.clone()),
        ..MockCamera::new()
    };
    let h = Harness::new(camera, MockDetector::new(), MockTracks::new());
    h.session.initialize().await.unwrap();

    let starting = h.session.start_capture();
    tokio::pin!(starting);
    tokio::select! {
        _ = &mut starting => panic!("readiness is gated"),
        _ = tokio::task::yield_now() => {}
    }
    assert_eq!(h.camera.opened.load(Ordering::SeqCst), 1);

    h.session.teardown();
    assert_eq!(h.stops(), 1);

    gate.notify_one();
    assert_eq!(starting.await, Err(SessionError::Terminated));
    assert_eq!(h.stops(), 1);
}

#[tokio::test]
async fn no_face_is_reported_and_recoverable() {
    let detector = MockDetector::new().then(Ok(vec![]));
    let h = Harness::new(MockCamera::new(), detector, MockTracks::new())
        .ready()
        .await;

    let err = h.session.detect().await.unwrap_err();
    assert_eq!(err, SessionError::NoFaceDetected);
    assert!(err.user_message().starts_with("No face detected"));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(h.tracks.requested.lock().unwrap().is_empty());

    // Next attempt goes through.
    assert!(h.session.detect().await.is_ok());
}

#[tokio::test]
async fn model_load_failure_can_be_retried() {
    let detector = MockDetector::new()
        .failing_load(InferenceError::ModelUnavailable("weights missing".to_string()));
    let h = Harness::new(MockCamera::new(), detector, MockTracks::new());

    assert!(matches!(
        h.session.initialize().await,
        Err(SessionError::ModelUnavailable(_))
    ));
    assert_eq!(h.session.state(), SessionState::Initializing);

    h.session.initialize().await.unwrap();
    assert_eq!(h.session.state(), SessionState::AwaitingCapture);
}

#[tokio::test]
async fn completed_track_goes_idle_and_replays() {
    let h = Harness::basic().ready().await;
    h.session.detect().await.unwrap();
    h.session.select_track(0).await.unwrap();

    let notifier = h.notifiers.lock().unwrap().last().cloned().unwrap();
    notifier.ended();
    let track = h.session.next_playback_event().await.unwrap();
    assert_eq!(track.index, 0);
    assert_eq!(track.state, ResourceState::Idle);

    assert_eq!(h.session.select_track(0).await.unwrap(), ResourceState::Playing);
    assert_eq!(count(&h.audio_log, "load:mem://happy/0"), 1);
    assert_eq!(count(&h.audio_log, "play:mem://happy/0"), 2);
}

#[tokio::test]
async fn late_end_from_paused_run_does_not_stop_resumed_track() {
    let h = Harness::basic().ready().await;
    h.session.detect().await.unwrap();
    h.session.select_track(0).await.unwrap();
    let first_run = h.notifiers.lock().unwrap().last().cloned().unwrap();

    assert_eq!(h.session.select_track(0).await.unwrap(), ResourceState::Paused);
    first_run.ended();
    assert_eq!(h.session.select_track(0).await.unwrap(), ResourceState::Playing);
    h.session.pump_playback_events();
    assert_eq!(h.session.snapshot().playback[0].state, ResourceState::Playing);

    h.session.select_track(1).await.unwrap();
    assert_eq!(count(&h.audio_log, "pause:mem://happy/0"), 2);
    let playing: Vec<usize> = h
        .session
        .snapshot()
        .playback
        .iter()
        .filter(|t| t.state == ResourceState::Playing)
        .map(|t| t.index)
        .collect();
    assert_eq!(playing, vec![1]);
}

#[tokio::test]
async fn new_detection_releases_old_tracks_and_likes() {
    let detector = MockDetector::new()
        .then(Ok(face(&[("happy", 0.9)])))
        .then(Ok(face(&[("sad", 0.6), ("happy", 0.3)])));
    let h = Harness::new(MockCamera::new(), detector, MockTracks::new())
        .ready()
        .await;

    h.session.detect().await.unwrap();
    h.session.select_track(0).await.unwrap();
    h.session.like(1).unwrap();

    let (mood, _) = h.session.detect().await.unwrap();
    assert_eq!(mood.as_str(), "sad");

    assert_eq!(count(&h.audio_log, "pause:mem://happy/0"), 1);
    assert_eq!(count(&h.audio_log, "release:mem://happy/0"), 1);
    assert!(h.session.pool().liked().is_empty());
    assert_eq!(h.session.pool().playing_count(), 0);
}

#[tokio::test]
async fn everything_refused_after_teardown() {
    let h = Harness::basic().ready().await;
    h.session.detect().await.unwrap();
    h.session.teardown();

    assert_eq!(h.session.detect().await, Err(SessionError::Terminated));
    assert_eq!(h.session.select_track(0).await, Err(SessionError::Terminated));
    assert_eq!(h.session.like(0), Err(SessionError::Terminated));
    assert_eq!(h.session.initialize().await, Err(SessionError::Terminated));
    assert_eq!(h.session.start_capture().await.map(|_| ()), Err(SessionError::Terminated));
}

#[tokio::test]
async fn selecting_unknown_track_is_an_error() {
    let h = Harness::basic().ready().await;
    h.session.detect().await.unwrap();

    assert!(matches!(
        h.session.select_track(9).await,
        Err(SessionError::Playback(PlaybackError::UnknownTrack(9)))
    ));
    assert_eq!(h.session.pool().playing_count(), 0);
}
