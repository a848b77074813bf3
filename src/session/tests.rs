//! End-to-end session scenarios
//!
//! A full client runs against the in-memory backend on a paused clock. The
//! capture cadence is 50ms and the throttle 40ms, so every tick may send.

use crate::dispatch::SessionEvents;
use crate::session::IN_FLIGHT_CAPACITY;
use crate::test_utils::{MockConnector, MockPeer, MockPeers, ScriptedSource, SourceStep};
use crate::types::{SessionMode, SessionState};
use crate::{FrameStreamClient, SessionEvent, StreamConfig, StreamError};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

const URL: &str = "ws://backend.test:8001/asl-ws";

fn init() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn config() -> StreamConfig {
    StreamConfig {
        url: Some(URL.to_string()),
        throttle_interval_ms: 40,
        capture_cadence_ms: 50,
        target_samples: 10,
        max_reconnect_attempts: 3,
        base_backoff_ms: 100,
        backoff_multiplier: 2.0,
        frame_timeout_ms: 200,
        ..StreamConfig::default()
    }
}

struct Harness {
    client: FrameStreamClient<ScriptedSource>,
    connector: MockConnector,
    peers: MockPeers,
    events: SessionEvents,
}

async fn connected(config: StreamConfig, source: ScriptedSource) -> (Harness, MockPeer) {
    init();
    let (connector, mut peers) = MockConnector::new();
    let client = FrameStreamClient::new(config, connector.clone(), source).unwrap();
    let mut events = client.events();

    client.connect().unwrap();
    let peer = peers.accept().await.unwrap();
    assert!(matches!(next_event(&mut events).await, SessionEvent::Connected));

    (Harness { client, connector, peers, events }, peer)
}

async fn next_event(events: &mut SessionEvents) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("dispatcher closed")
}

#[tokio::test(start_paused = true)]
async fn collection_completes_after_exactly_target_samples() {
    let source = ScriptedSource::steady();
    let acquisitions = source.calls();
    let (mut h, peer) = connected(StreamConfig { target_samples: 120, ..config() }, source).await;
    let acks = peer.spawn_auto_ack();

    h.client.session().start_default("Hello").unwrap();

    let mut progress = 0;
    let completed = loop {
        match next_event(&mut h.events).await {
            SessionEvent::Progress(session) => {
                progress += 1;
                assert_eq!(session.collected_count, progress);
            }
            SessionEvent::Completed(session) => break session,
            other => panic!("unexpected event {other:?}"),
        }
    };

    assert_eq!(progress, 119);
    assert_eq!(completed.collected_count, 120);
    assert_eq!(completed.state, SessionState::Completed);
    assert_eq!(completed.label, "Hello");

    // The loop stopped itself: no further ticks
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!h.client.session().is_capturing());
    assert_eq!(acquisitions.load(Ordering::SeqCst), 120);
    assert_eq!(h.client.session().snapshot().collected_count, 120);

    drop(h.client);
    assert_eq!(acks.await.unwrap(), 120);
}

#[tokio::test(start_paused = true)]
async fn late_acknowledgement_does_not_count_for_new_label() {
    let (mut h, mut peer) = connected(config(), ScriptedSource::steady()).await;
    let session = h.client.session().clone();

    let a = session.start("A", 10).unwrap();
    assert!(peer.recv().await.is_some());

    let b = session.start("B", 10).unwrap();
    assert!(b > a);
    assert!(peer.recv().await.is_some());

    // A's reply arrives after B started, then B's own
    peer.reply(&json!({ "status": "success", "samples": 1 }));
    peer.reply(&json!({ "status": "success", "samples": 2 }));

    match next_event(&mut h.events).await {
        SessionEvent::Progress(snapshot) => {
            assert_eq!(snapshot.label, "B");
            assert_eq!(snapshot.collected_count, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.snapshot().collected_count, 1);
    assert_eq!(session.snapshot().epoch, b);
    assert!(h.events.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn pause_then_resume_preserves_count_and_epoch() {
    let (mut h, mut peer) = connected(config(), ScriptedSource::steady()).await;
    let session = h.client.session().clone();

    let epoch = session.start("A", 10).unwrap();
    assert!(peer.recv().await.is_some());

    session.pause().unwrap();
    assert!(!session.is_capturing());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(peer.try_recv().is_none(), "paused session kept sending");

    // Reply to the frame sent before the pause still counts
    peer.reply(&json!({ "samples": 1 }));
    match next_event(&mut h.events).await {
        SessionEvent::Progress(snapshot) => {
            assert_eq!(snapshot.collected_count, 1);
            assert_eq!(snapshot.state, SessionState::Paused);
        }
        other => panic!("unexpected event {other:?}"),
    }

    session.resume().unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.epoch, epoch);
    assert_eq!(snapshot.collected_count, 1);
    assert_eq!(snapshot.state, SessionState::Collecting);
    assert!(peer.recv().await.is_some());

    assert!(matches!(session.resume(), Err(StreamError::InvalidTransition { .. })));
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_backs_off_then_stalls_the_session() {
    let (mut h, mut peer) = connected(config(), ScriptedSource::steady()).await;
    let session = h.client.session().clone();

    session.start("A", 10).unwrap();
    assert!(peer.recv().await.is_some());
    peer.reply(&json!({ "samples": 1 }));
    assert!(matches!(next_event(&mut h.events).await, SessionEvent::Progress(_)));

    h.connector.refuse_all(true);
    peer.close(crate::CloseCode::ABNORMAL, "network lost");

    let mut delays = Vec::new();
    let (stalled, error) = loop {
        match next_event(&mut h.events).await {
            SessionEvent::Reconnecting { delay, .. } => delays.push(delay),
            SessionEvent::Stalled { session, error } => break (session, error),
            SessionEvent::Disconnected { .. } | SessionEvent::Error(_) => {}
            other => panic!("unexpected event {other:?}"),
        }
    };

    assert_eq!(delays, [Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]);
    assert!(matches!(error, StreamError::ExhaustedRetries { attempts: 3 }));
    assert_eq!(stalled.state, SessionState::Paused);
    assert_eq!(stalled.collected_count, 1);
    assert!(!session.is_capturing());

    // Progress survives; the session picks up once the backend is back
    h.connector.refuse_all(false);
    h.client.connect().unwrap();
    let mut peer = h.peers.accept().await.unwrap();
    assert!(matches!(next_event(&mut h.events).await, SessionEvent::Connected));

    session.resume().unwrap();
    assert!(peer.recv().await.is_some());
    peer.reply(&json!({ "samples": 2 }));
    match next_event(&mut h.events).await {
        SessionEvent::Progress(snapshot) => assert_eq!(snapshot.collected_count, 2),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn capture_failures_skip_only_their_tick() {
    let source = ScriptedSource::new([SourceStep::Fail("camera busy".into()), SourceStep::Stall]);
    let (mut h, mut peer) = connected(config(), source).await;

    h.client.session().start("A", 10).unwrap();

    assert!(matches!(
        next_event(&mut h.events).await,
        SessionEvent::CaptureFailed(StreamError::CaptureSource { .. })
    ));
    match next_event(&mut h.events).await {
        SessionEvent::CaptureFailed(StreamError::Timeout { duration }) => {
            assert_eq!(duration, Duration::from_millis(200));
        }
        other => panic!("unexpected event {other:?}"),
    }

    assert!(peer.recv().await.is_some());
    assert_eq!(h.client.session().snapshot().state, SessionState::Collecting);
}

#[tokio::test(start_paused = true)]
async fn inference_results_reach_consumer_until_stopped() {
    let (mut h, mut peer) = connected(config(), ScriptedSource::steady()).await;
    let session = h.client.session().clone();

    session.start_inference().unwrap();
    assert_eq!(session.snapshot().mode, SessionMode::Inference);
    assert!(peer.recv().await.is_some());
    assert!(peer.recv().await.is_some());

    peer.reply(&json!({
        "timestamp": 1.5,
        "hand_detected": true,
        "gesture": "Hello",
        "confidence": 0.97,
        "landmarks": [[0.5, 0.25, 0.0]]
    }));
    match next_event(&mut h.events).await {
        SessionEvent::Inference(result) => {
            assert_eq!(result.label, "Hello");
            assert!(result.is_recognised());
        }
        other => panic!("unexpected event {other:?}"),
    }

    let last = session.stop();
    assert_eq!(last.mode, SessionMode::Inference);

    peer.reply(&json!({ "gesture": "Late", "confidence": 0.5, "hand_detected": true }));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.events.try_recv().is_none());
    assert!(!session.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn error_replies_never_change_counts() {
    let (mut h, mut peer) = connected(config(), ScriptedSource::steady()).await;
    let session = h.client.session().clone();

    session.start("A", 10).unwrap();
    assert!(peer.recv().await.is_some());
    assert!(peer.recv().await.is_some());

    peer.reply(&json!({ "error": "Failed to decode image" }));
    peer.reply_text("definitely not json");
    peer.reply(&json!({ "samples": 1 }));

    for _ in 0..2 {
        match next_event(&mut h.events).await {
            SessionEvent::Error(StreamError::Protocol { .. }) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    match next_event(&mut h.events).await {
        SessionEvent::Progress(snapshot) => assert_eq!(snapshot.collected_count, 1),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn new_label_after_completion_starts_fresh() {
    let (mut h, peer) = connected(config(), ScriptedSource::steady()).await;
    let _acks = peer.spawn_auto_ack();
    let session = h.client.session().clone();

    session.start("A", 2).unwrap();
    loop {
        if let SessionEvent::Completed(done) = next_event(&mut h.events).await {
            assert_eq!(done.collected_count, 2);
            break;
        }
    }

    session.start("B", 2).unwrap();
    let snapshot = session.snapshot();
    assert_eq!(snapshot.label, "B");
    assert_eq!(snapshot.collected_count, 0);
    assert_eq!(snapshot.state, SessionState::Collecting);
    assert!(session.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn unanswered_frames_hold_off_capture_across_restart() {
    let source = ScriptedSource::steady();
    let acquisitions = source.calls();
    let (mut h, mut peer) = connected(config(), source).await;
    let session = h.client.session().clone();

    session.start("A", 100).unwrap();
    for _ in 0..IN_FLIGHT_CAPACITY {
        assert!(peer.recv().await.is_some());
    }

    // The backend is silent: capture holds off instead of losing track
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(peer.try_recv().is_none());
    assert_eq!(acquisitions.load(Ordering::SeqCst), IN_FLIGHT_CAPACITY);

    session.start("B", 100).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(peer.try_recv().is_none());

    // A's replies all arrive late, then B gets to send again
    for n in 1..=IN_FLIGHT_CAPACITY as u64 {
        peer.reply(&json!({ "status": "success", "samples": n }));
    }
    assert!(peer.recv().await.is_some());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.events.try_recv().is_none());
    assert_eq!(session.snapshot().collected_count, 0);

    peer.reply(&json!({ "status": "success", "samples": 1 }));
    match next_event(&mut h.events).await {
        SessionEvent::Progress(snapshot) => {
            assert_eq!(snapshot.label, "B");
            assert_eq!(snapshot.collected_count, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
