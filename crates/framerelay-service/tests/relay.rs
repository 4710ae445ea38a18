mod common;

use std::time::Duration;

use common::*;
use framerelay_core::{parse_envelope, CloseReason, Frame, Orientation, RelayConfig, RelayState};
use framerelay_service::{FrameRelay, RelayError};

async fn connected(config: RelayConfig) -> (FrameRelay, MockHandle) {
    let (transport, handle) = mock(true);
    let relay = FrameRelay::new(transport, config).unwrap();
    relay.start(mock_target()).await.unwrap();
    wait_until("consumer attached", || relay.is_ready()).await;
    (relay, handle)
}

/// Grant write space until the in-flight frame has drained.
async fn drain(relay: &FrameRelay, handle: &MockHandle, sent_before: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while relay.stats().frames_sent == sent_before {
        assert!(tokio::time::Instant::now() < deadline, "frame never drained");
        handle.space(1 << 20);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Construction ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_invalid_config() {
    let (transport, _) = mock(true);
    let config = RelayConfig { chunk_size: 0, ..Default::default() };
    assert!(matches!(FrameRelay::new(transport, config), Err(RelayError::Config(_))));
}

#[tokio::test]
async fn submit_before_start_is_dropped() {
    let (transport, _) = mock(true);
    let relay = FrameRelay::new(transport, fast_config()).unwrap();

    assert!(!relay.submit_frame(&b"jpeg"[..]));
    let stats = relay.stats();
    assert!(!stats.is_running);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.busy_rejections, 0);
    assert_eq!(relay.state(), RelayState::Disconnected);
}

// ── Delivery ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn delivers_one_envelope_and_reopens_gate() {
    let (relay, handle) = connected(fast_config()).await;
    assert_eq!(relay.state(), RelayState::Connected);

    let frame = Frame::new(&b"\xff\xd8hello"[..])
        .with_timestamp(12.5)
        .with_orientation(Orientation::Right);
    assert!(relay.submit(frame));
    assert!(!relay.is_ready());

    drain(&relay, &handle, 0).await;
    wait_until("gate reopened", || relay.is_ready()).await;
    assert_eq!(relay.state(), RelayState::Streaming);

    let written = handle.written();
    let env = parse_envelope(&written).unwrap();
    assert_eq!(env.consumed, written.len());
    assert_eq!(env.payload, b"\xff\xd8hello");
    assert_eq!(env.header.content_type, "image/jpeg");
    assert_eq!(env.header.frame_index, 1);
    assert_eq!(env.header.timestamp, 12.5);
    assert_eq!(env.header.orientation, Orientation::Right);

    let stats = relay.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.frames_dropped, 0);
    assert!(stats.has_client);

    relay.stop().await;
}

#[tokio::test]
async fn consumer_replacement_discards_frame_in_flight() {
    let (relay, handle) = connected(fast_config()).await;
    assert!(relay.submit_frame(vec![7u8; 50_000]));
    handle.space(4_000);
    wait_until("partial write", || handle.writes().len() == 1).await;

    handle.open();
    wait_until("stale frame discarded", || relay.stats().frames_dropped == 1).await;
    wait_until("gate reopened", || relay.is_ready()).await;
    assert_eq!(relay.stats().frames_sent, 0);
    assert_eq!(relay.state(), RelayState::Connected);

    handle.clear_written();
    assert!(relay.submit_frame(&b"fresh"[..]));
    drain(&relay, &handle, 0).await;
    let written = handle.written();
    let env = parse_envelope(&written).unwrap();
    assert_eq!(env.payload, b"fresh");
    assert_eq!(env.header.frame_index, 2);
    assert_eq!(env.consumed, written.len(), "no bytes of the discarded frame may follow");

    relay.stop().await;
}

#[tokio::test]
async fn busy_relay_rejects_without_counting_a_drop() {
    let (relay, handle) = connected(fast_config()).await;

    assert!(relay.submit_frame(&b"first"[..]));
    assert!(!relay.submit_frame(&b"second"[..]));
    assert!(!relay.submit_frame(&b"third"[..]));

    let stats = relay.stats();
    assert_eq!(stats.busy_rejections, 2);
    assert_eq!(stats.frames_dropped, 0);

    drain(&relay, &handle, 0).await;
    let written = handle.written();
    let env = parse_envelope(&written).unwrap();
    assert_eq!(env.payload, b"first");
    assert_eq!(env.consumed, written.len(), "rejected frames must not be queued");

    relay.stop().await;
}

#[tokio::test]
async fn writes_in_bounded_chunks_and_resumes_partial_writes() {
    let (relay, handle) = connected(fast_config()).await;
    let payload: Vec<u8> = (0..25_000u32).map(|i| (i % 251) as u8).collect();
    assert!(relay.submit_frame(payload.clone()));

    // Transport accepts only part of the first chunk.
    handle.space(4_000);
    wait_until("partial write", || handle.writes().len() == 1).await;
    assert_eq!(relay.stats().frames_sent, 0);
    assert!(!relay.is_ready());

    for k in 2..=4 {
        handle.space(1 << 20);
        wait_until("next chunk", || handle.writes().len() == k).await;
    }
    wait_until("frame delivered", || relay.stats().frames_sent == 1).await;

    let written = handle.written();
    let writes = handle.writes();
    assert_eq!(&writes[..3], &[4_000, 10_240, 10_240]);
    assert_eq!(writes.iter().sum::<usize>(), written.len());
    assert!(writes.iter().all(|&n| n <= 10_240));

    let env = parse_envelope(&written).unwrap();
    assert_eq!(env.payload, &payload[..]);
    assert_eq!(env.header.content_length, payload.len());

    relay.stop().await;
}

#[tokio::test]
async fn indices_are_monotonic_and_skip_rejected_frames() {
    let (relay, handle) = connected(fast_config()).await;

    for n in 0..3u64 {
        assert!(relay.submit_frame(vec![n as u8; 8]));
        assert!(!relay.submit_frame(&b"rejected"[..]));
        drain(&relay, &handle, n).await;
        wait_until("gate reopened", || relay.is_ready()).await;
    }

    let written = handle.written();
    let mut rest = &written[..];
    let mut indices = Vec::new();
    while !rest.is_empty() {
        let env = parse_envelope(rest).unwrap();
        indices.push(env.header.frame_index);
        rest = &rest[env.consumed..];
    }
    assert_eq!(indices, [1, 2, 3]);
    assert_eq!(relay.stats().busy_rejections, 3);

    relay.stop().await;
}

// ── Failure and reconnection ──────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_mid_frame_discards_it_and_reconnects() {
    let (relay, handle) = connected(fast_config()).await;

    let mut states = relay.subscribe();
    assert!(relay.submit_frame(vec![7u8; 1_000]));
    handle.space(10);
    handle.fail(CloseReason::PeerClosed);

    within(states.wait_for(|s| *s == RelayState::Disconnected)).await.unwrap();
    wait_until("reconnected", || handle.connect_calls() == 2 && relay.is_ready()).await;
    let stats = relay.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_sent, 0);
    assert_eq!(stats.reconnect_attempts, 1);
    assert_eq!(relay.state(), RelayState::Connected);

    // The next frame starts a fresh envelope; indices continue.
    handle.clear_written();
    assert!(relay.submit_frame(&b"after"[..]));
    drain(&relay, &handle, 0).await;
    let written = handle.written();
    assert!(written.starts_with(b"--frame\r\n"));
    let env = parse_envelope(&written).unwrap();
    assert_eq!(env.header.frame_index, 2);
    assert_eq!(env.payload, b"after");

    relay.stop().await;
}

#[tokio::test]
async fn gives_up_after_exact_attempt_budget() {
    let (transport, handle) = mock(false);
    let relay = FrameRelay::new(transport, fast_config()).unwrap();
    relay.start(mock_target()).await.unwrap();

    wait_until("session gave up", || !relay.stats().is_running).await;
    // No further attempts after giving up.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = relay.stats();
    assert_eq!(handle.connect_calls(), 3);
    assert_eq!(stats.reconnect_attempts, 2);
    assert_eq!(stats.state, RelayState::Disconnected);
    assert!(stats.last_error.is_some());

    assert!(!relay.submit_frame(&b"late"[..]));
    assert_eq!(relay.stats().frames_dropped, 1);
}

#[tokio::test]
async fn waits_for_target_that_appears_late() {
    let (transport, handle) = mock(false);
    let config = RelayConfig { max_reconnect_attempts: 50, ..fast_config() };
    let relay = FrameRelay::new(transport, config).unwrap();
    let mut states = relay.subscribe();
    relay.start(mock_target()).await.unwrap();

    within(states.wait_for(|s| *s == RelayState::WaitingForConsumer))
        .await
        .unwrap();
    assert!(!relay.submit_frame(&b"early"[..]));

    handle.set_available(true);
    within(states.wait_for(|s| *s == RelayState::Connected)).await.unwrap();
    assert!(relay.is_ready());
    assert!(handle.connect_calls() >= 2);

    relay.stop().await;
}

#[tokio::test]
async fn success_refills_attempt_budget() {
    let config = RelayConfig { reconnect_delay_ms: 150, ..fast_config() };
    let (relay, handle) = connected(config).await;

    // Two failures, then the target returns: the budget of 3 is not exhausted.
    handle.set_available(false);
    handle.fail(CloseReason::PeerClosed);
    wait_until("two failed attempts", || handle.connect_calls() >= 3).await;
    handle.set_available(true);
    wait_until("reconnected", || relay.is_ready()).await;

    handle.set_available(false);
    handle.fail(CloseReason::PeerClosed);
    wait_until("two more failed attempts", || handle.connect_calls() >= 6).await;
    handle.set_available(true);
    wait_until("reconnected again", || relay.is_ready()).await;
    assert!(relay.stats().is_running);

    relay.stop().await;
}

#[tokio::test]
async fn lazy_mode_reconnects_on_next_frame() {
    let config = RelayConfig { auto_reconnect: false, ..fast_config() };
    let (relay, handle) = connected(config).await;

    handle.fail(CloseReason::PeerClosed);
    wait_until("disconnected", || relay.state() == RelayState::Disconnected).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.connect_calls(), 1, "must not reconnect on its own");
    assert!(relay.stats().is_running);

    // The triggering frame is dropped, but it wakes the session.
    assert!(!relay.submit_frame(&b"wake"[..]));
    wait_until("reconnected", || relay.is_ready()).await;
    assert_eq!(handle.connect_calls(), 2);
    assert_eq!(relay.stats().frames_dropped, 1);

    relay.stop().await;
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stop_is_idempotent() {
    let (relay, _handle) = connected(fast_config()).await;

    relay.stop().await;
    relay.stop().await;

    assert_eq!(relay.state(), RelayState::Disconnected);
    assert!(!relay.is_ready());
    assert!(!relay.stats().is_running);
    assert!(!relay.submit_frame(&b"x"[..]));
}

#[tokio::test]
async fn start_after_stop_reuses_transport() {
    let (relay, handle) = connected(fast_config()).await;
    relay.stop().await;
    assert_eq!(relay.state(), RelayState::Disconnected);

    relay.start(mock_target()).await.unwrap();
    wait_until("reattached", || relay.is_ready()).await;
    assert_eq!(handle.connect_calls(), 2);

    assert!(relay.submit_frame(&b"again"[..]));
    drain(&relay, &handle, 0).await;
    assert_eq!(parse_envelope(&handle.written()).unwrap().payload, b"again");

    relay.stop().await;
}

#[tokio::test]
async fn restart_resets_counters_and_index() {
    let (relay, handle) = connected(fast_config()).await;
    assert!(relay.submit_frame(&b"one"[..]));
    drain(&relay, &handle, 0).await;
    assert_eq!(relay.stats().frames_sent, 1);

    relay.start(mock_target()).await.unwrap();
    assert_eq!(relay.stats().frames_sent, 0);
    wait_until("reattached", || relay.is_ready()).await;

    handle.clear_written();
    assert!(relay.submit_frame(&b"two"[..]));
    drain(&relay, &handle, 0).await;
    let env_buf = handle.written();
    assert_eq!(parse_envelope(&env_buf).unwrap().header.frame_index, 1);
    assert_eq!(handle.connect_calls(), 2);

    relay.stop().await;
}

#[tokio::test]
async fn reset_client_zeroes_counters_and_reconnects() {
    let (relay, handle) = connected(fast_config()).await;
    assert!(relay.submit_frame(&b"one"[..]));
    assert!(!relay.submit_frame(&b"busy"[..]));
    drain(&relay, &handle, 0).await;

    relay.reset_client();
    let stats = relay.stats();
    assert_eq!(stats.frames_sent, 0);
    assert_eq!(stats.busy_rejections, 0);

    // A stream transport has no listener to keep, so the session redials.
    wait_until("redialled", || handle.connect_calls() == 2 && relay.is_ready()).await;
    assert!(relay.stats().is_running);

    relay.stop().await;
}

#[tokio::test]
async fn stats_report_target_and_status() {
    let (relay, _handle) = connected(fast_config()).await;
    let stats = relay.stats();
    assert_eq!(stats.target.as_deref(), Some("unix:/mock/rtc_SSFD"));
    assert_eq!(stats.status_line(), "Connected — Ready");
    relay.stop().await;
}
