mod common;

use std::sync::Arc;
use std::time::Duration;

use sanctum::playback::{PlaybackController, PlaybackError, PlaybackState};

use common::TestBackend;

#[tokio::test(start_paused = true)]
async fn natural_completion_reports_zero_and_releases_the_output() {
    let backend = TestBackend::new();
    let state = backend.state();
    let controller = PlaybackController::new(backend);

    // One second of audio at 24 kHz.
    let mut handle = controller.play(common::silent_wav(24_000)).await.unwrap();
    assert_eq!(handle.state(), PlaybackState::Playing);
    assert!((handle.total_duration() - 1.0).abs() < 1e-9);

    // The remaining-time signal must never tick upward.
    let mut last = handle.remaining_secs();
    for _ in 0..12 {
        tokio::time::advance(Duration::from_millis(100)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let now = handle.remaining_secs();
        assert!(now <= last, "remaining went up: {last} -> {now}");
        last = now;
    }
    assert_eq!(handle.remaining_secs(), 0.0);
    assert_eq!(handle.state(), PlaybackState::Playing, "still draining");

    state.sink(0).finish();
    assert_eq!(handle.finished().await, PlaybackState::Completed);
    assert_eq!(handle.remaining_secs(), 0.0);
    assert!(state.sink(0).stopped());
}

#[tokio::test(start_paused = true)]
async fn a_newer_play_supersedes_one_still_decoding() {
    let backend = TestBackend::new();
    let state = backend.state();
    let controller = Arc::new(PlaybackController::new(backend));

    let gate = state.gate_next_decode();
    let first_controller = Arc::clone(&controller);
    let wav = common::silent_wav(2_400);
    let first = tokio::spawn(async move { first_controller.play(wav).await });

    // The first play has opened its output and is parked in decode.
    common::wait_until(|| state.sinks().len() == 1).await;

    let second = controller.play(common::silent_wav(2_400)).await.unwrap();
    assert_eq!(second.state(), PlaybackState::Playing);

    // Release the stale decode; its continuation must notice it lost.
    let _ = gate.send(());
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.state(), PlaybackState::Superseded);
    assert_eq!(first.total_duration(), 0.0);
    assert_eq!(first.remaining_secs(), 0.0);

    let sinks = state.sinks();
    assert_eq!(sinks.len(), 2);
    assert!(!sinks[0].started(), "superseded session must never start");
    assert!(sinks[0].stopped());
    assert!(sinks[1].started());
    assert!(!sinks[1].stopped());
}

#[tokio::test(start_paused = true)]
async fn sequential_plays_stop_the_prior_output() {
    let backend = TestBackend::new();
    let state = backend.state();
    let controller = PlaybackController::new(backend);

    let mut first = controller.play(common::silent_wav(2_400)).await.unwrap();
    let second = controller.play(common::silent_wav(2_400)).await.unwrap();

    assert_eq!(first.finished().await, PlaybackState::Superseded);
    assert!(state.sink(0).started());
    assert!(state.sink(0).stopped());
    assert_eq!(second.state(), PlaybackState::Playing);
    assert!(!state.sink(1).stopped());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_tears_down_the_current_session() {
    let backend = TestBackend::new();
    let state = backend.state();
    let controller = PlaybackController::new(backend);

    let mut handle = controller.play(common::silent_wav(2_400)).await.unwrap();
    controller.stop();
    controller.stop();

    assert_eq!(handle.finished().await, PlaybackState::Superseded);
    assert!(state.sink(0).stopped());

    // Stopping with nothing playing is also fine.
    controller.stop();
}

#[tokio::test(start_paused = true)]
async fn decode_failure_releases_the_output_and_allows_a_retry() {
    let backend = TestBackend::new();
    let state = backend.state();
    let controller = PlaybackController::new(backend);

    state.fail_next_decode();
    let err = controller.play(common::silent_wav(2_400)).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Task(_)));
    assert!(!state.sink(0).started());
    assert!(state.sink(0).stopped());

    let handle = controller.play(common::silent_wav(2_400)).await.unwrap();
    assert_eq!(handle.state(), PlaybackState::Playing);
    assert!(state.sink(1).started());
}

#[tokio::test(start_paused = true)]
async fn malformed_wav_is_a_decode_error() {
    let backend = TestBackend::new();
    let controller = PlaybackController::new(backend);

    let err = controller.play(b"not a wav".to_vec()).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Decode(_)));
}
