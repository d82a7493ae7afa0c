#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::oneshot;

use sanctum::audio::codec::{self, SampleBuffer};
use sanctum::playback::{AudioBackend, AudioSink, PlaybackError};

/// Scripted stand-in for the host audio device. Decode can be delayed
/// through a queued gate or forced to fail, and every opened sink is
/// retained so tests can assert on its lifecycle afterwards.
#[derive(Clone, Default)]
pub struct TestBackend {
    state: Arc<BackendState>,
}

#[derive(Default)]
pub struct BackendState {
    decode_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    fail_next_decode: AtomicBool,
    sinks: Mutex<Vec<Arc<SinkState>>>,
}

#[derive(Default)]
pub struct SinkState {
    started: AtomicBool,
    stopped: AtomicBool,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<BackendState> {
        Arc::clone(&self.state)
    }
}

impl BackendState {
    /// The next decode call will suspend until the returned sender
    /// fires (or errors immediately if the sender is dropped first).
    pub fn gate_next_decode(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.decode_gates
            .lock()
            .unwrap()
            .push_back(rx);
        tx
    }

    pub fn fail_next_decode(&self) {
        self.fail_next_decode.store(true, Ordering::SeqCst);
    }

    pub fn sinks(&self) -> Vec<Arc<SinkState>> {
        self.sinks.lock().unwrap().clone()
    }

    pub fn sink(&self, index: usize) -> Arc<SinkState> {
        self.sinks.lock().unwrap()[index].clone()
    }
}

impl SinkState {
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Simulates the output draining naturally.
    pub fn finish(&self) {
        if let Some(tx) = self.done_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

pub struct TestSink {
    state: Arc<SinkState>,
}

impl AudioBackend for TestBackend {
    type Sink = TestSink;

    fn open(&self) -> Result<Self::Sink, PlaybackError> {
        let state = Arc::new(SinkState::default());
        self.state.sinks.lock().unwrap().push(Arc::clone(&state));
        Ok(TestSink { state })
    }

    fn decode(
        &self,
        wav: Vec<u8>,
    ) -> impl Future<Output = Result<SampleBuffer, PlaybackError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let gate = state.decode_gates.lock().unwrap().pop_front();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if state.fail_next_decode.swap(false, Ordering::SeqCst) {
                return Err(PlaybackError::Task("injected decode failure".into()));
            }
            codec::samples_from_wav(&wav).map_err(PlaybackError::Decode)
        }
    }
}

impl AudioSink for TestSink {
    fn start(&mut self, _track: SampleBuffer) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();
        *self.state.done_tx.lock().unwrap() = Some(done_tx);
        self.state.started.store(true, Ordering::SeqCst);
        Ok(done_rx)
    }

    fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        // Keep done_tx alive: a stopped sink never reports natural
        // end-of-stream, mirroring the real output thread.
    }
}

/// Base64 payload of `frames` mono 16-bit LE samples, all `value`.
pub fn pcm_payload(frames: usize, value: i16) -> String {
    let mut bytes = Vec::with_capacity(frames * 2);
    for _ in 0..frames {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// A valid mono 24 kHz WAV blob of `frames` silent samples.
pub fn silent_wav(frames: usize) -> Vec<u8> {
    let buf = SampleBuffer::from_channels(vec![vec![0.0; frames]], codec::SAMPLE_RATE);
    codec::encode_wav(&buf).unwrap()
}

/// Fresh empty directory under the system temp dir, unique per test.
pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sanctum-test-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Yields until `predicate` holds, so spawned tasks can make progress
/// under the paused test clock.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached after 1000 yields");
}
