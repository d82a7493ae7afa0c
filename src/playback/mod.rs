//! Single-current-session audio playback.
//!
//! The controller owns a one-slot registry of the "current" output.
//! Every `play` call bumps a generation counter; any continuation that
//! resumes after an await re-checks its generation against the slot, so
//! two overlapping decode chains can never both produce sound.

pub mod backend;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::codec::CodecError;

pub use backend::{AudioBackend, AudioSink, RodioBackend};

/// How often the remaining-time signal refreshes, roughly one display frame.
const TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    Output(String),

    #[error("could not decode audio for playback: {0}")]
    Decode(#[from] CodecError),

    #[error("playback task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Decoding,
    Playing,
    Completed,
    Superseded,
    Errored,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlaybackState::Completed | PlaybackState::Superseded | PlaybackState::Errored
        )
    }
}

struct Active<S> {
    sink: S,
    token: CancellationToken,
}

struct Slot<S> {
    generation: u64,
    session: Option<Active<S>>,
}

/// Observer handle for one play request. Dropping it does not stop
/// playback; only a newer `play`, `stop`, or natural completion does.
#[derive(Debug)]
pub struct PlaybackHandle {
    state: watch::Receiver<PlaybackState>,
    remaining: watch::Receiver<f64>,
    total_duration: f64,
}

impl PlaybackHandle {
    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn remaining_secs(&self) -> f64 {
        *self.remaining.borrow()
    }

    /// Total track duration in seconds; 0.0 if the session was
    /// superseded before its decode finished.
    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn remaining_watch(&self) -> watch::Receiver<f64> {
        self.remaining.clone()
    }

    /// Waits for the session to reach a terminal state.
    pub async fn finished(&mut self) -> PlaybackState {
        loop {
            let state = *self.state.borrow();
            if state.is_terminal() {
                return state;
            }
            if self.state.changed().await.is_err() {
                return *self.state.borrow();
            }
        }
    }
}

pub struct PlaybackController<B: AudioBackend> {
    backend: B,
    slot: Arc<Mutex<Slot<B::Sink>>>,
}

impl<B: AudioBackend> PlaybackController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slot: Arc::new(Mutex::new(Slot {
                generation: 0,
                session: None,
            })),
        }
    }

    /// Plays an encoded WAV blob, superseding any current session.
    ///
    /// The prior session's source is stopped and its output released
    /// before this one proceeds, even if it is still mid-decode; its
    /// own continuation notices the generation change and aborts.
    pub async fn play(&self, wav: Vec<u8>) -> Result<PlaybackHandle, PlaybackError> {
        let token = CancellationToken::new();
        let generation = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            if let Some(mut prev) = slot.session.take() {
                debug!("superseding current playback session");
                prev.token.cancel();
                prev.sink.stop();
            }
            slot.generation
        };

        // Open the output and register it as current before decoding,
        // so a later play can tear it down mid-decode.
        let mut sink = self.backend.open()?;
        {
            let mut slot = lock(&self.slot);
            if slot.generation != generation {
                sink.stop();
                return Ok(superseded_handle());
            }
            slot.session = Some(Active {
                sink,
                token: token.clone(),
            });
        }

        let track = match self.backend.decode(wav).await {
            Ok(track) => track,
            Err(e) => {
                // Release our context unless someone else already did.
                let mut slot = lock(&self.slot);
                if slot.generation == generation {
                    if let Some(mut active) = slot.session.take() {
                        active.sink.stop();
                    }
                }
                return Err(e);
            }
        };

        let total = track.duration_secs();

        // Identity guard: a newer play may have won while we decoded.
        let done = {
            let mut slot = lock(&self.slot);
            if slot.generation != generation {
                debug!("decode finished for a superseded session, aborting");
                return Ok(superseded_handle());
            }
            let active = match slot.session.as_mut() {
                Some(active) => active,
                None => return Ok(superseded_handle()),
            };
            match active.sink.start(track) {
                Ok(done) => done,
                Err(e) => {
                    if let Some(mut active) = slot.session.take() {
                        active.sink.stop();
                    }
                    return Err(e);
                }
            }
        };

        info!(duration_secs = total, "playback started");

        let (state_tx, state_rx) = watch::channel(PlaybackState::Playing);
        let (remaining_tx, remaining_rx) = watch::channel(total);
        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            drive_session(slot, generation, token, done, total, state_tx, remaining_tx).await;
        });

        Ok(PlaybackHandle {
            state: state_rx,
            remaining: remaining_rx,
            total_duration: total,
        })
    }

    /// Stops and releases the current session, if any. Idempotent.
    pub fn stop(&self) {
        let mut slot = lock(&self.slot);
        // Invalidate any play() still awaiting its decode.
        slot.generation += 1;
        if let Some(mut active) = slot.session.take() {
            active.token.cancel();
            active.sink.stop();
        }
    }
}

/// Drives the remaining-time ticker and the terminal transition for one
/// started session.
async fn drive_session<S: AudioSink>(
    slot: Arc<Mutex<Slot<S>>>,
    generation: u64,
    token: CancellationToken,
    mut done: tokio::sync::oneshot::Receiver<()>,
    total: f64,
    state_tx: watch::Sender<PlaybackState>,
    remaining_tx: watch::Sender<f64>,
) {
    let started = Instant::now();
    let mut interval = time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticking = true;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                state_tx.send_replace(PlaybackState::Superseded);
                // The superseder already stopped the sink.
                return;
            }
            result = &mut done => {
                match result {
                    Ok(()) => {
                        remaining_tx.send_replace(0.0);
                        state_tx.send_replace(PlaybackState::Completed);
                        let mut slot = lock(&slot);
                        if slot.generation == generation {
                            if let Some(mut active) = slot.session.take() {
                                active.sink.stop();
                            }
                        }
                        debug!("playback completed");
                    }
                    Err(_) => {
                        // Sink torn down underneath us without a stop
                        // going through the controller.
                        warn!("output ended without end-of-stream signal");
                        state_tx.send_replace(PlaybackState::Superseded);
                    }
                }
                return;
            }
            _ = interval.tick(), if ticking => {
                let elapsed = started.elapsed().as_secs_f64();
                let remaining = (total - elapsed).max(0.0);
                // Guard against interval jitter: never tick upward.
                let clamped = remaining.min(*remaining_tx.borrow());
                remaining_tx.send_replace(clamped);
                if clamped <= 0.0 {
                    // Clamp at zero and wait for end-of-stream.
                    ticking = false;
                }
            }
        }
    }
}

fn superseded_handle() -> PlaybackHandle {
    let (_state_tx, state) = watch::channel(PlaybackState::Superseded);
    let (_remaining_tx, remaining) = watch::channel(0.0);
    PlaybackHandle {
        state,
        remaining,
        total_duration: 0.0,
    }
}

fn lock<S>(slot: &Arc<Mutex<Slot<S>>>) -> MutexGuard<'_, Slot<S>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
