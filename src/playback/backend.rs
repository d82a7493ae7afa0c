use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::audio::codec::{self, SampleBuffer};

use super::PlaybackError;

/// Seam between the playback state machine and the host audio device.
/// One backend is shared; each `open` yields a fresh output context.
pub trait AudioBackend: Send + Sync + 'static {
    type Sink: AudioSink;

    /// Acquire a fresh output context. May block for a bounded time
    /// while the device initializes; implementations must not wait on
    /// anything unbounded here.
    fn open(&self) -> Result<Self::Sink, PlaybackError>;

    /// Decode an encoded WAV blob into a playable track. This is the
    /// controller's suspension point; implementations must not block
    /// the runtime.
    fn decode(
        &self,
        wav: Vec<u8>,
    ) -> impl Future<Output = Result<SampleBuffer, PlaybackError>> + Send;
}

pub trait AudioSink: Send + 'static {
    /// Begin output. The returned receiver fires once on natural
    /// end-of-stream; it is dropped unfired if the sink is stopped.
    fn start(&mut self, track: SampleBuffer) -> Result<oneshot::Receiver<()>, PlaybackError>;

    /// Stop output and release the device. Idempotent.
    fn stop(&mut self);
}

/// Upper bound on device initialization inside `open`.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

enum SinkCommand {
    Start(SampleBuffer, oneshot::Sender<()>),
    Stop,
}

/// Default backend: one OS thread per output context, because rodio's
/// `OutputStream` is not `Send`. The thread owns the stream and sink
/// and exits (releasing the device) on stop or end-of-stream.
#[derive(Debug, Default)]
pub struct RodioBackend;

impl RodioBackend {
    pub fn new() -> Self {
        Self
    }
}

pub struct RodioSink {
    commands: mpsc::Sender<SinkCommand>,
}

impl AudioBackend for RodioBackend {
    type Sink = RodioSink;

    fn open(&self) -> Result<Self::Sink, PlaybackError> {
        let (commands, command_rx) = mpsc::channel::<SinkCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        thread::Builder::new()
            .name("sanctum-audio-out".into())
            .spawn(move || output_thread(command_rx, ready_tx))
            .map_err(|e| PlaybackError::Output(format!("could not spawn output thread: {e}")))?;

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(())) => Ok(RodioSink { commands }),
            Ok(Err(reason)) => Err(PlaybackError::Output(reason)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(PlaybackError::Output(
                "timed out waiting for the audio device".into(),
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(PlaybackError::Output(
                "output thread exited before reporting readiness".into(),
            )),
        }
    }

    fn decode(
        &self,
        wav: Vec<u8>,
    ) -> impl Future<Output = Result<SampleBuffer, PlaybackError>> + Send {
        async move {
            tokio::task::spawn_blocking(move || codec::samples_from_wav(&wav))
                .await
                .map_err(|e| PlaybackError::Task(e.to_string()))?
                .map_err(PlaybackError::Decode)
        }
    }
}

impl AudioSink for RodioSink {
    fn start(&mut self, track: SampleBuffer) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(SinkCommand::Start(track, done_tx))
            .map_err(|_| PlaybackError::Output("output thread is gone".into()))?;
        Ok(done_rx)
    }

    fn stop(&mut self) {
        // The thread may already have exited after end-of-stream.
        let _ = self.commands.send(SinkCommand::Stop);
    }
}

fn output_thread(commands: mpsc::Receiver<SinkCommand>, ready: mpsc::Sender<Result<(), String>>) {
    let (stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(format!("no default audio output: {e}")));
            return;
        }
    };
    let sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready.send(Err(format!("could not create audio sink: {e}")));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let done_tx = match commands.recv() {
        Ok(SinkCommand::Start(track, done_tx)) => {
            let source = SamplesBuffer::new(
                track.num_channels(),
                track.sample_rate(),
                track.interleaved(),
            );
            sink.append(source);
            done_tx
        }
        Ok(SinkCommand::Stop) | Err(_) => return,
    };

    // Poll for drain while staying responsive to a stop command.
    loop {
        match commands.recv_timeout(Duration::from_millis(25)) {
            Ok(SinkCommand::Stop) => {
                sink.stop();
                debug!("output stopped by request");
                break;
            }
            Ok(SinkCommand::Start(..)) => {
                warn!("ignoring second start on an output context");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if sink.empty() {
                    let _ = done_tx.send(());
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
        }
    }

    drop(stream);
}
