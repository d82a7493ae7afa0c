//! Sequences one full session: script → image → per-segment speech →
//! assembly → container encode → best-effort persistence → playback.

pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::{assembler, codec, AssemblyError, CodecError};
use crate::history::{HistoryError, HistoryItem, HistoryStore};
use crate::playback::{AudioBackend, PlaybackController, PlaybackError, PlaybackHandle};
use crate::services::{Generate, GenerationError};

pub use types::{
    format_time, Language, MeditationScript, MeditationSegment, SessionRequest, Stage,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("history item {0} not found")]
    NotFound(u64),
}

/// Why a finished session could not be cached. Never fatal: the session
/// still plays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageNotice {
    Disabled { reason: String },
    QuotaExceeded,
    SaveFailed(String),
}

impl std::fmt::Display for StorageNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageNotice::Disabled { reason } => {
                write!(f, "Session history is unavailable on this device ({reason}).")
            }
            StorageNotice::QuotaExceeded => f.write_str(
                "Could not save this session to history: it is too large for this \
                 device's storage. Try a shorter duration.",
            ),
            StorageNotice::SaveFailed(e) => {
                write!(f, "Failed to save this session to history: {e}")
            }
        }
    }
}

#[derive(Debug)]
pub struct CompletedSession {
    pub id: u64,
    pub script: MeditationScript,
    /// `data:image/jpeg;base64,…` URL, exactly as persisted.
    pub image_url: String,
    pub wav: Vec<u8>,
    pub playback: PlaybackHandle,
    pub storage_notice: Option<StorageNotice>,
}

pub struct SessionRunner<G, B: AudioBackend> {
    generator: G,
    playback: PlaybackController<B>,
    history: HistoryStore,
    history_limit: usize,
}

impl<G: Generate, B: AudioBackend> SessionRunner<G, B> {
    pub fn new(
        generator: G,
        playback: PlaybackController<B>,
        history: HistoryStore,
        history_limit: usize,
    ) -> Self {
        Self {
            generator,
            playback,
            history,
            history_limit,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn playback(&self) -> &PlaybackController<B> {
        &self.playback
    }

    /// Runs one full session attempt. Stage labels are emitted
    /// best-effort on `progress` before each stage starts. Generation
    /// and assembly failures abort the attempt with nothing persisted;
    /// persistence failures downgrade to a [`StorageNotice`].
    pub async fn run(
        &self,
        request: &SessionRequest,
        progress: &mpsc::Sender<Stage>,
    ) -> Result<CompletedSession, SessionError> {
        let _ = progress.try_send(Stage::CraftingScript);
        let script = self
            .generator
            .script(&request.prompt, request.language, request.duration_minutes)
            .await?;
        info!(title = %script.title, segments = script.segments.len(), "script ready");

        let _ = progress.try_send(Stage::RenderingVisual);
        let image_b64 = self.generator.image(&script.main_visual_prompt).await?;
        let image_url = format!("data:image/jpeg;base64,{image_b64}");

        // Strictly sequential, in narrative order: segment N's audio
        // must land directly after segment N-1's.
        let total = script.segments.len();
        let mut payloads = Vec::with_capacity(total);
        for (index, segment) in script.segments.iter().enumerate() {
            let _ = progress.try_send(Stage::SynthesizingVoice {
                segment: index + 1,
                total,
            });
            payloads.push(
                self.generator
                    .speech(&segment.paragraph, request.language)
                    .await?,
            );
        }

        let _ = progress.try_send(Stage::Assembling);
        let track = assembler::assemble(&payloads, codec::SAMPLE_RATE, codec::NUM_CHANNELS)?;
        let wav = codec::encode_wav(&track)?;
        info!(
            duration_secs = track.duration_secs(),
            wav_bytes = wav.len(),
            "narration assembled"
        );

        let id = self.next_id();
        let _ = progress.try_send(Stage::Saving);
        let storage_notice = self.persist(HistoryItem {
            id,
            script: script.clone(),
            image_url: image_url.clone(),
            audio_wav_base64: STANDARD.encode(&wav),
        });

        let _ = progress.try_send(Stage::Starting);
        let playback = self.playback.play(wav.clone()).await?;

        Ok(CompletedSession {
            id,
            script,
            image_url,
            wav,
            playback,
            storage_notice,
        })
    }

    /// Replays a cached session without regeneration.
    pub async fn replay(&self, id: u64) -> Result<(HistoryItem, PlaybackHandle), SessionError> {
        let item = self.history.get(id).ok_or(SessionError::NotFound(id))?;
        let wav = codec::decode_base64(&item.audio_wav_base64)?;
        let handle = self.playback.play(wav).await?;
        Ok((item, handle))
    }

    /// Ids are creation timestamps; nudge forward if two sessions land
    /// in the same millisecond so the key stays strictly increasing.
    fn next_id(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        match self.history.latest_id() {
            Some(latest) if now <= latest => latest + 1,
            _ => now,
        }
    }

    fn persist(&self, item: HistoryItem) -> Option<StorageNotice> {
        if let Some(reason) = self.history.unavailable_reason() {
            return Some(StorageNotice::Disabled {
                reason: reason.to_string(),
            });
        }

        match self.history.insert(&item) {
            Ok(()) => {
                if let Err(e) = self.history.evict_excess(self.history_limit) {
                    warn!("history eviction failed: {e}");
                }
                None
            }
            Err(HistoryError::QuotaExceeded) => {
                warn!("history insert hit the storage quota");
                Some(StorageNotice::QuotaExceeded)
            }
            Err(e) => {
                warn!("history insert failed: {e}");
                Some(StorageNotice::SaveFailed(e.to_string()))
            }
        }
    }
}
