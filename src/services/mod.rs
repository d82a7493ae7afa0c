pub mod gemini;

use std::future::Future;

use thiserror::Error;

use crate::session::types::{Language, MeditationScript};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("generation response was missing {0}")]
    MissingField(&'static str),

    #[error("generated script was not valid JSON: {0}")]
    Schema(#[from] serde_json::Error),
}

/// The external generation collaborators, behind one seam so the
/// orchestrator can run against a scripted stand-in.
pub trait Generate: Send + Sync {
    fn script(
        &self,
        prompt: &str,
        language: Language,
        duration_minutes: u32,
    ) -> impl Future<Output = Result<MeditationScript, GenerationError>> + Send;

    /// Returns base64 JPEG bytes for one illustrative image.
    fn image(
        &self,
        visual_prompt: &str,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;

    /// Returns base64 raw PCM (24 kHz, mono, 16-bit) for one paragraph.
    fn speech(
        &self,
        paragraph: &str,
        language: Language,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;
}

/// Script length policy: shorter requests get fewer spoken segments.
pub fn segment_count_for_duration(minutes: u32) -> usize {
    if minutes <= 1 {
        3
    } else if minutes <= 3 {
        7
    } else {
        12
    }
}

pub use gemini::GeminiClient;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_count_policy() {
        assert_eq!(segment_count_for_duration(0), 3);
        assert_eq!(segment_count_for_duration(1), 3);
        assert_eq!(segment_count_for_duration(2), 7);
        assert_eq!(segment_count_for_duration(3), 7);
        assert_eq!(segment_count_for_duration(5), 12);
    }
}
