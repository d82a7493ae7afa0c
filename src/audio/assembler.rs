use thiserror::Error;
use tracing::debug;

use super::codec::{self, CodecError, SampleBuffer};

#[derive(Debug, Error)]
#[error("segment {segment} could not be decoded: {source}")]
pub struct AssemblyError {
    /// Zero-based index of the segment that failed.
    pub segment: usize,
    #[source]
    pub source: CodecError,
}

/// Concatenates independently generated speech segments into one track.
///
/// Every payload is base64 raw PCM at the given rate/channel count.
/// Segment order is the narrative order and is preserved exactly; the
/// whole assembly is atomic: if any segment fails to decode, no
/// buffer is produced.
pub fn assemble(
    payloads: &[impl AsRef<str>],
    sample_rate: u32,
    num_channels: u16,
) -> Result<SampleBuffer, AssemblyError> {
    // Decode everything up front so a bad segment cannot leave a
    // truncated track behind.
    let mut segments = Vec::with_capacity(payloads.len());
    for (index, payload) in payloads.iter().enumerate() {
        let bytes = codec::decode_base64(payload.as_ref()).map_err(|source| AssemblyError {
            segment: index,
            source,
        })?;
        let buffer =
            codec::samples_from_pcm(&bytes, sample_rate, num_channels).map_err(|source| {
                AssemblyError {
                    segment: index,
                    source,
                }
            })?;
        segments.push(buffer);
    }

    let total_frames: usize = segments.iter().map(SampleBuffer::frames).sum();
    let mut channels = vec![Vec::with_capacity(total_frames); num_channels as usize];
    for segment in &segments {
        for (ch, out) in channels.iter_mut().enumerate() {
            out.extend_from_slice(segment.channel(ch));
        }
    }

    debug!(
        segments = segments.len(),
        frames = total_frames,
        "assembled narration track"
    );
    Ok(SampleBuffer::from_channels(channels, sample_rate))
}
