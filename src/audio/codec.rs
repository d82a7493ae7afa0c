use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Fixed output rate of the speech generator; everything downstream
/// (assembly, container, playback) runs at this rate.
pub const SAMPLE_RATE: u32 = 24_000;
pub const NUM_CHANNELS: u16 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM byte length {len} is not a multiple of {align} (16-bit x {channels} channel(s))")]
    MisalignedPcm {
        len: usize,
        align: usize,
        channels: u16,
    },

    #[error("WAV container rejected: {0}")]
    Container(#[from] hound::Error),

    #[error("unsupported WAV format: {0}")]
    UnsupportedFormat(String),
}

/// Normalized audio: per-channel f32 samples in [-1.0, 1.0] tagged with
/// a sample rate. Channel lengths are always equal.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty());
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn num_channels(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Frame-major interleaving, the layout both WAV data and rodio expect.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * self.channels.len());
        for frame in 0..frames {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }
}

/// Base64 → raw bytes. Propagates the underlying decoder error.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(payload)?)
}

/// Interprets `bytes` as interleaved little-endian signed 16-bit PCM and
/// de-interleaves into normalized per-channel buffers.
pub fn samples_from_pcm(
    bytes: &[u8],
    sample_rate: u32,
    num_channels: u16,
) -> Result<SampleBuffer, CodecError> {
    if num_channels == 0 {
        return Err(CodecError::UnsupportedFormat("zero channels".into()));
    }
    let align = 2 * num_channels as usize;
    if bytes.len() % align != 0 {
        return Err(CodecError::MisalignedPcm {
            len: bytes.len(),
            align,
            channels: num_channels,
        });
    }

    let frames = bytes.len() / align;
    let mut channels = vec![Vec::with_capacity(frames); num_channels as usize];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % num_channels as usize].push(sample as f32 / 32768.0);
    }

    Ok(SampleBuffer::from_channels(channels, sample_rate))
}

/// Quantizes one normalized sample to i16. Negative values scale by
/// 32768 and non-negative by 32767 so +1.0 cannot overflow; decode
/// divides by 32768, so this convention must not change.
fn quantize(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Packages a normalized buffer as a self-contained WAV blob: canonical
/// 44-byte RIFF/WAVE header followed by interleaved 16-bit LE PCM.
pub fn encode_wav(buffer: &SampleBuffer) -> Result<Vec<u8>, CodecError> {
    let spec = hound::WavSpec {
        channels: buffer.num_channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let estimated = 44 + buffer.frames() * buffer.num_channels() as usize * 2;
    let mut cursor = Cursor::new(Vec::with_capacity(estimated));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in buffer.interleaved() {
            writer.write_sample(quantize(sample))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Decodes a WAV blob produced by [`encode_wav`] (or any 16-bit integer
/// PCM WAV) back into a normalized buffer.
pub fn samples_from_wav(bytes: &[u8]) -> Result<SampleBuffer, CodecError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(CodecError::UnsupportedFormat(format!(
            "{}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels == 0 {
        return Err(CodecError::UnsupportedFormat("zero channels".into()));
    }

    let num_channels = spec.channels as usize;
    let mut channels = vec![Vec::new(); num_channels];
    for (i, sample) in reader.samples::<i16>().enumerate() {
        channels[i % num_channels].push(sample? as f32 / 32768.0);
    }

    // A trailing partial frame would mean a corrupt data chunk.
    if channels
        .windows(2)
        .any(|w| w[0].len() != w[1].len())
    {
        return Err(CodecError::UnsupportedFormat(
            "truncated final frame".into(),
        ));
    }

    Ok(SampleBuffer::from_channels(channels, spec.sample_rate))
}
