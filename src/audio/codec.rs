//! PCM framing between `f32` samples and the wire's 16-bit little-endian
//! representation.
//!
//! The live endpoint exchanges raw signed 16-bit PCM wrapped in base64 inside
//! JSON messages:
//!
//! ```text
//! f32 [-1,1] ──encode──▶ i16 LE bytes ──base64──▶ "AAD/fw…"   (outbound)
//! "AAD/fw…"  ──base64──▶ i16 LE bytes ──decode──▶ f32 [-1,1]  (inbound)
//! ```
//!
//! Everything here is pure and stateless.
//!
//! # Example
//!
//! ```rust
//! use live_coach::audio::codec::{decode_pcm16, encode_pcm16};
//!
//! let bytes = encode_pcm16(&[0.0, 0.5, -0.5]);
//! assert_eq!(bytes.len(), 6);
//!
//! let samples = decode_pcm16(&bytes, 1).unwrap();
//! assert!((samples[1] - 0.5).abs() <= 1.0 / 32_768.0);
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::audio::resample::downmix;

/// Scale factor between `f32` samples and signed 16-bit PCM.
pub const PCM16_SCALE: f32 = 32_768.0;

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Contract violations at the codec boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CodecError {
    /// Byte length is not a whole number of frames, the channel count is
    /// zero, or the text-safe (base64) wrapping is corrupt.
    #[error("malformed audio data: {0}")]
    MalformedAudioData(String),
}

// ---------------------------------------------------------------------------
// Raw PCM
// ---------------------------------------------------------------------------

/// Encode `samples` as signed 16-bit little-endian PCM.
///
/// Each sample is scaled by 32768 and truncated toward zero.  Values at or
/// beyond full scale saturate at `i16::MAX` / `i16::MIN`.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s * PCM16_SCALE) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode signed 16-bit little-endian PCM into interleaved `f32` samples.
///
/// # Errors
///
/// [`CodecError::MalformedAudioData`] when `channels == 0` or when
/// `bytes.len()` is not a multiple of `2 * channels`.
pub fn decode_pcm16(bytes: &[u8], channels: u16) -> Result<Vec<f32>, CodecError> {
    if channels == 0 {
        return Err(CodecError::MalformedAudioData(
            "channel count must be non-zero".into(),
        ));
    }
    let frame_bytes = 2 * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedAudioData(format!(
            "{} bytes is not a multiple of {frame_bytes} ({channels} channel(s) of 16-bit PCM)",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

// ---------------------------------------------------------------------------
// Text-safe wrapping
// ---------------------------------------------------------------------------

/// Wrap raw bytes for embedding in a JSON message.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Unwrap a base64 payload received inside a JSON message.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(text.trim())
        .map_err(|e| CodecError::MalformedAudioData(format!("invalid base64: {e}")))
}

// ---------------------------------------------------------------------------
// AudioFrame (outbound)
// ---------------------------------------------------------------------------

/// One encoded block of microphone audio, ready to be sent.
///
/// Immutable once built; the transport consumes it and drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pcm: Vec<u8>,
    sample_rate: u32,
    mime_type: String,
}

impl AudioFrame {
    /// Encode a mono block captured at `sample_rate` Hz.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            pcm: encode_pcm16(samples),
            sample_rate,
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    /// Raw 16-bit little-endian PCM bytes.
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// MIME-style descriptor, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of mono samples in this frame.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Base64 form used by the JSON wire protocol.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.pcm)
    }
}

/// MIME descriptor for raw 16-bit PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

// ---------------------------------------------------------------------------
// AudioSegment (inbound)
// ---------------------------------------------------------------------------

/// A decoded block of model speech waiting to be played.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
}

impl AudioSegment {
    /// Decode raw PCM16 bytes.  Multi-channel input is downmixed to mono.
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        let interleaved = decode_pcm16(bytes, channels)?;
        Ok(Self {
            samples: downmix(&interleaved, channels),
            sample_rate,
        })
    }

    /// Decode a base64 payload straight off the wire.
    pub fn from_base64(data: &str, sample_rate: u32, channels: u16) -> Result<Self, CodecError> {
        Self::from_pcm16(&decode_base64(data)?, sample_rate, channels)
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
