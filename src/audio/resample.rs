//! Channel mixing and sample-rate conversion.
//!
//! Hardware rarely runs at the rates the live endpoint speaks (16 kHz in,
//! 24 kHz out), so both device paths convert:
//!
//! 1. [`downmix`]: average interleaved channels down to mono (capture).
//! 2. [`StreamResampler`]: continuous rate conversion of the capture
//!    stream, one instance per microphone.
//! 3. [`resample`]: linear-interpolation rate conversion of a whole
//!    segment (playback).
//! 4. [`upmix`]: copy a mono signal onto every output channel (playback).
//!
//! Capture arrives in small callback buffers whose lengths rarely divide
//! evenly by the rate ratio, so it goes through a stateful resampler that
//! carries leftover input and filter history from one buffer to the next.
//! Playback segments are converted whole, where linear interpolation is
//! plenty for speech.

use rubato::{FastFixedIn, PolynomialDegree, ResamplerConstructionError, Resampler};

// ---------------------------------------------------------------------------
// downmix
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// ```rust
/// use live_coach::audio::resample::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate each mono sample across `channels` interleaved channels.
pub fn upmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => samples
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(n as usize))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` Hz to `target_rate` Hz using
/// linear interpolation.
///
/// * Equal rates return a copy (no interpolation performed).
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// ```rust
/// use live_coach::audio::resample::resample;
///
/// let hi = vec![0.5_f32; 480];
/// let lo = resample(&hi, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Input frames handed to rubato per call.
pub const STREAM_CHUNK: usize = 1024;

/// Converts an unbounded mono stream from one rate to another.
///
/// Samples are buffered until rubato has a full chunk, so output lags the
/// input by at most one chunk but never drifts: the total output length
/// tracks `input * target / source` however the input was split.
pub struct StreamResampler {
    /// `None` when the rates match and samples pass straight through.
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        chunk: usize,
    ) -> Result<Self, ResamplerConstructionError> {
        let inner = if source_rate == target_rate {
            None
        } else {
            let ratio = target_rate as f64 / source_rate as f64;
            Some(FastFixedIn::<f32>::new(
                ratio,
                1.1,
                PolynomialDegree::Cubic,
                chunk,
                1,
            )?)
        };
        Ok(Self {
            inner,
            pending: Vec::with_capacity(chunk * 2),
        })
    }

    /// Feed `samples`; returns whatever output the completed chunks produced
    /// (possibly nothing).
    pub fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            match resampler.process(&[&self.pending[..needed]], None) {
                Ok(mut frames) => out.append(&mut frames[0]),
                Err(e) => log::warn!("capture: resampling failed, dropping a chunk: {e}"),
            }
            self.pending.drain(..needed);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
