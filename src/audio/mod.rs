//! Audio path: microphone capture, PCM framing, and scheduled playback.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → InputDevice → CapturePipeline (4096-sample blocks, RMS)
//!           → AudioFrame (PCM16 LE, audio/pcm;rate=16000) → transport
//!
//! transport → base64 PCM16 @ 24 kHz → AudioSegment
//!           → PlaybackScheduler (next_start watermark) → OutputDevice → speaker
//! ```
//!
//! Hardware access goes through the [`device`] traits so the session core
//! can be driven by in-memory fakes; [`cpal_backend`] provides the real
//! implementations.

pub mod capture;
pub mod codec;
pub mod cpal_backend;
pub mod device;
pub mod playback;
pub mod resample;

pub use capture::{rms, BlockFramer, CapturePipeline};
pub use codec::{AudioFrame, AudioSegment, CodecError};
pub use cpal_backend::{CpalDevices, MicrophoneInput, SpeakerOutput};
pub use device::{
    AudioDevices, DeviceError, DeviceGuard, DeviceKind, InputDevice, OutputDevice, Release,
    SampleSender, VoiceId,
};
pub use playback::{PlaybackError, PlaybackScheduler, ScheduledSegment};
