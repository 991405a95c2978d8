//! Device seams between the session core and real audio hardware.
//!
//! The orchestrator never touches `cpal` directly.  It acquires devices
//! through an [`AudioDevices`] factory and holds them inside a
//! [`DeviceGuard`], which releases the hardware on every exit path (explicit
//! release, early return, or drop).
//!
//! ```text
//! AudioDevices::open_input  ──▶ DeviceGuard<dyn InputDevice>  ──▶ CapturePipeline
//! AudioDevices::open_output ──▶ DeviceGuard<dyn OutputDevice> ──▶ PlaybackScheduler
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::codec::AudioSegment;

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Which side of the audio path failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Microphone,
    Speaker,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Microphone => write!(f, "microphone"),
            DeviceKind::Speaker => write!(f, "audio output"),
        }
    }
}

/// A device could not be opened or started.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceError {
    /// Permission denied, no such device, or the platform rejected the
    /// stream configuration.
    #[error("{kind} unavailable: {reason}")]
    Unavailable { kind: DeviceKind, reason: String },
}

impl DeviceError {
    pub fn microphone(reason: impl Into<String>) -> Self {
        DeviceError::Unavailable {
            kind: DeviceKind::Microphone,
            reason: reason.into(),
        }
    }

    pub fn speaker(reason: impl Into<String>) -> Self {
        DeviceError::Unavailable {
            kind: DeviceKind::Speaker,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceError::Unavailable { kind, .. } => *kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Device traits
// ---------------------------------------------------------------------------

/// Channel on which an input device delivers mono `f32` sample blocks.
pub type SampleSender = mpsc::UnboundedSender<Vec<f32>>;

/// Identifier of one scheduled playback voice on an [`OutputDevice`].
pub type VoiceId = u64;

/// Anything holding a hardware handle that must be closed exactly once.
///
/// `release` must be idempotent.
pub trait Release {
    fn release(&mut self);
}

/// An opened microphone.
///
/// Opening acquires the hardware; `start` / `pause` only gate delivery so
/// the session can stop capture during a reconnect without giving the
/// device up.
pub trait InputDevice: Release + Send {
    /// Rate (Hz) of the samples sent to the [`SampleSender`].
    fn sample_rate(&self) -> u32;

    /// Begin delivering mono sample blocks to `tx`, replacing any previous
    /// sender.
    fn start(&mut self, tx: SampleSender) -> Result<(), DeviceError>;

    /// Stop delivering samples.  The device stays open.
    fn pause(&mut self);
}

/// An opened speaker with its own monotonic playback clock.
///
/// Mirrors the shape of a web audio context: segments are scheduled to
/// start at an absolute clock time, can be stopped individually, and report
/// when they have finished.
pub trait OutputDevice: Release + Send {
    /// Current output clock in seconds.  Never decreases.
    fn now(&self) -> f64;

    /// Queue `segment` to begin at clock time `start_at` (seconds).
    fn schedule(&mut self, segment: &AudioSegment, start_at: f64) -> VoiceId;

    /// Silence a scheduled or playing voice immediately.
    fn stop(&mut self, voice: VoiceId);

    /// `true` while `voice` is scheduled or still audible.
    fn is_playing(&self, voice: VoiceId) -> bool;
}

/// Factory for the session's microphone and speaker.
pub trait AudioDevices: Send + Sync {
    /// Open the microphone, delivering samples at `sample_rate` Hz.
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputDevice>, DeviceError>;

    /// Open the speaker for segments at `sample_rate` Hz.
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn OutputDevice>, DeviceError>;
}

// ---------------------------------------------------------------------------
// DeviceGuard
// ---------------------------------------------------------------------------

/// Scoped ownership of an opened device.
///
/// Dropping the guard releases the device; [`DeviceGuard::release`] does the
/// same eagerly.  Either way the underlying `release` runs once.
pub struct DeviceGuard<D: Release + ?Sized> {
    device: Box<D>,
    released: bool,
}

impl<D: Release + ?Sized> DeviceGuard<D> {
    pub fn new(device: Box<D>) -> Self {
        Self {
            device,
            released: false,
        }
    }

    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.device.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<D: Release + ?Sized> Deref for DeviceGuard<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D: Release + ?Sized> DerefMut for DeviceGuard<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: Release + ?Sized> Drop for DeviceGuard<D> {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
