//! Capture pipeline: microphone → fixed-size blocks → RMS + PCM frame.
//!
//! [`CapturePipeline`] owns the opened microphone.  Devices deliver samples
//! in whatever buffer sizes the platform chooses; the pipeline re-blocks
//! them into exact `block_size` chunks (4096 samples at 16 kHz, ~256 ms),
//! measures the RMS volume of each block and hands `(AudioFrame, volume)`
//! to the registered consumer in capture order.
//!
//! ```text
//! InputDevice ──Vec<f32>──▶ BlockFramer ──[f32; block]──▶ rms + AudioFrame ──▶ consumer
//! ```
//!
//! `stop` pauses the device but keeps it open; only [`CapturePipeline::release`]
//! (or dropping the pipeline) gives the hardware back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::codec::AudioFrame;
use crate::audio::device::{DeviceError, DeviceGuard, InputDevice};

// ---------------------------------------------------------------------------
// rms
// ---------------------------------------------------------------------------

/// Root-mean-square amplitude of `samples`; `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// BlockFramer
// ---------------------------------------------------------------------------

/// Re-blocks an arbitrary stream of samples into fixed-size blocks.
///
/// Leftover samples are carried over to the next [`push`](Self::push).
pub struct BlockFramer {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockFramer {
    /// # Panics
    ///
    /// Panics if `block_size == 0`.
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "BlockFramer block size must be > 0");
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append `samples` and return every block that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let full = self.pending.len() / self.block_size;
        if full == 0 {
            return Vec::new();
        }
        let tail = self.pending.split_off(full * self.block_size);
        let blocks = self
            .pending
            .chunks_exact(self.block_size)
            .map(<[f32]>::to_vec)
            .collect();
        self.pending = tail;
        blocks
    }

    /// Samples waiting for the next block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Streams encoded microphone blocks to a consumer callback.
pub struct CapturePipeline {
    device: DeviceGuard<dyn InputDevice>,
    block_size: usize,
    /// Cleared by `stop` so a block already being framed is not delivered.
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Take ownership of an opened microphone.
    pub fn new(device: DeviceGuard<dyn InputDevice>, block_size: usize) -> Self {
        Self {
            device,
            block_size: block_size.max(1),
            active: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Start delivering `(frame, volume)` pairs to `consumer`.
    ///
    /// Restarting an already running pipeline stops the previous run first,
    /// so at most one consumer ever receives blocks.  Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the device's [`DeviceError`] when it refuses to start (e.g.
    /// the OS revoked microphone permission).
    pub fn start<F>(&mut self, mut consumer: F) -> Result<(), DeviceError>
    where
        F: FnMut(AudioFrame, f32) + Send + 'static,
    {
        self.stop();

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<f32>>();
        self.device.start(tx)?;

        let active = Arc::new(AtomicBool::new(true));
        self.active = Arc::clone(&active);

        let sample_rate = self.device.sample_rate();
        let mut framer = BlockFramer::new(self.block_size);

        self.task = Some(tokio::spawn(async move {
            while let Some(samples) = rx.recv().await {
                for block in framer.push(&samples) {
                    if !active.load(Ordering::SeqCst) {
                        return;
                    }
                    let volume = rms(&block);
                    consumer(AudioFrame::from_samples(&block, sample_rate), volume);
                }
            }
            log::debug!("capture: sample channel closed");
        }));

        log::debug!(
            "capture: started ({} Hz, {}-sample blocks)",
            sample_rate,
            self.block_size
        );
        Ok(())
    }

    /// Stop delivering blocks.  Idempotent; the microphone stays open.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
            self.device.pause();
            log::debug!("capture: stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some() && self.active.load(Ordering::SeqCst)
    }

    /// Stop and close the microphone.  Idempotent.
    pub fn release(&mut self) {
        self.stop();
        self.device.release();
    }

    pub fn is_released(&self) -> bool {
        self.device.is_released()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
