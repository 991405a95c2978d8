//! Gap-free, order-preserving playback of model speech.
//!
//! Audio chunks arrive from the network whenever the network delivers them,
//! which is never quite real time.  [`PlaybackScheduler`] keeps a watermark,
//! `next_start`, on the output device's own clock:
//!
//! ```text
//! start     = max(next_start, clock.now())
//! next_start = start + segment.duration
//! ```
//!
//! so each segment begins exactly where the previous one ends, or right away
//! if the queue has already drained.  A segment is never scheduled in the
//! past and never overlaps its predecessor.
//!
//! [`interrupt`](PlaybackScheduler::interrupt) implements barge-in: every
//! queued or playing voice is stopped and the watermark snaps back to now.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::audio::capture::rms;
use crate::audio::codec::{AudioSegment, CodecError};
use crate::audio::device::{DeviceGuard, OutputDevice, VoiceId};

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// A single inbound chunk could not be played.  Never fatal to the session.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    #[error("audio decode error: {0}")]
    Decode(#[from] CodecError),
}

// ---------------------------------------------------------------------------
// ScheduledSegment
// ---------------------------------------------------------------------------

/// Where a segment landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSegment {
    pub voice: VoiceId,
    /// Clock time (seconds) at which playback begins.
    pub start: f64,
    /// Clock time (seconds) at which playback ends.
    pub end: f64,
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Owns the speaker and queues segments back to back on its clock.
pub struct PlaybackScheduler {
    output: DeviceGuard<dyn OutputDevice>,
    /// Rate and channel count of inbound PCM chunks.
    sample_rate: u32,
    channels: u16,
    next_start: f64,
    live: BTreeSet<VoiceId>,
    last_level: f32,
}

impl PlaybackScheduler {
    /// Take ownership of an opened speaker.  The watermark starts at the
    /// device's current clock time.
    pub fn new(output: DeviceGuard<dyn OutputDevice>, sample_rate: u32, channels: u16) -> Self {
        let next_start = output.now();
        Self {
            output,
            sample_rate,
            channels: channels.max(1),
            next_start,
            live: BTreeSet::new(),
            last_level: 0.0,
        }
    }

    /// Decode a base64 PCM chunk from the wire and schedule it.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::Decode`] when the chunk is malformed.  Nothing is
    /// scheduled and the watermark is untouched, so later chunks still play.
    pub fn enqueue_base64(&mut self, data: &str) -> Result<ScheduledSegment, PlaybackError> {
        let segment = AudioSegment::from_base64(data, self.sample_rate, self.channels)?;
        Ok(self.enqueue(segment))
    }

    /// Schedule an already decoded segment right after the previous one.
    pub fn enqueue(&mut self, segment: AudioSegment) -> ScheduledSegment {
        self.prune_finished();

        let start = self.next_start.max(self.output.now());
        let end = start + segment.duration_secs();
        let voice = self.output.schedule(&segment, start);

        self.next_start = end;
        self.live.insert(voice);
        self.last_level = rms(&segment.samples);

        log::debug!(
            "playback: voice {voice} scheduled {start:.3}s → {end:.3}s ({} live)",
            self.live.len()
        );
        ScheduledSegment { voice, start, end }
    }

    /// Stop every queued or playing voice and reset the watermark to now.
    pub fn interrupt(&mut self) {
        let stopped = self.live.len();
        for voice in std::mem::take(&mut self.live) {
            self.output.stop(voice);
        }
        self.next_start = self.output.now();
        self.last_level = 0.0;
        if stopped > 0 {
            log::debug!("playback: interrupted, {stopped} voice(s) discarded");
        }
    }

    /// Clock time at which the next segment is allowed to start.
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Voices that are still scheduled or audible.
    pub fn live_voices(&self) -> usize {
        self.live
            .iter()
            .filter(|&&voice| self.output.is_playing(voice))
            .count()
    }

    /// RMS level of the most recently scheduled segment, `0.0` after an
    /// interrupt.
    pub fn output_level(&self) -> f32 {
        self.last_level
    }

    /// Stop playback and close the speaker.  Idempotent.
    pub fn release(&mut self) {
        if self.output.is_released() {
            return;
        }
        self.interrupt();
        self.output.release();
    }

    pub fn is_released(&self) -> bool {
        self.output.is_released()
    }

    /// Drop voices whose playback has ended.
    fn prune_finished(&mut self) {
        let output = &self.output;
        self.live.retain(|&voice| output.is_playing(voice));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{encode_base64, encode_pcm16};
    use crate::audio::device::Release;
    use std::sync::{Arc, Mutex};

    /// Speaker with a hand-driven clock.
    #[derive(Default)]
    struct Clocked {
        now: f64,
        next_id: VoiceId,
        /// (id, start, end, stopped)
        voices: Vec<(VoiceId, f64, f64, bool)>,
        released: bool,
    }

    struct FakeSpeaker(Arc<Mutex<Clocked>>);

    impl Release for FakeSpeaker {
        fn release(&mut self) {
            self.0.lock().unwrap().released = true;
        }
    }

    impl OutputDevice for FakeSpeaker {
        fn now(&self) -> f64 {
            self.0.lock().unwrap().now
        }
        fn schedule(&mut self, segment: &AudioSegment, start_at: f64) -> VoiceId {
            let mut s = self.0.lock().unwrap();
            s.next_id += 1;
            let id = s.next_id;
            s.voices
                .push((id, start_at, start_at + segment.duration_secs(), false));
            id
        }
        fn stop(&mut self, voice: VoiceId) {
            let mut s = self.0.lock().unwrap();
            if let Some(v) = s.voices.iter_mut().find(|v| v.0 == voice) {
                v.3 = true;
            }
        }
        fn is_playing(&self, voice: VoiceId) -> bool {
            let s = self.0.lock().unwrap();
            s.voices
                .iter()
                .any(|v| v.0 == voice && !v.3 && v.2 > s.now)
        }
    }

    fn scheduler(now: f64) -> (PlaybackScheduler, Arc<Mutex<Clocked>>) {
        let clock = Arc::new(Mutex::new(Clocked {
            now,
            ..Default::default()
        }));
        let device: Box<dyn OutputDevice> = Box::new(FakeSpeaker(Arc::clone(&clock)));
        (PlaybackScheduler::new(DeviceGuard::new(device), 24_000, 1), clock)
    }

    fn segment(secs: f64) -> AudioSegment {
        AudioSegment {
            samples: vec![0.1; (secs * 24_000.0) as usize],
            sample_rate: 24_000,
        }
    }

    fn advance(clock: &Arc<Mutex<Clocked>>, to: f64) {
        clock.lock().unwrap().now = to;
    }

    // ---- watermark ---------------------------------------------------------

    #[test]
    fn simultaneous_arrivals_play_back_to_back() {
        let (mut sched, _clock) = scheduler(1.0);
        let a = sched.enqueue(segment(0.5));
        let b = sched.enqueue(segment(0.25));
        let c = sched.enqueue(segment(0.5));

        assert_eq!(a.start, 1.0);
        assert_eq!(b.start, a.end);
        assert_eq!(c.start, b.end);
        assert!((sched.next_start() - 2.25).abs() < 1e-9);
    }

    #[test]
    fn never_starts_in_the_past() {
        let (mut sched, clock) = scheduler(0.0);
        let a = sched.enqueue(segment(0.5));
        // Network stalls; the queue drains and the clock moves on.
        advance(&clock, 3.0);
        let b = sched.enqueue(segment(0.5));
        assert!(b.start >= a.end);
        assert_eq!(b.start, 3.0);
    }

    #[test]
    fn jittered_arrivals_never_overlap() {
        let (mut sched, clock) = scheduler(0.0);
        let arrivals = [0.0, 0.01, 0.02, 0.9, 0.91, 2.5, 2.5, 2.6];
        let mut previous: Option<ScheduledSegment> = None;
        for (i, &t) in arrivals.iter().enumerate() {
            advance(&clock, t);
            let s = sched.enqueue(segment(0.2 + i as f64 * 0.05));
            assert!(s.start >= t, "segment {i} scheduled in the past");
            if let Some(p) = previous {
                assert!(s.start >= p.end, "segment {i} overlaps its predecessor");
            }
            previous = Some(s);
        }
    }

    // ---- interrupt ---------------------------------------------------------

    #[test]
    fn interrupt_stops_live_voices_and_resets_watermark() {
        let (mut sched, clock) = scheduler(0.0);
        sched.enqueue(segment(1.0));
        sched.enqueue(segment(1.0));
        sched.enqueue(segment(1.0));
        assert_eq!(sched.live_voices(), 3);

        advance(&clock, 0.4);
        sched.interrupt();

        assert_eq!(sched.live_voices(), 0);
        assert!(clock.lock().unwrap().voices.iter().all(|v| v.3));
        assert_eq!(sched.next_start(), 0.4);

        let next = sched.enqueue(segment(0.5));
        assert_eq!(next.start, 0.4, "post-interrupt segment must start now");
    }

    #[test]
    fn finished_voices_are_pruned() {
        let (mut sched, clock) = scheduler(0.0);
        sched.enqueue(segment(0.5));
        advance(&clock, 1.0);
        sched.enqueue(segment(0.5));
        assert_eq!(sched.live.len(), 1);
    }

    // ---- decode failures ---------------------------------------------------

    #[test]
    fn corrupt_chunk_is_skipped_without_moving_watermark() {
        let (mut sched, _clock) = scheduler(0.0);
        sched.enqueue(segment(0.5));
        let before = sched.next_start();

        assert!(matches!(
            sched.enqueue_base64("%%%not-base64%%%"),
            Err(PlaybackError::Decode(_))
        ));
        // Odd byte count: valid base64, invalid PCM16.
        assert!(sched.enqueue_base64(&encode_base64(&[1, 2, 3])).is_err());
        assert_eq!(sched.next_start(), before);

        let ok = sched
            .enqueue_base64(&encode_base64(&encode_pcm16(&[0.2; 2400])))
            .unwrap();
        assert_eq!(ok.start, before);
        assert!((ok.end - before - 0.1).abs() < 1e-9);
    }

    #[test]
    fn output_level_tracks_last_segment() {
        let (mut sched, _clock) = scheduler(0.0);
        sched.enqueue(segment(0.1));
        assert!((sched.output_level() - 0.1).abs() < 1e-4);
        sched.interrupt();
        assert_eq!(sched.output_level(), 0.0);
    }

    // ---- release -----------------------------------------------------------

    #[test]
    fn release_stops_voices_and_closes_device_once() {
        let (mut sched, clock) = scheduler(0.0);
        sched.enqueue(segment(1.0));
        sched.release();
        sched.release();
        let c = clock.lock().unwrap();
        assert!(c.released);
        assert!(c.voices.iter().all(|v| v.3));
    }
}
