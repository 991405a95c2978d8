//! Microphone and speaker on top of `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on a
//! dedicated OS thread that builds it, reports success or failure back over
//! a channel, and then parks until the owning handle is released.  The
//! handles themselves ([`MicrophoneInput`], [`SpeakerOutput`]) are `Send`
//! and can sit inside the async session.
//!
//! ```text
//!            ┌─────────────── mic thread ────────────────────┐
//! hardware ──▶ cpal callback → downmix → StreamResampler ──▶ SampleSender (if started)
//!            └───────────────────────────────────────────────┘
//!
//!            ┌──────────── speaker thread ─────────┐
//! Mixer ◀── schedule/stop ── SpeakerOutput         │
//!   └──▶ cpal callback renders due voices ──▶ hardware
//!            └─────────────────────────────────────┘
//! ```

use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::codec::AudioSegment;
use crate::audio::device::{
    AudioDevices, DeviceError, InputDevice, OutputDevice, Release, SampleSender, VoiceId,
};
use crate::audio::resample::{downmix, resample, upmix, StreamResampler, STREAM_CHUNK};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// StreamThread
// ---------------------------------------------------------------------------

/// Owns the OS thread that keeps a cpal stream alive.
struct StreamThread {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `name`, build the stream with `build`, and wait for the result.
    fn spawn<F>(name: &str, build: F) -> Result<Self, String>
    where
        F: FnOnce() -> Result<cpal::Stream, String> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || match build() {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Parks until the handle is released (or dropped).
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| format!("failed to spawn {name} thread: {e}"))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown: Some(shutdown_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(format!("{name} thread exited before the stream started")),
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ---------------------------------------------------------------------------
// MicrophoneInput
// ---------------------------------------------------------------------------

/// The default input device, delivering mono blocks at a fixed rate.
pub struct MicrophoneInput {
    sink: Arc<Mutex<Option<SampleSender>>>,
    sample_rate: u32,
    stream: StreamThread,
}

impl MicrophoneInput {
    /// Open the system default microphone, converting to `target_rate` Hz.
    ///
    /// # Errors
    ///
    /// [`DeviceError`] when there is no input device, the OS denies access,
    /// or the device's preferred configuration cannot be streamed.
    pub fn open(target_rate: u32) -> Result<Self, DeviceError> {
        let sink: Arc<Mutex<Option<SampleSender>>> = Arc::new(Mutex::new(None));
        let callback_sink = Arc::clone(&sink);

        let stream = StreamThread::spawn("mic-capture", move || {
            build_input_stream(callback_sink, target_rate)
        })
        .map_err(DeviceError::microphone)?;

        log::info!("capture: microphone opened");
        Ok(Self {
            sink,
            sample_rate: target_rate,
            stream,
        })
    }
}

fn build_input_stream(
    sink: Arc<Mutex<Option<SampleSender>>>,
    target_rate: u32,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "no input device found on the default audio host".to_string())?;

    let supported = device
        .default_input_config()
        .map_err(|e| format!("failed to query default input config: {e}"))?;

    let channels = supported.channels();
    let native_rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    // One resampler for the life of the stream, so buffer edges line up.
    let mut resampler = StreamResampler::new(native_rate, target_rate, STREAM_CHUNK)
        .map_err(|e| format!("cannot convert {native_rate} Hz to {target_rate} Hz: {e}"))?;
    let mut deliver = move |mono_native: Vec<f32>| {
        let converted = resampler.push(&mono_native);
        if converted.is_empty() {
            return;
        }
        let guard = lock(&sink);
        if let Some(tx) = guard.as_ref() {
            // Receiver gone means the pipeline stopped; nothing to do.
            let _ = tx.send(converted);
        }
    };

    let err_fn = |err: cpal::StreamError| log::error!("capture: cpal stream error: {err}");

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(downmix(data, channels)),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32_768.0).collect();
                deliver(downmix(&floats, channels))
            },
            err_fn,
            None,
        ),
        other => return Err(format!("unsupported input sample format {other:?}")),
    }
    .map_err(|e| format!("failed to build input stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("failed to start input stream: {e}"))?;

    log::debug!("capture: cpal input {native_rate} Hz, {channels} ch → {target_rate} Hz mono");
    Ok(stream)
}

impl Release for MicrophoneInput {
    fn release(&mut self) {
        lock(&self.sink).take();
        self.stream.stop();
        log::info!("capture: microphone released");
    }
}

impl InputDevice for MicrophoneInput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, tx: SampleSender) -> Result<(), DeviceError> {
        if self.stream.thread.is_none() {
            return Err(DeviceError::microphone("device already released"));
        }
        *lock(&self.sink) = Some(tx);
        Ok(())
    }

    fn pause(&mut self) {
        lock(&self.sink).take();
    }
}

impl Drop for MicrophoneInput {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Shared between the speaker handle and the cpal render callback.
struct Mixer {
    device_rate: u32,
    frames_played: u64,
    next_id: VoiceId,
    voices: Vec<Voice>,
}

impl Mixer {
    fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            frames_played: 0,
            next_id: 0,
            voices: Vec::new(),
        }
    }

    fn now(&self) -> f64 {
        self.frames_played as f64 / self.device_rate as f64
    }

    /// Render `frames` mono frames starting at the current clock, then
    /// advance the clock and drop finished voices.
    fn render(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0_f32; frames];
        let from = self.frames_played;
        let to = from + frames as u64;

        for voice in &self.voices {
            let start = voice.start_frame.max(from);
            let end = voice.end_frame().min(to);
            for t in start..end {
                out[(t - from) as usize] += voice.samples[(t - voice.start_frame) as usize];
            }
        }

        self.frames_played = to;
        self.voices.retain(|v| v.end_frame() > to);
        for s in &mut out {
            *s = s.clamp(-1.0, 1.0);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// SpeakerOutput
// ---------------------------------------------------------------------------

/// The default output device with a frame-accurate playback clock.
pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    stream: StreamThread,
}

impl SpeakerOutput {
    /// Open the system default speaker.
    pub fn open() -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device_rate = host
            .default_output_device()
            .ok_or_else(|| DeviceError::speaker("no output device found"))?
            .default_output_config()
            .map_err(|e| DeviceError::speaker(format!("failed to query output config: {e}")))?
            .sample_rate()
            .0;

        let mixer = Arc::new(Mutex::new(Mixer::new(device_rate)));
        let callback_mixer = Arc::clone(&mixer);

        let stream = StreamThread::spawn("speaker-playback", move || {
            build_output_stream(callback_mixer)
        })
        .map_err(DeviceError::speaker)?;

        log::info!("playback: speaker opened ({device_rate} Hz)");
        Ok(Self { mixer, stream })
    }
}

fn build_output_stream(mixer: Arc<Mutex<Mixer>>) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no output device found".to_string())?;
    let supported = device
        .default_output_config()
        .map_err(|e| format!("failed to query output config: {e}"))?;

    let channels = supported.channels();
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let frames_of = move |len: usize| len / channels.max(1) as usize;

    let err_fn = |err: cpal::StreamError| log::error!("playback: cpal stream error: {err}");

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mono = lock(&mixer).render(frames_of(data.len()));
                data.fill(0.0);
                for (dst, src) in data.iter_mut().zip(upmix(&mono, channels)) {
                    *dst = src;
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mono = lock(&mixer).render(frames_of(data.len()));
                for (dst, src) in data.iter_mut().zip(upmix(&mono, channels)) {
                    *dst = (src * 32_767.0) as i16;
                }
            },
            err_fn,
            None,
        ),
        other => return Err(format!("unsupported output sample format {other:?}")),
    }
    .map_err(|e| format!("failed to build output stream: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("failed to start output stream: {e}"))?;
    Ok(stream)
}

impl Release for SpeakerOutput {
    fn release(&mut self) {
        lock(&self.mixer).voices.clear();
        self.stream.stop();
        log::info!("playback: speaker released");
    }
}

impl OutputDevice for SpeakerOutput {
    fn now(&self) -> f64 {
        lock(&self.mixer).now()
    }

    fn schedule(&mut self, segment: &AudioSegment, start_at: f64) -> VoiceId {
        let mut mixer = lock(&self.mixer);
        let samples = resample(&segment.samples, segment.sample_rate, mixer.device_rate);
        let start_frame = (start_at * mixer.device_rate as f64).round().max(0.0) as u64;
        mixer.next_id += 1;
        let id = mixer.next_id;
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        id
    }

    fn stop(&mut self, voice: VoiceId) {
        lock(&self.mixer).voices.retain(|v| v.id != voice);
    }

    fn is_playing(&self, voice: VoiceId) -> bool {
        lock(&self.mixer).voices.iter().any(|v| v.id == voice)
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

// ---------------------------------------------------------------------------
// CpalDevices
// ---------------------------------------------------------------------------

/// [`AudioDevices`] backed by the system default host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalDevices;

impl AudioDevices for CpalDevices {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputDevice>, DeviceError> {
        Ok(Box::new(MicrophoneInput::open(sample_rate)?))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn OutputDevice>, DeviceError> {
        // Segments carry their own rate; the mixer converts per voice.
        Ok(Box::new(SpeakerOutput::open()?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
