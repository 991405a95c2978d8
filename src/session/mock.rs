//! In-memory test doubles for driving a [`SessionOrchestrator`] without
//! hardware or network.
//!
//! [`SessionOrchestrator`]: crate::session::SessionOrchestrator

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::audio::codec::AudioSegment;
use crate::audio::device::{
    AudioDevices, DeviceError, InputDevice, OutputDevice, Release, SampleSender, VoiceId,
};
use crate::auth::{AuthError, AuthorizationProvider};
use crate::session::error::{ErrorKind, SessionError};
use crate::session::events::SessionEvents;
use crate::session::transcript::TurnRecord;
use crate::transport::{
    Connection, ConnectionPeer, Outbound, ServerEvent, Speaker, TransportConfig,
    TransportConnector, TransportError,
};

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MicState {
    pub tx: Option<SampleSender>,
    pub starts: u32,
    pub pauses: u32,
    pub released: bool,
}

#[derive(Default)]
pub struct SpeakerState {
    pub now: f64,
    pub next_id: VoiceId,
    /// (id, start, end, stopped)
    pub voices: Vec<(VoiceId, f64, f64, bool)>,
    pub released: bool,
}

/// Microphones currently held open, and the most ever held at once.
#[derive(Default)]
pub struct OpenMics {
    current: AtomicU32,
    peak: AtomicU32,
}

impl OpenMics {
    fn opened(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockMic {
    state: Arc<Mutex<MicState>>,
    open: Arc<OpenMics>,
    release_delay: Duration,
}

impl Release for MockMic {
    fn release(&mut self) {
        if self.state.lock().unwrap().released {
            return;
        }
        // Closing a real device can take a while.
        std::thread::sleep(self.release_delay);
        let mut s = self.state.lock().unwrap();
        s.tx = None;
        s.released = true;
        self.open.closed();
    }
}

impl InputDevice for MockMic {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(&mut self, tx: SampleSender) -> Result<(), DeviceError> {
        let mut s = self.state.lock().unwrap();
        s.tx = Some(tx);
        s.starts += 1;
        Ok(())
    }

    fn pause(&mut self) {
        let mut s = self.state.lock().unwrap();
        s.tx = None;
        s.pauses += 1;
    }
}

struct MockSpeaker(Arc<Mutex<SpeakerState>>);

impl Release for MockSpeaker {
    fn release(&mut self) {
        self.0.lock().unwrap().released = true;
    }
}

impl OutputDevice for MockSpeaker {
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

/// Hands out a fresh mock microphone and speaker per session.
#[derive(Default)]
pub struct MockDevices {
    pub deny_microphone: AtomicBool,
    pub input_opens: AtomicU32,
    open_delay_ms: AtomicU64,
    release_delay_ms: AtomicU64,
    open_mics: Arc<OpenMics>,
    mic: Mutex<Option<Arc<Mutex<MicState>>>>,
    speaker: Mutex<Option<Arc<Mutex<SpeakerState>>>>,
}

impl MockDevices {
    pub fn denying_microphone() -> Self {
        let devices = Self::default();
        devices.deny_microphone.store(true, Ordering::SeqCst);
        devices
    }

    /// Every microphone open blocks the calling thread for `delay`.
    pub fn slow_open(delay: Duration) -> Self {
        let devices = Self::default();
        devices
            .open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        devices
    }

    /// Every microphone release blocks for `delay`.
    pub fn slow_release(delay: Duration) -> Self {
        let devices = Self::default();
        devices
            .release_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        devices
    }

    /// Most microphones that were ever open at the same time.
    pub fn peak_open_mics(&self) -> u32 {
        self.open_mics.peak.load(Ordering::SeqCst)
    }

    /// State of the most recently opened microphone.
    pub fn mic(&self) -> Arc<Mutex<MicState>> {
        self.mic.lock().unwrap().clone().expect("no microphone opened")
    }

    /// State of the most recently opened speaker.
    pub fn speaker(&self) -> Arc<Mutex<SpeakerState>> {
        self.speaker
            .lock()
            .unwrap()
            .clone()
            .expect("no speaker opened")
    }

    /// Push captured samples as if the microphone produced them.
    pub fn feed(&self, samples: &[f32]) {
        let mic = self.mic();
        let s = mic.lock().unwrap();
        if let Some(tx) = &s.tx {
            let _ = tx.send(samples.to_vec());
        }
    }

    pub fn mic_released(&self) -> bool {
        self.mic().lock().unwrap().released
    }

    pub fn speaker_released(&self) -> bool {
        self.speaker().lock().unwrap().released
    }
}

impl AudioDevices for MockDevices {
    fn open_input(&self, _sample_rate: u32) -> Result<Box<dyn InputDevice>, DeviceError> {
        self.input_opens.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(
            self.open_delay_ms.load(Ordering::SeqCst),
        ));
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(DeviceError::microphone("NotAllowedError: permission denied"));
        }
        let state = Arc::new(Mutex::new(MicState::default()));
        *self.mic.lock().unwrap() = Some(Arc::clone(&state));
        self.open_mics.opened();
        Ok(Box::new(MockMic {
            state,
            open: Arc::clone(&self.open_mics),
            release_delay: Duration::from_millis(self.release_delay_ms.load(Ordering::SeqCst)),
        }))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn OutputDevice>, DeviceError> {
        let state = Arc::new(Mutex::new(SpeakerState::default()));
        *self.speaker.lock().unwrap() = Some(Arc::clone(&state));
        Ok(Box::new(MockSpeaker(state)))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Plays back a script of open outcomes; once exhausted every open uses
/// `fallback`.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    fallback: Result<(), TransportError>,
    peers: Mutex<Vec<ConnectionPeer>>,
    opens: Mutex<Vec<Instant>>,
    configs: Mutex<Vec<TransportConfig>>,
}

impl ScriptedConnector {
    pub fn new(
        script: Vec<Result<(), TransportError>>,
        fallback: Result<(), TransportError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            peers: Mutex::new(Vec::new()),
            opens: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
        }
    }

    /// Every open succeeds.
    pub fn always_ok() -> Self {
        Self::new(Vec::new(), Ok(()))
    }

    /// Every open fails with a retryable error.
    pub fn always_failing() -> Self {
        Self::new(
            Vec::new(),
            Err(TransportError::ConnectionSetup("connection refused".into())),
        )
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Clock times of every open attempt.
    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    pub fn last_config(&self) -> Option<TransportConfig> {
        self.configs.lock().unwrap().last().cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Deliver `event` on connection `index` (0-based, successful opens only).
    pub fn push(&self, index: usize, event: ServerEvent) {
        let peers = self.peers.lock().unwrap();
        let _ = peers[index].events.send(event);
    }

    /// Everything the session sent on connection `index` so far.
    pub fn drain(&self, index: usize) -> Vec<Outbound> {
        let mut peers = self.peers.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(msg) = peers[index].outbound.try_recv() {
            out.push(msg);
        }
        out
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn open(
        &self,
        config: &TransportConfig,
        _credential: &str,
    ) -> Result<Connection, TransportError> {
        self.opens.lock().unwrap().push(Instant::now());
        self.configs.lock().unwrap().push(config.clone());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        outcome?;
        let (conn, peer) = Connection::pair();
        self.peers.lock().unwrap().push(peer);
        Ok(conn)
    }
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

pub struct FakeAuth {
    valid: AtomicBool,
    grant: bool,
    pub requests: AtomicU32,
    pub rejections: AtomicU32,
}

impl FakeAuth {
    pub fn valid() -> Self {
        Self {
            valid: AtomicBool::new(true),
            grant: true,
            requests: AtomicU32::new(0),
            rejections: AtomicU32::new(0),
        }
    }

    /// No credential yet; `request_credential` succeeds when `grant`.
    pub fn missing(grant: bool) -> Self {
        Self {
            valid: AtomicBool::new(false),
            grant,
            ..Self::valid()
        }
    }
}

#[async_trait]
impl AuthorizationProvider for FakeAuth {
    async fn has_valid_credential(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    async fn request_credential(&self) -> Result<(), AuthError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.grant {
            self.valid.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(AuthError::Cancelled)
        }
    }

    fn credential(&self) -> Option<String> {
        self.valid
            .load(Ordering::SeqCst)
            .then(|| "test-key".to_string())
    }

    fn credential_rejected(&self) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Open,
    Audio,
    Transcription(Speaker, String),
    TurnComplete(Option<String>),
    Error(ErrorKind),
    Reconnecting(u32),
    TimeLimit,
}

/// Records every callback in order.
#[derive(Default)]
pub struct RecordingEvents {
    log: Mutex<Vec<Recorded>>,
}

impl RecordingEvents {
    pub fn all(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    /// Callbacks other than the high-rate volume updates.
    pub fn significant(&self) -> Vec<Recorded> {
        self.all()
            .into_iter()
            .filter(|r| *r != Recorded::Audio)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Recorded) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|r| pred(r)).count()
    }

    pub fn errors(&self) -> Vec<ErrorKind> {
        self.all()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Error(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    fn record(&self, r: Recorded) {
        self.log.lock().unwrap().push(r);
    }
}

impl SessionEvents for RecordingEvents {
    fn on_open(&self) {
        self.record(Recorded::Open);
    }

    fn on_audio_data(&self, _volume: f32) {
        self.record(Recorded::Audio);
    }

    fn on_transcription(&self, speaker: Speaker, delta: &str) {
        self.record(Recorded::Transcription(speaker, delta.to_string()));
    }

    fn on_turn_complete(&self, turn: Option<&TurnRecord>) {
        self.record(Recorded::TurnComplete(turn.map(|t| t.text.clone())));
    }

    fn on_error(&self, error: &SessionError) {
        self.record(Recorded::Error(error.kind()));
    }

    fn on_reconnecting(&self, attempt: u32) {
        self.record(Recorded::Reconnecting(attempt));
    }

    fn on_time_limit(&self) {
        self.record(Recorded::TimeLimit);
    }
}
