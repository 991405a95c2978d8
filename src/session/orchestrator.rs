//! Session orchestrator: drives one live conversation end to end.
//!
//! [`SessionOrchestrator`] owns the microphone, the speaker and the
//! transport connection of at most one session at a time, and turns the
//! transport's [`ServerEvent`] stream into host callbacks.
//!
//! # Session flow
//!
//! ```text
//! connect(instruction)
//!   ├─ reject if a session is active                         [AlreadyActive]
//!   ├─ authorization check (request credential if missing)   [Connecting]
//!   ├─ open microphone + speaker  ── denied ──▶ on_error, Closed
//!   ├─ open transport (backoff between attempts)             [Reconnecting]
//!   └─ start capture, on_open, opening message, spawn driver [Open]
//!
//! driver
//!   ├─ PartialTranscript → transcript buffer + on_transcription
//!   ├─ AudioChunk        → PlaybackScheduler (bad chunks skipped)
//!   ├─ TurnComplete      → TurnRecord + on_turn_complete
//!   ├─ Interrupted       → PlaybackScheduler::interrupt
//!   ├─ Closed / Error    → stop capture, reopen with backoff  [Reconnecting]
//!   │                      exhausted / auth failure ──▶ on_error, Closed
//!   └─ time limit        → wrap-up message, then on_time_limit, Closed
//!
//! disconnect()
//!   └─ cancel token → stop capture → release speaker → close transport
//!      → release microphone → abort driver                   [Closed]
//! ```
//!
//! Every continuation holds the session's [`SessionToken`] and every host
//! callback goes through [`SessionToken::emit`], so nothing fires once
//! `disconnect()` has returned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use crate::audio::{
    AudioDevices, AudioFrame, CapturePipeline, DeviceError, DeviceGuard, PlaybackScheduler,
};
use crate::auth::AuthorizationProvider;
use crate::config::AppConfig;
use crate::session::backoff::ReconnectPolicy;
use crate::session::cancel::SessionToken;
use crate::session::error::SessionError;
use crate::session::events::SessionEvents;
use crate::session::state::SessionState;
use crate::session::transcript::{TranscriptBuffer, TurnRecord};
use crate::transport::{
    Connection, ServerEvent, TransportConfig, TransportConnector, TransportSender,
};

type EventStream = mpsc::UnboundedReceiver<ServerEvent>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ActiveSession
// ---------------------------------------------------------------------------

/// Resources owned by the live session.  Filled in as `connect` progresses.
struct ActiveSession {
    token: SessionToken,
    capture: Option<CapturePipeline>,
    playback: Option<PlaybackScheduler>,
    sender: Option<TransportSender>,
    driver: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn new(token: SessionToken) -> Self {
        Self {
            token,
            capture: None,
            playback: None,
            sender: None,
            driver: None,
        }
    }

    /// Unwind in order: capture, playback, transport, microphone, driver.
    fn shutdown(mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        if let Some(playback) = self.playback.as_mut() {
            playback.release();
        }
        if let Some(sender) = self.sender.take() {
            sender.close();
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.release();
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

struct Core {
    state: SessionState,
    session: Option<ActiveSession>,
    transcript: TranscriptBuffer,
    turns: Vec<TurnRecord>,
}

impl Core {
    /// The active session, if it is the one `token` belongs to.
    fn current(&mut self, token: &SessionToken) -> Option<&mut ActiveSession> {
        self.session.as_mut().filter(|s| s.token.same(token))
    }
}

// ---------------------------------------------------------------------------
// SessionOrchestrator
// ---------------------------------------------------------------------------

struct Inner {
    config: AppConfig,
    policy: ReconnectPolicy,
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn TransportConnector>,
    auth: Arc<dyn AuthorizationProvider>,
    events: Arc<dyn SessionEvents>,
    core: Mutex<Core>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        config: AppConfig,
        devices: Arc<dyn AudioDevices>,
        connector: Arc<dyn TransportConnector>,
        auth: Arc<dyn AuthorizationProvider>,
        events: Arc<dyn SessionEvents>,
    ) -> Self {
        let policy = ReconnectPolicy::from_config(&config.reconnect);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                devices,
                connector,
                auth,
                events,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    session: None,
                    transcript: TranscriptBuffer::new(),
                    turns: Vec::new(),
                }),
            }),
        }
    }

    /// Start a session with `system_instruction` as the persona.
    ///
    /// Resolves once audio is streaming.  Failures other than
    /// [`SessionError::AlreadyActive`] and [`SessionError::Cancelled`] are
    /// also reported once through `on_error`.
    pub async fn connect(&self, system_instruction: &str) -> Result<(), SessionError> {
        let token = {
            let mut core = lock(&self.inner.core);
            if core.state.is_active() {
                log::warn!(
                    "session: connect rejected, session is {}",
                    core.state.label()
                );
                return Err(SessionError::AlreadyActive);
            }
            let token = SessionToken::new();
            core.state = SessionState::Connecting;
            core.session = Some(ActiveSession::new(token.clone()));
            core.transcript.clear();
            core.turns.clear();
            token
        };

        log::info!("session: connecting");
        let transport = self.inner.config.transport_config(system_instruction);

        match Arc::clone(&self.inner).establish(&token, transport).await {
            Ok(()) => Ok(()),
            Err(_) if token.is_cancelled() => Err(SessionError::Cancelled),
            Err(err) => {
                self.inner.fail(&token, &err);
                Err(err)
            }
        }
    }

    /// Send a text turn.  Dropped unless the session is open.
    pub fn send_text(&self, text: &str) {
        let core = lock(&self.inner.core);
        let sender = core.session.as_ref().and_then(|s| s.sender.as_ref());
        match (core.state, sender) {
            (SessionState::Open, Some(sender)) => sender.send_text(text),
            (state, _) => log::debug!("session: text dropped while {}", state.label()),
        }
    }

    /// End the session from any state.  Idempotent; no callback fires after
    /// this returns.
    pub fn disconnect(&self) {
        let token = lock(&self.inner.core)
            .session
            .as_ref()
            .map(|s| s.token.clone());
        match token {
            Some(token) => {
                self.inner.teardown(&token);
                log::info!("session: disconnected");
            }
            None => log::debug!("session: disconnect with no active session"),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner.core).state
    }

    /// Finalized turns of the current (or most recent) session, in order.
    pub fn transcript(&self) -> Vec<TurnRecord> {
        lock(&self.inner.core).turns.clone()
    }

    /// RMS level of the most recently scheduled model audio.
    pub fn output_level(&self) -> f32 {
        lock(&self.inner.core)
            .session
            .as_ref()
            .and_then(|s| s.playback.as_ref())
            .map_or(0.0, PlaybackScheduler::output_level)
    }
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

impl Inner {
    async fn establish(
        self: Arc<Self>,
        token: &SessionToken,
        transport: TransportConfig,
    ) -> Result<(), SessionError> {
        self.authorize(token).await?;
        self.acquire_devices(token).await?;
        let conn = self.open_with_retry(token, &transport, None).await?;
        let events = self.go_live(token, conn, true)?;

        let driver = tokio::spawn(Arc::clone(&self).drive(token.clone(), events, transport));
        let mut core = lock(&self.core);
        match core.current(token) {
            Some(session) => {
                session.driver = Some(driver);
                Ok(())
            }
            None => {
                driver.abort();
                Err(SessionError::Cancelled)
            }
        }
    }

    async fn authorize(&self, token: &SessionToken) -> Result<(), SessionError> {
        if !self.auth.has_valid_credential().await {
            log::info!("session: no valid credential, requesting one");
            tokio::select! {
                result = self.auth.request_credential() => {
                    result.map_err(|e| SessionError::Authorization(e.to_string()))?;
                }
                _ = token.cancelled() => return Err(SessionError::Cancelled),
            }
        }
        if token.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        Ok(())
    }

    /// Open both devices and hand them to the session.  Nothing touches
    /// the network if either one is unavailable.
    ///
    /// Opening blocks until the OS has built the stream, so it runs on the
    /// blocking pool.
    async fn acquire_devices(&self, token: &SessionToken) -> Result<(), SessionError> {
        let audio = self.config.audio.clone();
        let devices = Arc::clone(&self.devices);

        let (mic, speaker) = tokio::task::spawn_blocking(move || {
            let mic = DeviceGuard::new(devices.open_input(audio.input_sample_rate)?);
            let speaker = DeviceGuard::new(devices.open_output(audio.output_sample_rate)?);
            Ok::<_, DeviceError>((mic, speaker))
        })
        .await
        .map_err(|e| DeviceError::microphone(format!("device open task failed: {e}")))??;

        let audio = &self.config.audio;
        let capture = CapturePipeline::new(mic, audio.block_size);
        let playback =
            PlaybackScheduler::new(speaker, audio.output_sample_rate, audio.output_channels);

        let mut core = lock(&self.core);
        let session = core.current(token).ok_or(SessionError::Cancelled)?;
        session.capture = Some(capture);
        session.playback = Some(playback);
        log::debug!("session: microphone and speaker acquired");
        Ok(())
    }

    /// Open the transport, retrying retryable failures per the policy.
    ///
    /// With `lost` set (a live connection just dropped) the first open is
    /// preceded by a backoff delay; otherwise it happens immediately.
    async fn open_with_retry(
        &self,
        token: &SessionToken,
        transport: &TransportConfig,
        lost: Option<String>,
    ) -> Result<Connection, SessionError> {
        let mut retry = u32::from(lost.is_some());
        let mut last = lost.unwrap_or_default();
        let mut attempts = 0;

        loop {
            if retry > 0 {
                if !self.policy.allows(retry) {
                    return Err(SessionError::ConnectionFailed { attempts, last });
                }
                self.enter_state(token, SessionState::Reconnecting)?;
                let delay = self.policy.delay(retry);
                log::info!(
                    "session: reconnect {}/{} in {:?}",
                    retry,
                    self.policy.max_retries,
                    delay
                );
                token.emit(|| self.events.on_reconnecting(retry));
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = token.cancelled() => return Err(SessionError::Cancelled),
                }
            }

            let credential = self
                .auth
                .credential()
                .ok_or_else(|| SessionError::Authorization("no credential available".into()))?;

            attempts += 1;
            let result = tokio::select! {
                result = self.connector.open(transport, &credential) => result,
                _ = token.cancelled() => return Err(SessionError::Cancelled),
            };

            match result {
                Ok(conn) => return Ok(conn),
                Err(e) if e.is_authorization() => {
                    self.auth.credential_rejected();
                    return Err(SessionError::Authorization(e.to_string()));
                }
                Err(e) => {
                    log::warn!("session: connection attempt {attempts} failed: {e}");
                    last = e.to_string();
                    retry += 1;
                }
            }
        }
    }

    /// Wire a fresh connection into the session and start capture.
    fn go_live(
        &self,
        token: &SessionToken,
        conn: Connection,
        first: bool,
    ) -> Result<EventStream, SessionError> {
        let Connection { sender, events } = conn;

        let mut core = lock(&self.core);
        let Some(session) = core.current(token) else {
            sender.close();
            return Err(SessionError::Cancelled);
        };
        if let Some(capture) = session.capture.as_mut() {
            capture.start(self.capture_consumer(token, sender.clone()))?;
        }
        session.sender = Some(sender.clone());
        core.state = SessionState::Open;
        drop(core);

        log::info!("session: open");
        token.emit(|| self.events.on_open());

        if first {
            let opening = self.config.session.opening_message.as_deref();
            if let Some(opening) = opening.filter(|m| !m.trim().is_empty()) {
                log::debug!("session: sending opening message");
                sender.send_text(opening);
            }
        }
        Ok(events)
    }

    fn capture_consumer(
        &self,
        token: &SessionToken,
        sender: TransportSender,
    ) -> impl FnMut(AudioFrame, f32) + Send + 'static {
        let token = token.clone();
        let events = Arc::clone(&self.events);
        move |frame, volume| {
            if token.is_cancelled() {
                return;
            }
            sender.send_frame(frame);
            token.emit(|| events.on_audio_data(volume));
        }
    }

    fn enter_state(&self, token: &SessionToken, state: SessionState) -> Result<(), SessionError> {
        let mut core = lock(&self.core);
        if core.current(token).is_none() {
            return Err(SessionError::Cancelled);
        }
        if core.state != state {
            log::debug!("session: {} → {}", core.state.label(), state.label());
            core.state = state;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

impl Inner {
    async fn drive(
        self: Arc<Self>,
        token: SessionToken,
        mut events: EventStream,
        transport: TransportConfig,
    ) {
        let started = Instant::now();
        let never = started + Duration::from_secs(365 * 24 * 60 * 60);
        let limit = self.config.session.time_limit_secs.map(Duration::from_secs);
        let end_at = limit.map(|l| started + l);
        let notice = Duration::from_secs(self.config.session.wrap_up_notice_secs);
        let mut wrap_up_at = limit.map(|l| started + l.saturating_sub(notice));

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep_until(wrap_up_at.unwrap_or(never)), if wrap_up_at.is_some() => {
                    wrap_up_at = None;
                    self.send_wrap_up(&token);
                    continue;
                }
                _ = sleep_until(end_at.unwrap_or(never)), if end_at.is_some() => {
                    self.finish_on_time_limit(&token);
                    return;
                }
                event = events.recv() => event.unwrap_or_else(|| ServerEvent::Closed {
                    reason: "event stream ended".to_string(),
                }),
            };

            if !event.is_terminal() {
                self.dispatch(&token, event);
                continue;
            }
            if token.is_cancelled() {
                return;
            }

            let rejected = event.is_authorization_failure();
            let reason = match event {
                ServerEvent::Closed { reason } => reason,
                ServerEvent::TransportError { detail } => detail,
                _ => continue,
            };
            if rejected {
                self.auth.credential_rejected();
                self.fail(&token, &SessionError::Authorization(reason));
                return;
            }

            log::warn!("session: connection lost: {reason}");
            // The time limit keeps running while the connection is rebuilt.
            let reopened = tokio::select! {
                result = self.reconnect(&token, &transport, reason) => result,
                _ = sleep_until(end_at.unwrap_or(never)), if end_at.is_some() => {
                    self.finish_on_time_limit(&token);
                    return;
                }
            };
            match reopened {
                Ok(next) => events = next,
                Err(SessionError::Cancelled) => return,
                Err(err) => {
                    self.fail(&token, &err);
                    return;
                }
            }
        }
    }

    fn finish_on_time_limit(&self, token: &SessionToken) {
        log::info!("session: time limit reached");
        token.emit(|| self.events.on_time_limit());
        self.teardown(token);
    }

    /// Apply one non-terminal event.
    fn dispatch(&self, token: &SessionToken, event: ServerEvent) {
        let mut core = lock(&self.core);
        if core.current(token).is_none() {
            return;
        }

        match event {
            ServerEvent::PartialTranscript { speaker, text } => {
                core.transcript.append(speaker, &text);
                drop(core);
                token.emit(|| self.events.on_transcription(speaker, &text));
            }
            ServerEvent::AudioChunk { data } => {
                let playback = core.current(token).and_then(|s| s.playback.as_mut());
                if let Some(playback) = playback {
                    if let Err(e) = playback.enqueue_base64(&data) {
                        log::warn!("playback: skipping chunk: {e}");
                    }
                }
            }
            ServerEvent::TurnComplete => {
                let turn = core.transcript.complete();
                if let Some(turn) = &turn {
                    log::debug!("session: {} turn finalized ({} chars)", turn.speaker, turn.text.len());
                    core.turns.push(turn.clone());
                }
                drop(core);
                token.emit(|| self.events.on_turn_complete(turn.as_ref()));
            }
            ServerEvent::Interrupted => {
                let playback = core.current(token).and_then(|s| s.playback.as_mut());
                if let Some(playback) = playback {
                    playback.interrupt();
                }
            }
            ServerEvent::Closed { .. } | ServerEvent::TransportError { .. } => {}
        }
    }

    /// Stop capture (keeping the microphone), drop the dead connection and
    /// open a new one.
    async fn reconnect(
        &self,
        token: &SessionToken,
        transport: &TransportConfig,
        reason: String,
    ) -> Result<EventStream, SessionError> {
        {
            let mut core = lock(&self.core);
            let session = core.current(token).ok_or(SessionError::Cancelled)?;
            if let Some(capture) = session.capture.as_mut() {
                capture.stop();
            }
            if let Some(sender) = session.sender.take() {
                sender.close();
            }
        }

        let conn = self.open_with_retry(token, transport, Some(reason)).await?;
        log::info!("session: reconnected");
        self.go_live(token, conn, false)
    }

    fn send_wrap_up(&self, token: &SessionToken) {
        let mut core = lock(&self.core);
        let open = core.state == SessionState::Open;
        let sender = core.current(token).and_then(|s| s.sender.as_ref());
        if let (true, Some(sender)) = (open, sender) {
            log::info!("session: sending wrap-up notice");
            sender.send_text(self.config.session.wrap_up_message.as_str());
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Report `err` once and end the session.
    fn fail(&self, token: &SessionToken, err: &SessionError) {
        if token.is_cancelled() {
            return;
        }
        log::error!("session: {err}");
        token.emit(|| self.events.on_error(err));
        self.teardown(token);
    }

    /// Cancel first so in-flight continuations go quiet, then release.
    ///
    /// The state stays active until the devices are released, so a
    /// concurrent `connect` is rejected rather than opening a second
    /// microphone.
    fn teardown(&self, token: &SessionToken) {
        token.cancel();
        let session = {
            let mut core = lock(&self.core);
            if core.current(token).is_none() {
                return;
            }
            core.session.take()
        };
        if let Some(session) = session {
            session.shutdown();
        }

        let mut core = lock(&self.core);
        if core.session.is_none() {
            log::debug!("session: {} → {}", core.state.label(), SessionState::Closed.label());
            core.state = SessionState::Closed;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
