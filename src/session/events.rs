//! Callbacks from a live session to its host.
//!
//! Every method has a no-op default so hosts implement only what they show.
//! Callbacks run on the session's runtime; keep them short and never block.
//! After `disconnect()` returns, none of them fire again.

use crate::session::error::SessionError;
use crate::session::transcript::TurnRecord;
use crate::transport::Speaker;

pub trait SessionEvents: Send + Sync {
    /// The session is live and the microphone is streaming.  Fires again
    /// after every successful reconnect.
    fn on_open(&self) {}

    /// RMS volume of the most recent microphone frame.
    fn on_audio_data(&self, _volume: f32) {}

    /// An incremental piece of transcript text.
    fn on_transcription(&self, _speaker: Speaker, _delta: &str) {}

    /// The endpoint signalled turn completion.  `turn` is `None` when no
    /// text had been buffered.
    fn on_turn_complete(&self, _turn: Option<&TurnRecord>) {}

    /// The session ended with an error.  Fires at most once per session.
    fn on_error(&self, _error: &SessionError) {}

    /// The connection dropped and retry `attempt` (1-based) is scheduled.
    fn on_reconnecting(&self, _attempt: u32) {}

    /// The configured time limit was reached and the session is ending.
    fn on_time_limit(&self) {}
}
