//! Typed inbound events from the live endpoint.
//!
//! Every server message is flattened into zero or more [`ServerEvent`]s so
//! the session orchestrator can handle the whole protocol in one exhaustive
//! `match`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who produced a piece of transcript text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The person at the microphone.
    User,
    /// The remote conversational agent.
    Model,
}

impl Speaker {
    pub fn other(self) -> Speaker {
        match self {
            Speaker::User => Speaker::Model,
            Speaker::Model => Speaker::User,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Model => write!(f, "model"),
        }
    }
}

/// One thing the remote session told us.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Incremental transcript text for `speaker`.
    PartialTranscript { speaker: Speaker, text: String },
    /// Model speech: base64-wrapped PCM16 at the output sample rate.
    AudioChunk { data: String },
    /// The current turn is finished.
    TurnComplete,
    /// The model was cut off by new user input (barge-in).
    Interrupted,
    /// The connection ended.
    Closed { reason: String },
    /// The connection failed.
    TransportError { detail: String },
}

impl ServerEvent {
    /// `true` for the two events that end a connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerEvent::Closed { .. } | ServerEvent::TransportError { .. }
        )
    }

    /// `true` when a terminal event carries a credential / billing rejection
    /// that no amount of retrying will fix.
    pub fn is_authorization_failure(&self) -> bool {
        match self {
            ServerEvent::Closed { reason } => looks_like_auth_failure(reason),
            ServerEvent::TransportError { detail } => looks_like_auth_failure(detail),
            _ => false,
        }
    }
}

/// Heuristic used on close reasons and error text from the endpoint.
pub fn looks_like_auth_failure(text: &str) -> bool {
    const MARKERS: &[&str] = &[
        "403",
        "401",
        "billing",
        "requested entity was not found",
        "api key not valid",
        "api_key_invalid",
        "permission denied",
        "permission_denied",
    ];
    let lower = text.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
