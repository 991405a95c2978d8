//! Session error taxonomy.
//!
//! | Variant            | Kind             | Retried |
//! |--------------------|------------------|---------|
//! | DeviceUnavailable  | Microphone       | no      |
//! | Authorization      | Authorization    | no      |
//! | ConnectionFailed   | ConnectionFailed | yes, then surfaced |
//! | AlreadyActive      | Rejected         | no      |
//! | Cancelled          | Rejected         | no      |
//!
//! Per-chunk audio decode failures never become a `SessionError`; they are
//! logged and the chunk is skipped.

use thiserror::Error;

use crate::audio::{DeviceError, DeviceKind};

/// The four situations a user needs to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Microphone or speaker could not be opened.
    Microphone,
    /// Missing, invalid or unbilled credential.
    Authorization,
    /// The endpoint could not be reached, even after retrying.
    ConnectionFailed,
    /// The call itself was not allowed (e.g. a second `connect`).
    Rejected,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    DeviceUnavailable(#[from] DeviceError),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("connection failed after {attempts} attempt(s): {last}")]
    ConnectionFailed { attempts: u32, last: String },

    #[error("a session is already active")]
    AlreadyActive,

    #[error("connect was cancelled by disconnect")]
    Cancelled,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::DeviceUnavailable(_) => ErrorKind::Microphone,
            SessionError::Authorization(_) => ErrorKind::Authorization,
            SessionError::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            SessionError::AlreadyActive | SessionError::Cancelled => ErrorKind::Rejected,
        }
    }

    /// Actionable text for the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::DeviceUnavailable(e) => match e.kind() {
                DeviceKind::Microphone => {
                    "Microphone access denied. Please check your permissions.".to_string()
                }
                DeviceKind::Speaker => {
                    "No audio output available. Please check your speaker settings.".to_string()
                }
            },
            SessionError::Authorization(_) => {
                "AI Coach Connection Failed: Please ensure you use an API key from a project \
                 with active billing. Free projects do not support native audio streams."
                    .to_string()
            }
            SessionError::ConnectionFailed { .. } => {
                "Persistent connection error. Please try again later.".to_string()
            }
            SessionError::AlreadyActive => {
                "A session is already running. End it before starting a new one.".to_string()
            }
            SessionError::Cancelled => "The session was ended before it connected.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        let errors = [
            SessionError::from(DeviceError::microphone("permission denied")),
            SessionError::Authorization("403".into()),
            SessionError::ConnectionFailed {
                attempts: 4,
                last: "refused".into(),
            },
            SessionError::AlreadyActive,
        ];
        let kinds: Vec<_> = errors.iter().map(SessionError::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Microphone,
                ErrorKind::Authorization,
                ErrorKind::ConnectionFailed,
                ErrorKind::Rejected
            ]
        );
    }

    #[test]
    fn microphone_message_mentions_permissions() {
        let e = SessionError::from(DeviceError::microphone("NotAllowedError"));
        assert!(e.user_message().contains("Microphone access denied"));
    }

    #[test]
    fn speaker_message_differs_from_microphone() {
        let mic = SessionError::from(DeviceError::microphone("x")).user_message();
        let spk = SessionError::from(DeviceError::speaker("x")).user_message();
        assert_ne!(mic, spk);
    }

    #[test]
    fn authorization_message_mentions_billing() {
        assert!(SessionError::Authorization("x".into())
            .user_message()
            .contains("billing"));
    }
}
