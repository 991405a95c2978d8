//! Session connection state.

/// States of one live session.
///
/// The state machine transitions are:
///
/// ```text
/// Idle ──connect()──▶ Connecting ──transport opens──▶ Open
///                                                      │ ▲
///                               unexpected close/error │ │ reconnect succeeds
///                                                      ▼ │
///                                                  Reconnecting
///
/// Connecting / Open / Reconnecting ──disconnect() | fatal error──▶ Closed
/// Closed ──connect()──▶ Connecting   (a logically new session)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session has been started yet.
    #[default]
    Idle,

    /// Authorization, device acquisition and the first transport open are
    /// in progress.
    Connecting,

    /// Audio is streaming in both directions.
    Open,

    /// The connection dropped; waiting out a backoff delay or re-opening.
    Reconnecting,

    /// The session ended, by the caller or by a fatal error.
    Closed,
}

impl SessionState {
    /// Returns `true` while a session owns devices and may fire callbacks.
    ///
    /// ```
    /// use live_coach::session::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_active());
    /// assert!(SessionState::Connecting.is_active());
    /// assert!(SessionState::Open.is_active());
    /// assert!(SessionState::Reconnecting.is_active());
    /// assert!(!SessionState::Closed.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Open | SessionState::Reconnecting
        )
    }

    /// A short human-readable label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Open => "Live",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Closed => "Ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn labels_are_distinct() {
        let all = [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Reconnecting,
            SessionState::Closed,
        ];
        let mut labels: Vec<_> = all.iter().map(|s| s.label()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), all.len());
    }
}
