//! Per-speaker transcript accumulation.
//!
//! The endpoint streams transcript text as small deltas for both speakers,
//! freely interleaved.  [`TranscriptBuffer`] keeps one accumulator per
//! speaker and only turns a buffer into a [`TurnRecord`] when the endpoint
//! signals turn completion.  A speaker change alone never finalizes
//! anything.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::transport::Speaker;

/// One finished utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub speaker: Speaker,
    pub text: String,
    /// Milliseconds since the Unix epoch at finalization.
    pub timestamp_ms: u64,
}

/// Two independent accumulators plus the speaker a `TurnComplete` applies to.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    user: String,
    model: String,
    /// Speaker of the most recent delta.
    active: Option<Speaker>,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta in arrival order.
    pub fn append(&mut self, speaker: Speaker, delta: &str) {
        self.buffer_mut(speaker).push_str(delta);
        self.active = Some(speaker);
    }

    /// Text buffered so far for `speaker`.
    pub fn pending(&self, speaker: Speaker) -> &str {
        match speaker {
            Speaker::User => &self.user,
            Speaker::Model => &self.model,
        }
    }

    pub fn active(&self) -> Option<Speaker> {
        self.active
    }

    /// Finalize the active speaker's turn.
    ///
    /// Returns `None` when nothing was buffered.  Afterwards the other
    /// speaker becomes active if it still has unfinalized text, so the next
    /// completion signal closes that turn.
    pub fn complete(&mut self) -> Option<TurnRecord> {
        let speaker = self.active?;
        let text = std::mem::take(self.buffer_mut(speaker));

        let other = speaker.other();
        self.active = if self.pending(other).is_empty() {
            None
        } else {
            Some(other)
        };

        if text.trim().is_empty() {
            return None;
        }
        Some(TurnRecord {
            speaker,
            text,
            timestamp_ms: now_ms(),
        })
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.user.clear();
        self.model.clear();
        self.active = None;
    }

    fn buffer_mut(&mut self, speaker: Speaker) -> &mut String {
        match speaker {
            Speaker::User => &mut self.user,
            Speaker::Model => &mut self.model,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_deltas_stay_in_their_own_buffer() {
        let mut buf = TranscriptBuffer::new();
        buf.append(Speaker::User, "Hi");
        buf.append(Speaker::Model, "Hello");
        buf.append(Speaker::User, " there");

        let turn = buf.complete().expect("user turn");
        assert_eq!(turn.speaker, Speaker::User);
        assert_eq!(turn.text, "Hi there");

        // Model text stays buffered until its own completion signal.
        assert_eq!(buf.pending(Speaker::Model), "Hello");
        assert_eq!(buf.active(), Some(Speaker::Model));

        let turn = buf.complete().expect("model turn");
        assert_eq!(turn.speaker, Speaker::Model);
        assert_eq!(turn.text, "Hello");
        assert_eq!(buf.active(), None);
    }

    #[test]
    fn speaker_change_does_not_finalize() {
        let mut buf = TranscriptBuffer::new();
        buf.append(Speaker::Model, "Tell me ");
        buf.append(Speaker::User, "Sure");
        buf.append(Speaker::Model, "more.");
        assert_eq!(buf.pending(Speaker::Model), "Tell me more.");
        assert_eq!(buf.pending(Speaker::User), "Sure");
    }

    #[test]
    fn complete_on_empty_buffer_is_none() {
        let mut buf = TranscriptBuffer::new();
        assert!(buf.complete().is_none());

        buf.append(Speaker::User, "  ");
        assert!(buf.complete().is_none());
        assert_eq!(buf.pending(Speaker::User), "");
    }

    #[test]
    fn buffer_resets_after_completion() {
        let mut buf = TranscriptBuffer::new();
        buf.append(Speaker::User, "one");
        buf.complete();
        buf.append(Speaker::User, "two");
        assert_eq!(buf.complete().unwrap().text, "two");
    }

    #[test]
    fn turn_record_serialises_to_json() {
        let turn = TurnRecord {
            speaker: Speaker::User,
            text: "Hi".into(),
            timestamp_ms: 42,
        };
        assert_eq!(
            serde_json::to_string(&turn).unwrap(),
            r#"{"speaker":"user","text":"Hi","timestamp_ms":42}"#
        );
    }
}
