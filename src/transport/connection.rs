//! The transport seam: what the session needs from a live connection.
//!
//! ```text
//!   SessionOrchestrator
//!        │  TransportSender (clone per producer)      ▲ mpsc<ServerEvent>
//!        ▼                                            │
//!   ┌──────────── writer task ────────────┐   ┌── reader task ──┐
//!   │ Outbound::{Audio,Text,Close} → wire │   │ wire → events   │
//!   └─────────────────────────────────────┘   └─────────────────┘
//! ```
//!
//! Sends are fire-and-forget.  Once the connection is gone, outbound
//! messages are dropped with a debug log and the caller never sees an error.
//! Loss of the connection is reported on the event channel instead.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::codec::AudioFrame;
use crate::transport::event::ServerEvent;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Why a connection could not be established.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Network / handshake failure.  Retryable.
    #[error("connection setup failed: {0}")]
    ConnectionSetup(String),

    /// The endpoint rejected the credential (bad key, billing, 401/403).
    /// Never retried.
    #[error("authorization rejected: {0}")]
    Authorization(String),

    /// The endpoint answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The endpoint closed the socket before the session was usable.
    #[error("connection closed: {0}")]
    Closed(String),
}

impl TransportError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, TransportError::Authorization(_))
    }
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Everything the endpoint needs to start a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    /// WebSocket URL of the bidirectional live endpoint.
    pub endpoint: String,
    pub model: String,
    /// Persona / system prompt sent in the setup message.
    pub system_instruction: String,
    /// Prebuilt voice for model speech.
    pub voice: String,
    pub response_modalities: Vec<String>,
    /// Ask the endpoint to transcribe microphone audio.
    pub input_transcription: bool,
    /// Ask the endpoint to transcribe model speech.
    pub output_transcription: bool,
    /// Seconds to wait for the setup acknowledgement.
    pub setup_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/\
                       google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
                .to_string(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            system_instruction: String::new(),
            voice: "Zephyr".to_string(),
            response_modalities: vec!["AUDIO".to_string()],
            input_transcription: true,
            output_transcription: true,
            setup_timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound / TransportSender
// ---------------------------------------------------------------------------

/// A message queued for the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Audio(AudioFrame),
    Text(String),
    Close,
}

/// Cheap, cloneable handle for pushing messages onto a connection.
#[derive(Debug, Clone)]
pub struct TransportSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl TransportSender {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// Queue one microphone frame.
    pub fn send_frame(&self, frame: AudioFrame) {
        if self.tx.send(Outbound::Audio(frame)).is_err() {
            log::debug!("transport: audio frame dropped, connection gone");
        }
    }

    /// Queue a text turn.
    pub fn send_text(&self, text: impl Into<String>) {
        if self.tx.send(Outbound::Text(text.into())).is_err() {
            log::debug!("transport: text dropped, connection gone");
        }
    }

    /// Ask the writer to close the connection.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// An open session with the live endpoint.
#[derive(Debug)]
pub struct Connection {
    pub sender: TransportSender,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// The far side of an in-memory [`Connection`].
#[derive(Debug)]
pub struct ConnectionPeer {
    /// Everything the session sent.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Push events into the session.
    pub events: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    /// A connected pair of channels with no network behind them.
    ///
    /// The real connector wires the peer to reader / writer tasks; test
    /// doubles keep it and play the server.
    pub fn pair() -> (Connection, ConnectionPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Connection {
                sender: TransportSender::new(out_tx),
                events: ev_rx,
            },
            ConnectionPeer {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// TransportConnector
// ---------------------------------------------------------------------------

/// Opens connections to the live endpoint.
///
/// Implementations must return only once the endpoint has acknowledged the
/// setup message, so an `Ok` means the session is usable.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(
        &self,
        config: &TransportConfig,
        credential: &str,
    ) -> Result<Connection, TransportError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_both_directions() {
        let (mut conn, mut peer) = Connection::pair();

        conn.sender.send_text("hello");
        conn.sender.close();
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Text("hello".into()))
        );
        assert_eq!(peer.outbound.recv().await, Some(Outbound::Close));

        peer.events.send(ServerEvent::TurnComplete).unwrap();
        assert_eq!(conn.events.recv().await, Some(ServerEvent::TurnComplete));
    }

    #[test]
    fn send_after_peer_dropped_is_silent() {
        let (conn, peer) = Connection::pair();
        drop(peer);
        assert!(conn.sender.is_closed());
        conn.sender.send_text("into the void");
        conn.sender.send_frame(AudioFrame::from_samples(&[0.0; 4], 16_000));
        conn.sender.close();
    }

    #[test]
    fn authorization_classifier() {
        assert!(TransportError::Authorization("403".into()).is_authorization());
        assert!(!TransportError::ConnectionSetup("refused".into()).is_authorization());
    }
}
