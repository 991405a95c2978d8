//! WebSocket connector for the live endpoint (tokio-tungstenite).
//!
//! `open` performs the whole handshake (TCP/TLS, WebSocket upgrade, setup
//! message, wait for `setupComplete`) before handing back a [`Connection`].
//! From then on two tasks own the socket halves:
//!
//! - **writer**: drains [`Outbound`] and serialises it to JSON text frames.
//!   Ends on `Outbound::Close`, a send failure, or once every
//!   [`TransportSender`] is gone.
//! - **reader**: parses each text/binary frame into [`ServerEvent`]s and
//!   ends after forwarding exactly one terminal event (`Closed` or
//!   `TransportError`).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::transport::connection::{
    Connection, Outbound, TransportConfig, TransportConnector, TransportError, TransportSender,
};
use crate::transport::event::{looks_like_auth_failure, ServerEvent};
use crate::transport::protocol::{audio_message, parse_server_message, setup_message, text_message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connects over `wss://` with the API key as a query parameter.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(
        &self,
        config: &TransportConfig,
        credential: &str,
    ) -> Result<Connection, TransportError> {
        let url = format!("{}?key={}", config.endpoint, credential);
        log::info!("transport: connecting to {}", config.endpoint);

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(classify_connect_error)?;
        let (mut sink, mut source) = stream.split();

        sink.send(Message::Text(setup_message(config).to_string().into()))
            .await
            .map_err(|e| TransportError::ConnectionSetup(format!("setup send failed: {e}")))?;

        let wait = Duration::from_secs(config.setup_timeout_secs.max(1));
        let early = tokio::time::timeout(wait, await_setup_complete(&mut source))
            .await
            .map_err(|_| {
                TransportError::ConnectionSetup(format!(
                    "no setup acknowledgement within {}s",
                    wait.as_secs()
                ))
            })??;

        log::info!("transport: session established");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();

        for event in early {
            let _ = ev_tx.send(event);
        }
        tokio::spawn(run_writer(sink, out_rx));
        tokio::spawn(run_reader(source, ev_tx));

        Ok(Connection {
            sender: TransportSender::new(out_tx),
            events: ev_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

fn classify_connect_error(err: tungstenite::Error) -> TransportError {
    let permanent = match &err {
        tungstenite::Error::Http(resp) => {
            let code = resp.status().as_u16();
            code == 401 || code == 403
        }
        other => looks_like_auth_failure(&other.to_string()),
    };
    if permanent {
        TransportError::Authorization(err.to_string())
    } else {
        TransportError::ConnectionSetup(err.to_string())
    }
}

/// Read until `setupComplete`.  Events that arrive in the same message are
/// returned so they are not lost.
async fn await_setup_complete(source: &mut WsSource) -> Result<Vec<ServerEvent>, TransportError> {
    while let Some(frame) = source.next().await {
        let frame = frame.map_err(|e| TransportError::ConnectionSetup(e.to_string()))?;
        let raw = match frame_text(&frame) {
            FrameText::Json(raw) => raw,
            FrameText::Close(reason) => {
                return Err(if looks_like_auth_failure(&reason) {
                    TransportError::Authorization(reason)
                } else {
                    TransportError::Closed(reason)
                });
            }
            FrameText::Skip => continue,
        };
        let parsed = parse_server_message(&raw)?;
        if parsed.setup_complete {
            return Ok(parsed.events);
        }
        log::debug!("transport: ignoring pre-setup message");
    }
    Err(TransportError::Closed("stream ended during setup".to_string()))
}

enum FrameText {
    Json(String),
    Close(String),
    Skip,
}

/// The endpoint sends JSON in either text or binary frames.
fn frame_text(frame: &Message) -> FrameText {
    match frame {
        Message::Text(text) => FrameText::Json(text.to_string()),
        Message::Binary(data) => match std::str::from_utf8(data) {
            Ok(text) => FrameText::Json(text.to_string()),
            Err(_) => {
                log::debug!("transport: non-UTF-8 binary frame ({} bytes)", data.len());
                FrameText::Skip
            }
        },
        Message::Close(frame) => FrameText::Close(
            frame
                .as_ref()
                .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                .unwrap_or_else(|| "closed without reason".to_string()),
        ),
        _ => FrameText::Skip,
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn run_writer(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(msg) = rx.recv().await {
        let payload = match msg {
            Outbound::Audio(frame) => audio_message(&frame),
            Outbound::Text(text) => text_message(&text),
            Outbound::Close => break,
        };
        if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
            log::debug!("transport: send failed, writer stopping: {e}");
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    log::debug!("transport: writer finished");
}

async fn run_reader(mut source: WsSource, tx: mpsc::UnboundedSender<ServerEvent>) {
    let terminal = loop {
        let frame = match source.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                break ServerEvent::TransportError {
                    detail: e.to_string(),
                }
            }
            None => {
                break ServerEvent::Closed {
                    reason: "stream ended".to_string(),
                }
            }
        };

        let raw = match frame_text(&frame) {
            FrameText::Json(raw) => raw,
            FrameText::Close(reason) => break ServerEvent::Closed { reason },
            FrameText::Skip => continue,
        };

        match parse_server_message(&raw) {
            Ok(parsed) => {
                for event in parsed.events {
                    let terminal = event.is_terminal();
                    if tx.send(event).is_err() {
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
            Err(e) => log::warn!("transport: {e}"),
        }
    };

    log::debug!("transport: reader finished with {terminal:?}");
    let _ = tx.send(terminal);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
