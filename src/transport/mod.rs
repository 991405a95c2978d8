//! Session transport: a bidirectional streaming connection to the live
//! conversational endpoint.
//!
//! ```text
//! AudioFrame / text ──▶ TransportSender ──▶ writer task ──▶ WebSocket
//! SessionOrchestrator ◀── ServerEvent ◀── reader task ◀── WebSocket
//! ```
//!
//! The session only depends on [`TransportConnector`]; [`WebSocketConnector`]
//! is the production implementation.

pub mod connection;
pub mod event;
pub mod protocol;
pub mod websocket;

pub use connection::{
    Connection, ConnectionPeer, Outbound, TransportConfig, TransportConnector, TransportError,
    TransportSender,
};
pub use event::{ServerEvent, Speaker};
pub use websocket::WebSocketConnector;
