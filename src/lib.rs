//! Live voice coaching sessions against a streaming speech endpoint.
//!
//! ```text
//! microphone ─▶ audio::CapturePipeline ─▶ transport ─▶ live endpoint
//!                                                        │
//! speaker ◀── audio::PlaybackScheduler ◀── ServerEvent ◀─┘
//!                        ▲
//!            session::SessionOrchestrator (state, transcript, reconnect)
//! ```

pub mod audio;
pub mod auth;
pub mod config;
pub mod session;
pub mod transport;
