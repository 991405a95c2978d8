//! Live session lifecycle.
//!
//! # State machine
//!
//! ```text
//!             connect()
//!   Idle ───────────────▶ Connecting ──── opened ────▶ Open
//!    ▲                        │                       │  ▲
//!    │                        │ retryable failure     │  │ reopened
//!    │                        ▼                       ▼  │
//!    │                   Reconnecting ◀── dropped ── Open
//!    │                        │
//!    │      exhausted / auth failure / disconnect()
//!    │                        ▼
//!    └───── connect() ──── Closed
//! ```
//!
//! [`SessionOrchestrator`] is the entry point; the remaining modules are its
//! building blocks and are usable on their own.

pub mod backoff;
pub mod cancel;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod state;
pub mod transcript;

#[cfg(test)]
pub mod mock;

pub use backoff::ReconnectPolicy;
pub use cancel::SessionToken;
pub use error::{ErrorKind, SessionError};
pub use events::SessionEvents;
pub use orchestrator::SessionOrchestrator;
pub use state::SessionState;
pub use transcript::{TranscriptBuffer, TurnRecord};
