//! Configuration module for the live coaching session.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the session,
//! audio, reconnect and auth concerns, `AppPaths` for cross-platform data
//! directories, and TOML persistence via `AppConfig::load` / `AppConfig::load_or_create`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, AudioConfig, AuthConfig, ConfigError, ReconnectConfig, SessionConfig,
};
