//! Credential check for the live endpoint.
//!
//! The session asks an [`AuthorizationProvider`] two things before opening a
//! connection: is there a usable credential, and if not, can the host obtain
//! one (prompt, key picker, re-read the environment).  When the endpoint
//! later rejects the credential, the provider is told so it can clear it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AuthConfig;

/// The host could not supply a credential.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error("no API key configured (set {0} or auth.api_key)")]
    Missing(String),

    #[error("credential selection was cancelled")]
    Cancelled,
}

#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// `true` when a credential is on hand and has not been rejected.
    async fn has_valid_credential(&self) -> bool;

    /// Obtain a credential from the user or the environment.
    async fn request_credential(&self) -> Result<(), AuthError>;

    /// The current credential, if any.
    fn credential(&self) -> Option<String>;

    /// The endpoint refused the current credential.
    fn credential_rejected(&self) {}
}

// ---------------------------------------------------------------------------
// ApiKeyProvider
// ---------------------------------------------------------------------------

/// API key from config, falling back to an environment variable.
///
/// `request_credential` re-reads the environment, so a key exported after
/// start-up is picked up on the next connect.
pub struct ApiKeyProvider {
    env_var: String,
    key: Mutex<Option<String>>,
    rejected: AtomicBool,
}

impl ApiKeyProvider {
    pub fn new(env_var: impl Into<String>, inline: Option<String>) -> Self {
        let env_var = env_var.into();
        let key = inline
            .filter(|k| !k.trim().is_empty())
            .or_else(|| read_env(&env_var));
        Self {
            env_var,
            key: Mutex::new(key),
            rejected: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.api_key_env.clone(), config.api_key.clone())
    }

    fn current(&self) -> Option<String> {
        self.key
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}

#[async_trait]
impl AuthorizationProvider for ApiKeyProvider {
    async fn has_valid_credential(&self) -> bool {
        !self.rejected.load(Ordering::SeqCst) && self.current().is_some()
    }

    async fn request_credential(&self) -> Result<(), AuthError> {
        match read_env(&self.env_var) {
            Some(key) => {
                *self
                    .key
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(key);
                self.rejected.store(false, Ordering::SeqCst);
                log::info!("auth: API key loaded from ${}", self.env_var);
                Ok(())
            }
            None => Err(AuthError::Missing(self.env_var.clone())),
        }
    }

    fn credential(&self) -> Option<String> {
        self.current()
    }

    fn credential_rejected(&self) {
        log::warn!("auth: API key rejected by the endpoint");
        self.rejected.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
