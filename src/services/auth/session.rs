//! Per-browser session record
//!
//! The record is a plain value: every transition returns a new record which
//! the HTTP layer writes back to the session cookie.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

/// Key under which the record is kept in the cookie session.
pub const SESSION_STATE_KEY: &str = "state";

#[derive(Clone, Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("CSRF token missing or invalid")]
    CsrfValidationFailed,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageLevel {
    Info,
    Error,
}

/// One-shot message shown on the next rendered page.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct FlashMessage {
    pub level: MessageLevel,
    pub text: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SessionState {
    id: String,
    authenticated: bool,
    csrf_token: String,
    next_step_allowed: Option<u32>,
    created_at: u64,
    last_seen: u64,
    #[serde(default)]
    messages: Vec<FlashMessage>,
}

impl SessionState {
    /// Fresh anonymous session.
    pub fn new(now: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            authenticated: false,
            csrf_token: Uuid::new_v4().simple().to_string(),
            next_step_allowed: None,
            created_at: now,
            last_seen: now,
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// Cached mirror of the persisted wizard marker, as last resolved.
    pub fn next_step_allowed(&self) -> Option<u32> {
        self.next_step_allowed
    }

    pub fn is_expired(&self, now: u64, idle_timeout: Duration) -> bool {
        now.saturating_sub(self.last_seen) > idle_timeout.as_secs()
    }

    pub fn touched(self, now: u64) -> Self {
        Self {
            last_seen: now,
            ..self
        }
    }

    pub fn with_authentication(self, authenticated: bool) -> Self {
        Self {
            authenticated,
            ..self
        }
    }

    pub fn with_next_step_allowed(self, step: u32) -> Self {
        Self {
            next_step_allowed: Some(step),
            ..self
        }
    }

    /// Authenticated successor of this session.
    ///
    /// Identity and CSRF token are regenerated and nothing of the previous
    /// record is carried over.
    pub fn logged_in(&self, now: u64) -> Self {
        Self {
            authenticated: true,
            ..Self::new(now)
        }
    }

    /// Compare a presented CSRF token with the session's token in constant time.
    pub fn verify_csrf(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let Some(presented) = presented else {
            return Err(AuthError::CsrfValidationFailed);
        };

        if bool::from(presented.as_bytes().ct_eq(self.csrf_token.as_bytes())) {
            Ok(())
        } else {
            Err(AuthError::CsrfValidationFailed)
        }
    }

    pub fn with_message(mut self, level: MessageLevel, text: impl Into<String>) -> Self {
        self.messages.push(FlashMessage {
            level,
            text: text.into(),
        });
        self
    }

    /// Pending messages; they are removed from the returned record.
    pub fn take_messages(self) -> (Self, Vec<FlashMessage>) {
        let messages = self.messages;
        (
            Self {
                messages: Vec::new(),
                ..self
            },
            messages,
        )
    }
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
