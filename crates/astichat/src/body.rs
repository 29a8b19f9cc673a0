//! Request/response body exchanged on every hop.
//!
//! A body is either an application error or a request: a sealed envelope, the
//! time it was created (by the sender's server-synchronised clock) and the
//! sender's username. The creation time is the sole freshness defence; there
//! is no nonce, so a captured body replays fine inside the window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::EncryptedEnvelope;
use crate::error::{Error, Result};
use crate::key::{PrivateKey, PublicKey};

/// Maximum tolerated distance between a request's creation time and now.
pub const FRESHNESS_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BodyError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BodyRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyError {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyRequest {
    pub created_at: DateTime<Utc>,
    pub message: EncryptedEnvelope,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl Body {
    /// Seal `message` for `recipient` and stamp it with `now`.
    pub fn new(message: &[u8], now: DateTime<Utc>, username: &str, recipient: &PublicKey) -> Result<Self> {
        Ok(Self {
            error: None,
            request: Some(BodyRequest {
                created_at: now,
                message: EncryptedEnvelope::seal(message, recipient)?,
                username: username.to_string(),
            }),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(BodyError {
                message: message.into(),
            }),
            request: None,
        }
    }

    /// Username claimed by the sender, empty when the body carries no request.
    pub fn username(&self) -> &str {
        self.request.as_ref().map(|r| r.username.as_str()).unwrap_or_default()
    }

    /// The request part; a remote error takes precedence over everything.
    pub fn request(&self) -> Result<&BodyRequest> {
        if let Some(error) = &self.error {
            return Err(Error::Remote(error.message.clone()));
        }
        self.request.as_ref().ok_or(Error::EmptyBody)
    }

    /// Check freshness against `now` and open the envelope with `recipient`.
    pub fn process(&self, now: DateTime<Utc>, recipient: &PrivateKey) -> Result<Vec<u8>> {
        let request = self.request()?;

        let window = Duration::seconds(FRESHNESS_WINDOW_SECS);
        if request.created_at > now + window || request.created_at < now - window {
            return Err(Error::Stale {
                created_at: request.created_at.to_rfc3339(),
                now: now.to_rfc3339(),
            });
        }

        request.message.open(recipient)
    }
}
