//! Short-lived bearer tokens.
//!
//! The server hands a fresh token to an authenticated client, sealed for the
//! client's public key. The client re-seals it for its server public key and
//! presents the resulting text to whoever needs proof of identity; only the
//! server can open it again and check it against the stored copy.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::body::Body;
use crate::chatterer::Chatterer;
use crate::envelope::EncryptedEnvelope;
use crate::error::{Error, Result};
use crate::key::{PrivateKey, PublicKey};
use crate::storage::Storage;
use crate::{validate_message, MESSAGE_TOKEN};

/// How long an issued token stays valid.
pub const TOKEN_VALIDITY_SECS: i64 = 5 * 60;

#[derive(Clone, PartialEq, Eq)]
pub struct Token(Vec<u8>);

impl Token {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Seal for `recipient` and wrap the envelope JSON in base64.
    pub fn encode(&self, recipient: &PublicKey) -> Result<String> {
        let envelope = EncryptedEnvelope::seal(&self.0, recipient)?;
        Ok(STANDARD.encode(serde_json::to_vec(&envelope)?))
    }

    pub fn decode(text: &str, recipient: &PrivateKey) -> Result<Self> {
        let json = STANDARD.decode(text.trim())?;
        let envelope: EncryptedEnvelope = serde_json::from_slice(&json)?;
        Ok(Self(envelope.open(recipient)?))
    }

    /// Check against the copy stored on `chatterer`.
    ///
    /// Passes when the bytes match and `0 <= now - issued_at <= 5min`.
    pub fn validate(&self, chatterer: &Chatterer, now: DateTime<Utc>) -> Result<()> {
        match &chatterer.token {
            Some(stored) if stored.as_bytes() == self.0.as_slice() => {}
            _ => return Err(Error::TokenMismatch),
        }

        let issued_at = chatterer
            .token_issued_at
            .ok_or_else(|| Error::TokenExpired("no issue time recorded".into()))?;
        if issued_at > now || issued_at < now - Duration::seconds(TOKEN_VALIDITY_SECS) {
            return Err(Error::TokenExpired(format!(
                "issued at {} while now is {}",
                issued_at.to_rfc3339(),
                now.to_rfc3339()
            )));
        }
        Ok(())
    }
}

impl From<Vec<u8>> for Token {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Token(..)")
    }
}

/// Server-side token issuance and validation.
pub struct TokenService<S: ?Sized + Storage> {
    storage: Arc<S>,
}

impl<S: ?Sized + Storage> Clone for TokenService<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: ?Sized + Storage> TokenService<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Handle a token request and build the reply body.
    ///
    /// The request must be a fresh `token` marker sealed with the caller's
    /// server public key; the reply seals the new token for the caller.
    pub async fn issue(&self, body: &Body, now: DateTime<Utc>) -> Result<Body> {
        let username = body.request()?.username.clone();
        let mut chatterer = self.storage.chatterer_fetch_by_username(&username).await?;
        let message = body.process(now, &chatterer.server_private_key)?;
        validate_message(&message, MESSAGE_TOKEN)?;

        let token = Token::generate();
        chatterer.token = Some(String::from_utf8_lossy(token.as_bytes()).into_owned());
        chatterer.token_issued_at = Some(now);
        self.storage.chatterer_update(&chatterer).await?;
        info!(%username, "token issued");

        Body::new(token.as_bytes(), now, "", &chatterer.client_public_key)
    }

    /// Check an encoded token presented on behalf of `username`.
    pub async fn validate(&self, username: &str, encoded: &str, now: DateTime<Utc>) -> Result<()> {
        let chatterer = self.storage.chatterer_fetch_by_username(username).await?;
        let token = Token::decode(encoded, &chatterer.server_private_key)?;
        token.validate(&chatterer, now)
    }
}
