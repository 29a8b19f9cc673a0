use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::{PrivateKey, PublicKey};

/// A provisioned account.
///
/// Every chatterer owns a dedicated server key pair: the client holds the
/// server public key and seals its requests with it, the server keeps the
/// matching private key here. This record is storage-only and must never be
/// sent to a client as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chatterer {
    pub id: String,
    pub username: String,
    pub client_public_key: PublicKey,
    pub server_private_key: PrivateKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_issued_at: Option<DateTime<Utc>>,
}

impl Chatterer {
    pub fn new(username: impl Into<String>, client_public_key: PublicKey, server_private_key: PrivateKey) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            client_public_key,
            server_private_key,
            token: None,
            token_issued_at: None,
        }
    }
}
