//! Account storage contract.
//!
//! The protocol only ever reads and updates accounts; creation happens at
//! provisioning time. Backends must be safe to share between the datagram
//! handlers and the HTTP surface.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chatterer::Chatterer;
use crate::error::{Error, Result};
use crate::key::{PrivateKey, PublicKey};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Create an account; fails with [`Error::UsernameTaken`] on a duplicate.
    async fn chatterer_create(
        &self,
        username: &str,
        client_public_key: PublicKey,
        server_private_key: PrivateKey,
    ) -> Result<Chatterer>;

    async fn chatterer_fetch_by_username(&self, username: &str) -> Result<Chatterer>;

    /// Replace the stored record with the same username.
    async fn chatterer_update(&self, chatterer: &Chatterer) -> Result<()>;

    /// Remove an account. Deleting an unknown username is not an error.
    async fn chatterer_delete_by_username(&self, username: &str) -> Result<()>;
}

/// Volatile storage, keyed by username.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    chatterers: Mutex<HashMap<String, Chatterer>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record.
    pub fn chatterers(&self) -> Vec<Chatterer> {
        self.chatterers.lock().values().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn chatterer_create(
        &self,
        username: &str,
        client_public_key: PublicKey,
        server_private_key: PrivateKey,
    ) -> Result<Chatterer> {
        let mut chatterers = self.chatterers.lock();
        if chatterers.contains_key(username) {
            return Err(Error::UsernameTaken(username.to_string()));
        }
        let chatterer = Chatterer::new(username, client_public_key, server_private_key);
        chatterers.insert(username.to_string(), chatterer.clone());
        Ok(chatterer)
    }

    async fn chatterer_fetch_by_username(&self, username: &str) -> Result<Chatterer> {
        self.chatterers
            .lock()
            .get(username)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chatterer {username}")))
    }

    async fn chatterer_update(&self, chatterer: &Chatterer) -> Result<()> {
        match self.chatterers.lock().get_mut(&chatterer.username) {
            Some(stored) => {
                *stored = chatterer.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("chatterer {}", chatterer.username))),
        }
    }

    async fn chatterer_delete_by_username(&self, username: &str) -> Result<()> {
        self.chatterers.lock().remove(username);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn create_fetch_update_delete() {
        let storage = MemoryStorage::new();
        let client = fixtures::first();
        let server = fixtures::second();

        let created = storage
            .chatterer_create("alice", client.public.clone(), server.private.clone())
            .await
            .unwrap();
        assert_eq!(created.username, "alice");
        assert!(created.token.is_none());

        let mut fetched = storage.chatterer_fetch_by_username("alice").await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.client_public_key, client.public);

        fetched.token = Some("t".into());
        storage.chatterer_update(&fetched).await.unwrap();
        let fetched = storage.chatterer_fetch_by_username("alice").await.unwrap();
        assert_eq!(fetched.token.as_deref(), Some("t"));

        storage.chatterer_delete_by_username("alice").await.unwrap();
        storage.chatterer_delete_by_username("alice").await.unwrap();
        let err = storage.chatterer_fetch_by_username("alice").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let storage = MemoryStorage::new();
        let pair = fixtures::first();
        storage
            .chatterer_create("bob", pair.public.clone(), pair.private.clone())
            .await
            .unwrap();
        let err = storage
            .chatterer_create("bob", pair.public.clone(), pair.private.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UsernameTaken(name) if name == "bob"));
    }

    #[tokio::test]
    async fn update_of_unknown_account_fails() {
        let storage = MemoryStorage::new();
        let pair = fixtures::first();
        let ghost = Chatterer::new("ghost", pair.public.clone(), pair.private.clone());
        let err = storage.chatterer_update(&ghost).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
