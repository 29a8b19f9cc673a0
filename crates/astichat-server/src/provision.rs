//! Account provisioning.
//!
//! Creates the per-account key material, stores the account and returns the
//! credentials bundle the chatterer will run their client with.

use anyhow::{anyhow, bail, Context, Result};
use astichat::storage::Storage;
use astichat::{Credentials, Error, KeyPair};
use tracing::info;
use zeroize::Zeroizing;

use crate::config::ServerConfig;

pub async fn provision(
    storage: &dyn Storage,
    config: &ServerConfig,
    username: &str,
    passphrase: &str,
) -> Result<Credentials> {
    let username = username.trim();
    if username.is_empty() {
        bail!("please enter a username");
    }
    if username.chars().any(char::is_whitespace) {
        bail!("username {username:?} must not contain whitespace");
    }
    if passphrase.is_empty() {
        bail!("please enter a passphrase");
    }

    // Key generation takes seconds at production sizes; fail fast first.
    match storage.chatterer_fetch_by_username(username).await {
        Ok(_) => return Err(Error::UsernameTaken(username.to_string()).into()),
        Err(Error::NotFound(_)) => {}
        Err(err) => return Err(err).context("checking username availability"),
    }

    let bits = config.key_bits;
    let passphrase = Zeroizing::new(passphrase.to_string());
    let (client, server) = tokio::task::spawn_blocking(move || -> astichat::Result<_> {
        let client = KeyPair::generate(bits, Some(passphrase.as_str()))?;
        let server = KeyPair::generate(bits, None)?;
        Ok((client, server))
    })
    .await
    .map_err(|e| anyhow!("key generation task failed: {e}"))??;

    let chatterer = storage
        .chatterer_create(username, client.public.clone(), server.private)
        .await
        .with_context(|| format!("creating chatterer {username}"))?;
    info!(username = %chatterer.username, id = %chatterer.id, bits, "chatterer provisioned");

    Ok(Credentials {
        username: chatterer.username,
        client_private_key: client.private.marshal()?,
        server_public_key: server.public,
        server_udp_addr: config.advertised_udp_addr(),
        server_http_url: config.advertised_http_url(),
    })
}
