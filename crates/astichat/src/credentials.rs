//! Client credentials bundle.
//!
//! Produced once at provisioning time and handed to the chatterer: everything
//! a client needs to reach its server and prove who it is. The client private
//! key inside is sealed with the chatterer's passphrase.

use std::fs::{self, File};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::{PrivateKey, PublicKey};
use crate::protocol::client::ClientIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    /// Textual client private key, passphrase-sealed.
    pub client_private_key: String,
    pub server_public_key: PublicKey,
    pub server_udp_addr: SocketAddr,
    /// Base URL of the server's HTTP surface, e.g. `http://127.0.0.1:4001`.
    pub server_http_url: String,
}

impl Credentials {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the bundle; an existing file is never overwritten.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        let json = serde_json::to_vec_pretty(self)?;
        let staging = path.with_extension("staging");
        {
            let mut file = File::create(&staging)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        restrict_permissions(&staging);
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// Unseal the client private key.
    pub fn identity(&self, passphrase: Option<&str>) -> Result<ClientIdentity> {
        Ok(ClientIdentity {
            username: self.username.clone(),
            private_key: PrivateKey::unmarshal(&self.client_private_key, passphrase)?,
            server_public_key: self.server_public_key.clone(),
        })
    }
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
