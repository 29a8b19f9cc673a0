//! Account storage persisted as a single JSON document.
//!
//! The file is the source of truth: every mutation re-reads it, applies the
//! change and rewrites the whole document through a staging file and a
//! rename, so a crash never leaves a half-written document behind and an
//! account added by `provision` while the server runs is neither missed nor
//! clobbered. A lookup that misses the in-memory copy reloads the file once.
//!
//! Two processes writing at the very same moment can still race between
//! read and rename; writes are rare (provisioning, token issuance), so there
//! is no cross-process file lock. File I/O runs on the blocking pool. Every
//! account holds a server private key, so the file is kept owner-readable only.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use astichat::storage::Storage;
use astichat::{Chatterer, Error, PrivateKey, PublicKey, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

type Accounts = HashMap<String, Chatterer>;

pub struct JsonFileStorage {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    chatterers: Mutex<Accounts>,
}

impl JsonFileStorage {
    /// Open `path`, starting empty when it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let chatterers = load(&path)?;
        debug!(path = %path.display(), accounts = chatterers.len(), "storage opened");
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                chatterers: Mutex::new(chatterers),
            }),
        })
    }

    /// Accounts in the in-memory copy.
    pub fn len(&self) -> usize {
        self.inner.chatterers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.chatterers.lock().is_empty()
    }

    async fn blocking<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || job(&inner))
            .await
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, format!("storage task: {e}"))))?
    }
}

impl Inner {
    /// Re-read the file, apply `change`, persist, then make it current.
    fn mutate<T>(&self, change: impl FnOnce(&mut Accounts) -> Result<T>) -> Result<T> {
        let mut current = self.chatterers.lock();
        let mut next = load(&self.path)?;
        let out = change(&mut next)?;
        self.persist(&next)?;
        *current = next;
        Ok(out)
    }

    fn fetch(&self, username: &str) -> Result<Chatterer> {
        let mut current = self.chatterers.lock();
        if let Some(chatterer) = current.get(username) {
            return Ok(chatterer.clone());
        }
        *current = load(&self.path)?;
        current
            .get(username)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chatterer {username}")))
    }

    fn persist(&self, chatterers: &Accounts) -> Result<()> {
        let mut records: Vec<&Chatterer> = chatterers.values().collect();
        records.sort_by(|a, b| a.username.cmp(&b.username));
        let json = serde_json::to_vec_pretty(&records)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("staging");
        {
            let mut file = File::create(&staging)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        restrict_permissions(&staging);
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<Accounts> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let records: Vec<Chatterer> = serde_json::from_slice(&fs::read(path)?)?;
    Ok(records.into_iter().map(|c| (c.username.clone(), c)).collect())
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn chatterer_create(
        &self,
        username: &str,
        client_public_key: PublicKey,
        server_private_key: PrivateKey,
    ) -> Result<Chatterer> {
        let username = username.to_string();
        self.blocking(move |inner| {
            inner.mutate(|chatterers| {
                if chatterers.contains_key(&username) {
                    return Err(Error::UsernameTaken(username.clone()));
                }
                let chatterer = Chatterer::new(username.clone(), client_public_key, server_private_key);
                chatterers.insert(username, chatterer.clone());
                Ok(chatterer)
            })
        })
        .await
    }

    async fn chatterer_fetch_by_username(&self, username: &str) -> Result<Chatterer> {
        let username = username.to_string();
        self.blocking(move |inner| inner.fetch(&username)).await
    }

    async fn chatterer_update(&self, chatterer: &Chatterer) -> Result<()> {
        let chatterer = chatterer.clone();
        self.blocking(move |inner| {
            inner.mutate(|chatterers| match chatterers.get_mut(&chatterer.username) {
                Some(stored) => {
                    *stored = chatterer;
                    Ok(())
                }
                None => Err(Error::NotFound(format!("chatterer {}", chatterer.username))),
            })
        })
        .await
    }

    async fn chatterer_delete_by_username(&self, username: &str) -> Result<()> {
        let username = username.to_string();
        self.blocking(move |inner| {
            inner.mutate(|chatterers| {
                chatterers.remove(&username);
                Ok(())
            })
        })
        .await
    }
}
