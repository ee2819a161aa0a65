//! Secret persistence.
//!
//! Secrets are plain strings addressed by an [`Identity`] and a secret kind, e.g. `authn-token`.
//! The engine never interprets storage beyond that, so any platform backend can satisfy
//! [`SecretStore`]. [`KeyringStore`], backed by the platform's credential vault, is the default.

use std::{
    cell::Cell,
    collections::HashMap,
    hash::{Hash, Hasher},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tokio::{fs, sync::RwLock};

use crate::{Identity, CLIENT_NAME};

/// A key/value store for secrets.
///
/// Implementations are expected to keep values confidential at rest. Writes replace the whole
/// value; there is no compare-and-swap, so concurrent writers race and the last one wins.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret, returning `None` if it has never been set.
    async fn get(&self, identity: &Identity, kind: &str) -> Result<Option<String>, StoreError>;

    /// Write a secret, replacing any previous value.
    async fn set(&self, identity: &Identity, kind: &str, value: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    async fn get(&self, identity: &Identity, kind: &str) -> Result<Option<String>, StoreError> {
        (**self).get(identity, kind).await
    }

    async fn set(&self, identity: &Identity, kind: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(identity, kind, value).await
    }
}

/// An error reading or writing secrets.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing file could not be read or written.
    #[error("failed to {action} secret file {}: {source}", .path.display())]
    Io {
        /// What was being attempted.
        action: &'static str,
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The backing file exists but could not be decoded.
    #[error("corrupt secret file {}: {source}", .path.display())]
    Corrupt {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A stored value could not be interpreted.
    #[error("invalid {kind} secret: {message}")]
    Invalid {
        /// The kind of secret.
        kind: String,
        /// What was wrong with it.
        message: String,
    },

    /// The platform credential vault couldn't be used.
    #[error("keyring access failed: {0}")]
    Keyring(#[source] keyring::Error),

    /// Any other backend failure.
    #[error("secret store failed: {0}")]
    Backend(String),
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A value with an absolute expiry instant.
///
/// A value is expired from its expiry instant onwards, so validity is a plain comparison with the
/// current time.
pub trait Expiry {
    /// When the value expires.
    fn expires_at(&self) -> DateTime<Utc>;

    /// Whether the value is expired at `now`.
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Whether the value is expired now.
    fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A [`SecretStore`] backed by the platform credential vault.
///
/// - macOS: Keychain
/// - Linux: Secret Service (GNOME Keyring, KWallet)
/// - Windows: Credential Manager
///
/// Each secret is an entry whose service is `awssso.<idp host>.<kind>` and whose user is the
/// identity's user name.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    /// Construct a store over the platform credential vault.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn entry(identity: &Identity, kind: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&identity.service_name(kind), &identity.username)
            .map_err(StoreError::Keyring)
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, identity: &Identity, kind: &str) -> Result<Option<String>, StoreError> {
        let entry = Self::entry(identity, kind)?;
        let secret = tokio::task::spawn_blocking(move || entry.get_password())
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?;

        match secret {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(StoreError::Keyring(error)),
        }
    }

    async fn set(&self, identity: &Identity, kind: &str, value: &str) -> Result<(), StoreError> {
        let entry = Self::entry(identity, kind)?;
        let value = value.to_string();
        tokio::task::spawn_blocking(move || entry.set_password(&value))
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?
            .map_err(StoreError::Keyring)?;

        tracing::debug!(kind, "stored secret in keyring");
        Ok(())
    }
}

/// A [`SecretStore`] keeping one file per secret in a private directory.
///
/// Secrets are written in the clear, readable only by the owner. Prefer [`KeyringStore`] where a
/// credential vault is available.
///
/// File names are hashes of the secret's service name and user name, so directory listings don't
/// reveal which portals are in use. On unix, files are created readable by the owner only.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

#[derive(serde::Deserialize, serde::Serialize)]
struct SecretFile {
    service: String,
    account: String,
    secret: String,
}

impl FileStore {
    /// Construct a store in the given directory. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A store in the user's local data directory, if one can be determined.
    #[must_use]
    pub fn default_location() -> Option<Self> {
        dirs_next::data_local_dir().map(|mut path| {
            path.push(CLIENT_NAME);
            path.push("secrets");
            Self::new(path)
        })
    }

    fn path(&self, service: &str, account: &str) -> PathBuf {
        let mut hasher = Md5Hasher::new();
        (service, account).hash(&mut hasher);
        self.dir.join(format!("{:x}.json", hasher.finish()))
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, identity: &Identity, kind: &str) -> Result<Option<String>, StoreError> {
        let service = identity.service_name(kind);
        let path = self.path(&service, &identity.username);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::io("read", &path, error)),
        };
        let file: SecretFile = serde_json::from_str(&content)
            .map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;

        // A hash collision would otherwise hand out another secret.
        if file.service != service || file.account != identity.username {
            return Ok(None);
        }
        Ok(Some(file.secret))
    }

    async fn set(&self, identity: &Identity, kind: &str, value: &str) -> Result<(), StoreError> {
        let service = identity.service_name(kind);
        let path = self.path(&service, &identity.username);
        let content = serde_json::to_string(&SecretFile {
            service,
            account: identity.username.clone(),
            secret: value.to_string(),
        })
        .map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|error| StoreError::io("create directory for", &path, error))?;

        let tmp = path.with_extension("json.tmp");
        write_private(&tmp, content.as_bytes())
            .await
            .map_err(|error| StoreError::io("write", &tmp, error))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|error| StoreError::io("replace", &path, error))?;

        tracing::debug!(kind, path = %path.display(), "stored secret");
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) async fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.flush().await
}

#[cfg(not(unix))]
pub(crate) async fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    fs::write(path, content).await
}

/// An in-memory [`SecretStore`].
///
/// Clones share the same underlying map. Failures can be injected with
/// [`fail_gets`](Self::fail_gets) and [`fail_sets`](Self::fail_sets) to exercise error paths.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    secrets: HashMap<(String, String), String>,
    get_error: Option<String>,
    set_error: Option<String>,
}

impl MemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail with the given message (or succeed again with `None`).
    pub async fn fail_gets(&self, message: Option<&str>) {
        self.state.write().await.get_error = message.map(str::to_string);
    }

    /// Make subsequent writes fail with the given message (or succeed again with `None`).
    pub async fn fail_sets(&self, message: Option<&str>) {
        self.state.write().await.set_error = message.map(str::to_string);
    }

    /// The number of stored secrets.
    pub async fn len(&self) -> usize {
        self.state.read().await.secrets.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, identity: &Identity, kind: &str) -> Result<Option<String>, StoreError> {
        let state = self.state.read().await;
        if let Some(message) = &state.get_error {
            return Err(StoreError::Backend(message.clone()));
        }
        let key = (identity.service_name(kind), identity.username.clone());
        Ok(state.secrets.get(&key).cloned())
    }

    async fn set(&self, identity: &Identity, kind: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.set_error {
            return Err(StoreError::Backend(message.clone()));
        }
        let key = (identity.service_name(kind), identity.username.clone());
        state.secrets.insert(key, value.to_string());
        Ok(())
    }
}

/// A [`Hasher`] backed by MD5, for stable file names across runs and platforms.
pub(crate) struct Md5Hasher {
    inner: Cell<Option<Md5>>,
}

impl Md5Hasher {
    pub(crate) fn new() -> Self {
        Self {
            inner: Cell::new(Some(Md5::new())),
        }
    }
}

impl Hasher for Md5Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.inner
            .get_mut()
            .as_mut()
            .expect("wrote to finished hasher")
            .update(bytes);
    }

    fn finish(&self) -> u64 {
        let digest: [u8; 16] = self
            .inner
            .take()
            .expect("finished hash twice")
            .finalize()
            .into();
        u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) ^ u64::from_be_bytes([
            digest[8], digest[9], digest[10], digest[11], digest[12], digest[13], digest[14],
            digest[15],
        ])
    }
}
