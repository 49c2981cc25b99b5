//! Secure credential store contract
//!
//! The host platform owns the real secure store (keychain, keystore). This
//! module defines the minimal contract the security core relies on, plus two
//! reference implementations: an in-memory map and a directory of small JSON
//! files written atomically.
//!
//! Values are plain strings. Structured values go through [`save_record`] /
//! [`load_record`], which wrap the payload in a versioned envelope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Current schema version for persisted records
pub const RECORD_VERSION: u32 = 1;

/// Well-known keys
pub mod keys {
    /// Reason for the most recent forced logout
    pub const LOGOUT_REASON: &str = "paylock.logout_reason";
    /// Single-slot biometric profile for this device
    pub const BIOMETRIC_PROFILE: &str = "paylock.biometric_profile";
    /// Stable identifier of this installation
    pub const DEVICE_ID: &str = "paylock.device_id";
}

/// Atomic per-key storage of small secrets
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Versioned envelope around persisted values
#[derive(Serialize, Deserialize)]
struct Record<T> {
    version: u32,
    data: T,
}

/// Serialize `value` into a versioned record and store it under `key`
pub async fn save_record<T: Serialize>(
    store: &dyn CredentialStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let record = Record {
        version: RECORD_VERSION,
        data: value,
    };
    let encoded = serde_json::to_string(&record)?;
    store.set(key, &encoded).await
}

/// Load and decode a versioned record
///
/// Records written by a newer schema are rejected rather than misread.
pub async fn load_record<T: DeserializeOwned>(
    store: &dyn CredentialStore,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };

    let record: Record<T> = serde_json::from_str(&raw)?;
    if record.version > RECORD_VERSION {
        return Err(Error::Serialization(format!(
            "record {} has unsupported version {}",
            key, record.version
        )));
    }

    Ok(Some(record.data))
}

/// In-memory credential store
///
/// Used in tests and on platforms where the host injects its own persistence.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// File-backed credential store (one file per key)
#[derive(Debug)]
pub struct FileCredentialStore {
    base_path: PathBuf,
}

impl FileCredentialStore {
    /// Open (and create if needed) a store rooted at `base_path`
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    /// Default location under the user's data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("paylock")
            .join("credentials")
    }

    /// Root directory of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entry_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(Error::StorageFailure(format!("invalid key: {:?}", key)));
        }
        Ok(self.base_path.join(format!("{}.json", key)))
    }
}

/// Create (or truncate) `path` with owner-only permissions and write `value`
async fn write_private(path: &Path, value: &str) -> Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;

    // A leftover temp file keeps its old mode, so tighten it explicitly
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }

    file.write_all(value.as_bytes()).await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key)?;

        // Write atomically; the temp file is private before any byte lands
        let temp_path = path.with_extension("json.tmp");
        write_private(&temp_path, value).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
