//! Key-value storage substrate.
//!
//! All domain data lives as string blobs under string keys. Sensitive items (PIN hash,
//! auth token) go to a separate [`Namespace::Secure`] keyspace so that clearing or
//! dumping the standard namespace never touches them.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Keyspace selector for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Regular application data
    Standard,
    /// Credentials and other sensitive items
    Secure,
}

impl Namespace {
    /// Name of the backing tree for this namespace
    #[must_use]
    pub const fn tree_name(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Secure => "secure",
        }
    }
}

/// Uniform async get/set/remove/clear over string keys and values.
///
/// A missing key is `Ok(None)`, never an error. Backend faults surface as
/// [`StoreError::Storage`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<String>>;
    /// Write a value, replacing any previous one
    async fn set(&self, ns: Namespace, key: &str, value: &str) -> Result<()>;
    /// Delete a value; deleting a missing key succeeds
    async fn remove(&self, ns: Namespace, key: &str) -> Result<()>;
    /// Delete every value in the namespace
    async fn clear(&self, ns: Namespace) -> Result<()>;
}

/// Persistent store backed by sled, one tree per namespace.
pub struct SledStore {
    db: sled::Db,
    standard: sled::Tree,
    secure: sled::Tree,
    flush_on_write: bool,
}

impl SledStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>, flush_on_write: bool) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let db = sled::open(path)?;
        Self::from_db(db, flush_on_write)
    }

    /// Open a throwaway store that is deleted on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, false)
    }

    fn from_db(db: sled::Db, flush_on_write: bool) -> Result<Self> {
        let standard = db.open_tree(Namespace::Standard.tree_name())?;
        let secure = db.open_tree(Namespace::Secure.tree_name())?;
        Ok(Self {
            db,
            standard,
            secure,
            flush_on_write,
        })
    }

    const fn tree(&self, ns: Namespace) -> &sled::Tree {
        match ns {
            Namespace::Standard => &self.standard,
            Namespace::Secure => &self.secure,
        }
    }

    async fn maybe_flush(&self, ns: Namespace) -> Result<()> {
        if self.flush_on_write {
            self.tree(ns).flush_async().await?;
        }
        Ok(())
    }

    /// Size of the store on disk in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<String>> {
        debug!(namespace = ns.tree_name(), key, "store get");
        match self.tree(ns).get(key)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| StoreError::Storage(format!("value under `{key}` is not UTF-8: {e}"))),
            None => Ok(None),
        }
    }

    async fn set(&self, ns: Namespace, key: &str, value: &str) -> Result<()> {
        debug!(namespace = ns.tree_name(), key, bytes = value.len(), "store set");
        self.tree(ns).insert(key, value.as_bytes())?;
        self.maybe_flush(ns).await
    }

    async fn remove(&self, ns: Namespace, key: &str) -> Result<()> {
        debug!(namespace = ns.tree_name(), key, "store remove");
        self.tree(ns).remove(key)?;
        self.maybe_flush(ns).await
    }

    async fn clear(&self, ns: Namespace) -> Result<()> {
        self.tree(ns).clear()?;
        self.maybe_flush(ns).await
    }
}

/// In-process store, used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(Namespace, String), String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held in `ns`
    pub async fn len(&self, ns: Namespace) -> usize {
        self.entries.read().await.keys().filter(|(n, _)| *n == ns).count()
    }

    /// Whether `ns` holds no keys
    pub async fn is_empty(&self, ns: Namespace) -> bool {
        self.len(ns).await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(&(ns, key.to_string())).cloned())
    }

    async fn set(&self, ns: Namespace, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((ns, key.to_string()), value.to_string());
        Ok(())
    }

    async fn remove(&self, ns: Namespace, key: &str) -> Result<()> {
        self.entries.write().await.remove(&(ns, key.to_string()));
        Ok(())
    }

    async fn clear(&self, ns: Namespace) -> Result<()> {
        self.entries.write().await.retain(|(n, _), _| *n != ns);
        Ok(())
    }
}
