//! Token cache store backends.
//!
//! `MemoryTokenStore` covers single-process deployments and tests;
//! `RedbTokenStore` persists blobs in an embedded redb database with
//! MessagePack values so cached refresh tokens survive restarts.

use anyhow::Context;
use async_trait::async_trait;
use redb::{Database, TableDefinition};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CacheError, CachedTokenBlob, TokenCacheStore};

/// redb table for token cache blobs (key: oid, value: MessagePack bytes).
const TOKEN_CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("token_cache");

/// In-memory token cache store.
#[derive(Default)]
pub struct MemoryTokenStore {
    blobs: RwLock<HashMap<String, CachedTokenBlob>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenCacheStore for MemoryTokenStore {
    async fn load(&self, oid: &str) -> Result<Option<CachedTokenBlob>, CacheError> {
        Ok(self.blobs.read().await.get(oid).cloned())
    }

    async fn save(&self, oid: &str, blob: &CachedTokenBlob) -> Result<(), CacheError> {
        self.blobs
            .write()
            .await
            .insert(oid.to_string(), blob.clone());
        Ok(())
    }

    async fn remove(&self, oid: &str) -> Result<(), CacheError> {
        self.blobs.write().await.remove(oid);
        Ok(())
    }
}

/// Persistent token cache store backed by redb.
pub struct RedbTokenStore {
    db: Database,
}

impl RedbTokenStore {
    /// Open or create a token cache database at the given path.
    pub fn open(path: PathBuf) -> Result<Self, CacheError> {
        Self::open_inner(path).map_err(CacheError)
    }

    fn open_inner(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open token cache database: {:?}", path))?;

        // Initialize the table
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TOKEN_CACHE_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    fn load_inner(&self, oid: &str) -> anyhow::Result<Option<CachedTokenBlob>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TOKEN_CACHE_TABLE)?;

        match table.get(oid)? {
            Some(value) => {
                let blob: CachedTokenBlob = rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize token cache blob")?;
                Ok(Some(blob))
            }
            None => Ok(None),
        }
    }

    fn save_inner(&self, oid: &str, blob: &CachedTokenBlob) -> anyhow::Result<()> {
        let data = rmp_serde::to_vec(blob).context("Failed to serialize token cache blob")?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TOKEN_CACHE_TABLE)?;
            table.insert(oid, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove_inner(&self, oid: &str) -> anyhow::Result<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TOKEN_CACHE_TABLE)?;
            // The guard returned by remove borrows the table; resolve it
            // before the table drops
            let removed = table.remove(oid)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

#[async_trait]
impl TokenCacheStore for RedbTokenStore {
    async fn load(&self, oid: &str) -> Result<Option<CachedTokenBlob>, CacheError> {
        self.load_inner(oid).map_err(CacheError)
    }

    async fn save(&self, oid: &str, blob: &CachedTokenBlob) -> Result<(), CacheError> {
        debug!(has_account = !blob.is_empty(), "Persisting token cache blob");
        self.save_inner(oid, blob).map_err(CacheError)
    }

    async fn remove(&self, oid: &str) -> Result<(), CacheError> {
        self.remove_inner(oid).map(|_| ()).map_err(CacheError)
    }
}
