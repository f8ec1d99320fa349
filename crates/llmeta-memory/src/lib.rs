//! In-memory (single node) implementation of the low-level metadata store for
//! tests and local development.
//!
//! Every clone and every scoped view of a [`MemoryMetaStore`] shares the same
//! backing map, so state written through one view outlives the components
//! that wrote it. Tests use this to simulate a process restart: drop the
//! coordinator, build a new one over the same store, and read back.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use schemachange_llmeta::{MetaStore, MetaStore1};
use tokio::sync::Mutex;
use tracing::trace;

const SCOPE_SEPARATOR: char = ':';

/// In-memory metadata store.
#[derive(Clone, Debug, Default)]
pub struct MemoryMetaStore {
    map: Arc<Mutex<BTreeMap<String, Bytes>>>,
    prefix: Option<String>,
}

impl MemoryMetaStore {
    /// Creates a new, empty `MemoryMetaStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across every scope.
    pub async fn len(&self) -> usize {
        self.map.lock().await.len()
    }

    /// Whether the store holds no entries in any scope.
    pub async fn is_empty(&self) -> bool {
        self.map.lock().await.is_empty()
    }

    fn full_key<K: Into<String>>(&self, key: K) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{SCOPE_SEPARATOR}{}", key.into()),
            None => key.into(),
        }
    }

    fn strip_scope<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix(SCOPE_SEPARATOR)),
            None => Some(key),
        }
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    type Error = Error;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error> {
        let key = self.full_key(key);
        trace!(%key, "llmeta del");
        self.map.lock().await.remove(&key);
        Ok(())
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map.get(&self.full_key(key)).cloned())
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let map = self.map.lock().await;
        Ok(map
            .keys()
            .filter_map(|key| self.strip_scope(key))
            .map(str::to_string)
            .collect())
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error> {
        let key = self.full_key(key);
        trace!(%key, len = bytes.len(), "llmeta put");
        self.map.lock().await.insert(key, bytes);
        Ok(())
    }
}

impl MetaStore1 for MemoryMetaStore {
    type Error = Error;
    type Scoped = Self;

    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped {
        let prefix = match &self.prefix {
            Some(existing) => format!("{existing}{SCOPE_SEPARATOR}{}", scope.into()),
            None => scope.into(),
        };

        Self {
            map: Arc::clone(&self.map),
            prefix: Some(prefix),
        }
    }
}
