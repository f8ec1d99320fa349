//! Abstract interface for the low-level metadata ("llmeta") store.
//!
//! The schema-change subsystem persists its in-progress markers here. Writes
//! travel through the replicated consensus path of the database, so any call
//! may fail transiently; callers own the retry policy.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for `MetaStore` errors
pub trait MetaStoreError: Debug + Error + Send + Sync + 'static {}

/// A key-value view over the low-level metadata table.
///
/// Keys are table names (or other subsystem-specific identifiers); values are
/// opaque blobs whose format belongs to the caller.
#[async_trait]
pub trait MetaStore: Clone + Send + Sync + 'static {
    /// The error type for metadata operations.
    type Error: MetaStoreError;

    /// Removes the value stored under `key`. Removing an absent key succeeds.
    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), Self::Error>;

    /// Reads the value stored under `key`, if any.
    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, Self::Error>;

    /// Lists every key visible through this view.
    async fn keys(&self) -> Result<Vec<String>, Self::Error>;

    /// Durably stores `bytes` under `key`, replacing any previous value.
    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), Self::Error>;
}

/// A metadata store that can hand out views restricted to one namespace.
///
/// Scoped views share the underlying storage; only the key space differs.
pub trait MetaStore1: Clone + Send + Sync + 'static {
    /// The error type for the scoped view.
    type Error: MetaStoreError;

    /// The scoped view type.
    type Scoped: MetaStore<Error = Self::Error>;

    /// Creates a view whose keys live under `scope`.
    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped;
}
