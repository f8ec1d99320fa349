//! Shadow ("temp") table lifecycle and the file-version guard.
//!
//! A rebuild writes into a shadow table named after its source. After a
//! failover the new master reopens that table by name, so it must be able to
//! tell a table it can trust from one left over by an older attempt: every
//! file of the shadow table must carry a version strictly newer than every
//! file of the source.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::request::TableDescriptor;
use crate::retry::RetryPolicy;

/// Longest table name the storage engine accepts, in bytes.
pub const MAX_TABLE_NAME_LEN: usize = 31;

/// Storage-engine error.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct StorageError(pub String);

/// Per-file version stamps of one table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileVersions {
    /// Main record file followed by one entry per blob file
    pub data: Vec<u64>,
    /// One entry per index file
    pub indexes: Vec<u64>,
}

impl FileVersions {
    /// Largest version of any file; 0 when the table has no files.
    #[must_use]
    pub fn max(&self) -> u64 {
        self.data.iter().chain(&self.indexes).copied().max().unwrap_or(0)
    }

    /// Smallest version of any file; `u64::MAX` when the table has no files.
    #[must_use]
    pub fn min(&self) -> u64 {
        self.data
            .iter()
            .chain(&self.indexes)
            .copied()
            .min()
            .unwrap_or(u64::MAX)
    }
}

/// The parts of the storage engine the guard needs.
#[async_trait]
pub trait TableStorage: Send + Sync + 'static {
    /// Open table handle
    type Handle: Send + Sync + 'static;

    /// Storage transaction
    type Txn: Send + 'static;

    /// Reopens an existing table, `None` if nothing exists under `name`.
    async fn open_existing(
        &self,
        name: &str,
        source: &TableDescriptor,
    ) -> Result<Option<Self::Handle>, StorageError>;

    /// Creates a fresh table shaped like `source`.
    async fn create(&self, name: &str, source: &TableDescriptor)
    -> Result<Self::Handle, StorageError>;

    /// Reads the version stamp of every file of a table.
    async fn file_versions(&self, handle: &Self::Handle) -> Result<FileVersions, StorageError>;

    /// Sets the blob-stripe generation id.
    async fn set_blobstripe_genid(
        &self,
        handle: &Self::Handle,
        genid: u64,
    ) -> Result<(), StorageError>;

    /// Closes a table handle.
    async fn close(&self, handle: &Self::Handle) -> Result<(), StorageError>;

    /// Begins a transaction.
    async fn begin(&self) -> Result<Self::Txn, StorageError>;

    /// Deletes a table's files within `txn`.
    async fn delete_table(&self, txn: &mut Self::Txn, handle: &Self::Handle)
    -> Result<(), StorageError>;

    /// Deletes a table's file-version records within `txn`.
    async fn delete_file_versions(&self, txn: &mut Self::Txn, name: &str)
    -> Result<(), StorageError>;

    /// Commits `txn`.
    async fn commit(&self, txn: Self::Txn) -> Result<(), StorageError>;

    /// Aborts `txn`.
    async fn abort(&self, txn: Self::Txn) -> Result<(), StorageError>;
}

/// An open shadow table.
#[derive(Debug)]
pub struct TempTable<H> {
    name: String,
    handle: H,
}

impl<H> TempTable<H> {
    /// On-disk name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage handle.
    pub const fn handle(&self) -> &H {
        &self.handle
    }
}

/// Opens, verifies and reclaims shadow tables.
pub struct TempTableVersionGuard<S> {
    storage: Arc<S>,
    prefix: String,
    cleanup: RetryPolicy,
}

impl<S: TableStorage> TempTableVersionGuard<S> {
    /// Create a new guard
    pub fn new(storage: Arc<S>, prefix: impl Into<String>, cleanup: RetryPolicy) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            cleanup,
        }
    }

    /// Deterministic shadow name for `table`, truncated to the engine limit.
    #[must_use]
    pub fn temp_name(&self, table: &str) -> String {
        let mut name = format!("{}{table}", self.prefix);
        if name.len() > MAX_TABLE_NAME_LEN {
            let mut end = MAX_TABLE_NAME_LEN;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        name
    }

    /// Opens the shadow table for `source`.
    ///
    /// When resuming, the table left by the previous master is reopened if it
    /// still exists. Either way the source's blob-stripe generation id is
    /// copied onto the result.
    pub async fn open_or_create(
        &self,
        source: &TableDescriptor,
        resume: bool,
    ) -> Result<TempTable<S::Handle>> {
        let name = self.temp_name(&source.name);

        let reopened = if resume {
            let existing = self.storage.open_existing(&name, source).await?;
            if existing.is_some() {
                info!(table = %source.name, temp = %name, "reopened shadow table");
            } else {
                info!(
                    table = %source.name,
                    temp = %name,
                    "shadow table does not exist, creating a new one"
                );
            }
            existing
        } else {
            None
        };

        let handle = match reopened {
            Some(handle) => handle,
            None => self.storage.create(&name, source).await.map_err(|e| {
                error!(table = %source.name, temp = %name, "failed to create shadow table: {e}");
                e
            })?,
        };

        self.storage
            .set_blobstripe_genid(&handle, source.blobstripe_genid)
            .await?;

        Ok(TempTable { name, handle })
    }

    /// Checks that every shadow file is newer than every source file.
    pub async fn verify(
        &self,
        table: &str,
        source: &S::Handle,
        temp: &TempTable<S::Handle>,
    ) -> Result<()> {
        let source_max = self.storage.file_versions(source).await?.max();
        let temp_min = self.storage.file_versions(&temp.handle).await?.min();

        if source_max >= temp_min {
            error!(
                table,
                temp = %temp.name,
                source_max,
                temp_min,
                "shadow table is older than its source"
            );
            return Err(Error::InvariantViolation {
                table: table.to_string(),
                source_max,
                temp_min,
            });
        }

        debug!(table, source_max, temp_min, "shadow table versions verified");
        Ok(())
    }

    /// Closes and deletes a shadow table together with its version records.
    ///
    /// Deadlocks with concurrent writers are expected, so each attempt runs in
    /// its own transaction and failed attempts back off before retrying.
    pub async fn destroy(&self, temp: TempTable<S::Handle>) -> Result<()> {
        if let Err(e) = self.storage.close(&temp.handle).await {
            error!(temp = %temp.name, "failed closing shadow table: {e}");
            return Err(e.into());
        }

        let max_attempts = self.cleanup.max_attempts.max(1);
        let mut txn = self.storage.begin().await?;
        let mut attempt = 1;

        loop {
            match self.delete_in(&mut txn, &temp).await {
                Ok(()) => break,
                Err(e) if attempt >= max_attempts => {
                    error!(temp = %temp.name, attempts = attempt, "giving up deleting shadow table: {e}");
                    if let Err(abort) = self.storage.abort(txn).await {
                        warn!(temp = %temp.name, "abort failed: {abort}");
                    }
                    return Err(e.into());
                }
                Err(e) => {
                    debug!(temp = %temp.name, attempt, "delete attempt failed: {e}");
                    if let Err(abort) = self.storage.abort(txn).await {
                        warn!(temp = %temp.name, "abort failed: {abort}");
                    }
                    tokio::time::sleep(self.cleanup.delay_after(attempt)).await;
                    txn = self.storage.begin().await.map_err(|e| {
                        error!(temp = %temp.name, "failed to begin transaction: {e}");
                        e
                    })?;
                    attempt += 1;
                }
            }
        }

        self.storage.commit(txn).await?;
        info!(temp = %temp.name, attempts = attempt, "shadow table deleted");
        Ok(())
    }

    async fn delete_in(
        &self,
        txn: &mut S::Txn,
        temp: &TempTable<S::Handle>,
    ) -> Result<(), StorageError> {
        self.storage.delete_table(txn, &temp.handle).await?;
        self.storage.delete_file_versions(txn, &temp.name).await
    }
}

impl<S> std::fmt::Debug for TempTableVersionGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempTableVersionGuard")
            .field("prefix", &self.prefix)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}
