//! Process-wide schema lock. Table-definition mutations happen only while it
//! is held for writing.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

/// Guard for exclusive schema access.
pub type SchemaWriteGuard = OwnedRwLockWriteGuard<()>;

/// Guard for shared schema access.
pub type SchemaReadGuard = OwnedRwLockReadGuard<()>;

/// Readers/writer lock over the schema.
#[derive(Clone, Debug, Default)]
pub struct SchemaLock {
    inner: Arc<RwLock<()>>,
}

impl SchemaLock {
    /// Creates a new lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access.
    pub async fn write(&self) -> SchemaWriteGuard {
        trace!("waiting for schema write lock");
        Arc::clone(&self.inner).write_owned().await
    }

    /// Waits for shared access.
    pub async fn read(&self) -> SchemaReadGuard {
        Arc::clone(&self.inner).read_owned().await
    }

    /// Whether a writer currently holds the lock.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.inner.try_read().is_err()
    }
}
