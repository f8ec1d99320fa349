//! Collaborators that do the actual work of a change.
//!
//! The coordinator sequences; these traits execute. Implementations resolve and
//! attach table descriptors to the request they are handed so the coordinator
//! can do its bookkeeping afterwards. Rebuilding implementations own the
//! shadow table lifecycle through [`crate::temp_table::TempTableVersionGuard`].

use async_trait::async_trait;
use thiserror::Error;

use crate::request::{LuaFunctionKind, ProcedureAction, SchemaChangeRequest};

/// Failure reported by an execution collaborator.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct DispatchError(pub String);

impl DispatchError {
    /// Create a new error
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-kind execution and finalize steps.
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync + 'static {
    /// Rebuilds a table to its new definition.
    ///
    /// A resumed request (`flags().resume`) may find the shadow table left by
    /// the previous master. Implementations must open it through
    /// [`TempTableVersionGuard::open_or_create`] and pass
    /// [`TempTableVersionGuard::verify`] before writing into it; on
    /// [`Error::InvariantViolation`] the shadow table is stale and the change
    /// must fail rather than continue the rebuild.
    ///
    /// [`TempTableVersionGuard::open_or_create`]: crate::temp_table::TempTableVersionGuard::open_or_create
    /// [`TempTableVersionGuard::verify`]: crate::temp_table::TempTableVersionGuard::verify
    /// [`Error::InvariantViolation`]: crate::error::Error::InvariantViolation
    async fn alter_table(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError>;

    /// Creates a table.
    async fn add_table(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError>;

    /// Truncates and re-initialises a table.
    async fn fast_init(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError>;

    /// Changes the data stripe count.
    async fn alter_stripes(&self, request: &mut SchemaChangeRequest)
    -> Result<(), DispatchError>;

    /// Alters a queue.
    async fn alter_queue(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError>;

    /// Upgrades records to the current on-disk format.
    async fn upgrade_table(&self, request: &mut SchemaChangeRequest)
    -> Result<(), DispatchError>;

    /// Manages a stored procedure.
    async fn stored_procedure(
        &self,
        request: &mut SchemaChangeRequest,
        action: ProcedureAction,
    ) -> Result<(), DispatchError>;

    /// Updates a trigger.
    async fn trigger(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError>;

    /// Manages a Lua function.
    async fn lua_function(
        &self,
        request: &mut SchemaChangeRequest,
        kind: LuaFunctionKind,
    ) -> Result<(), DispatchError>;

    /// Swaps in a rebuilt table. Called with the schema lock held.
    async fn finalize_alter_table(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError>;

    /// Publishes a new table. Called with the schema lock held.
    async fn finalize_add_table(&self, request: &mut SchemaChangeRequest)
    -> Result<(), DispatchError>;

    /// Publishes a re-initialised table. Called with the schema lock held.
    async fn finalize_fast_init(&self, request: &mut SchemaChangeRequest)
    -> Result<(), DispatchError>;

    /// Records a finished upgrade. Called with the schema lock held.
    async fn finalize_upgrade_table(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError>;

    /// Publishes a trigger. Called with the schema lock held.
    async fn finalize_trigger(&self, request: &mut SchemaChangeRequest)
    -> Result<(), DispatchError>;

    /// Publishes a Lua function. Called with the schema lock held.
    async fn finalize_lua_function(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError>;
}

/// Read access to table metadata.
#[async_trait]
pub trait Catalog: Send + Sync + 'static {
    /// Canonical on-disk name for `table`, `None` if the table is unknown.
    async fn canonical_name(&self, table: &str) -> Option<String>;

    /// Every table in the database.
    async fn table_names(&self) -> Vec<String>;

    /// Shard tables in order when `table` is a partitioned view.
    async fn partition_shards(&self, table: &str) -> Option<Vec<String>>;

    /// Moves index statistics from `old_tag` to `new_tag`.
    async fn rename_index_stats(
        &self,
        table: &str,
        old_tag: &str,
        new_tag: &str,
    ) -> Result<(), DispatchError>;
}
