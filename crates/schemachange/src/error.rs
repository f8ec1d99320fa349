//! Error types for schema-change coordination

use thiserror::Error;

use crate::codec::CodecError;
use crate::dispatcher::DispatchError;
use crate::temp_table::StorageError;

/// Result type for schema-change operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Schema-change errors.
///
/// Non-failure terminal states (commit pending, master downgrade) are
/// reported through [`crate::Outcome`], not here.
#[derive(Debug, Error)]
pub enum Error {
    /// The low-level metadata store could not record or clear a marker
    #[error("low level meta table error: {0}")]
    Llmeta(String),

    /// The cluster did not agree to the change
    #[error("schema change proposal failed: {0}")]
    ProposeFailed(String),

    /// A shadow table's files are not all newer than the source table's
    #[error(
        "temp table for {table} is stale: source max file version {source_max:#018x} >= temp min file version {temp_min:#018x}"
    )]
    InvariantViolation {
        /// Source table name
        table: String,
        /// Largest file version of the source table
        source_max: u64,
        /// Smallest file version of the temp table
        temp_min: u64,
    },

    /// The execution dispatcher reported a failure
    #[error("schema change failed: {0}")]
    DispatchFailed(#[from] DispatchError),

    /// One shard of a partitioned view failed; earlier shards are kept
    #[error("shard {index} ({shard}) failed: {source}")]
    ShardFailed {
        /// Shard table name
        shard: String,
        /// Position of the shard in the view
        index: usize,
        /// Underlying error
        source: Box<Error>,
    },

    /// Storage engine error while managing a temp table
    #[error("temp table error: {0}")]
    TempTable(#[from] StorageError),

    /// Another schema change already holds the in-flight gate
    #[error("a schema change is already running on table {table}")]
    AlreadyRunning {
        /// Table of the running change
        table: String,
    },

    /// This node is not the master
    #[error("not the master, cannot run a schema change")]
    NotMaster,

    /// Marker encoding or decoding failed
    #[error("marker codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A dry run found the change cannot be applied
    #[error("dry run rejected: {0}")]
    DryRunRejected(String),

    /// The worker task running a change panicked or was cancelled
    #[error("schema change worker failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Worker(err.to_string())
    }
}
