//! Online schema-change coordination for a replicated database.
//!
//! This crate decides nothing about *what* a new schema looks like. It owns
//! the sequencing around a change:
//! - durable in-progress markers so a new master can resume after failover
//! - cluster agreement before destructive work starts
//! - cooperative hand-off when the master is downgraded mid-flight
//! - the temp-table version guard that keeps stale shadow tables out; a
//!   dispatcher resuming a rebuild must verify the shadow table through it
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = CoordinatorBuilder::new()
//!     .config(config)
//!     .meta_store(store)
//!     .transport(transport)
//!     .master_role(role)
//!     .dispatcher(dispatcher)
//!     .catalog(catalog)
//!     .build()?;
//!
//! let request = SchemaChangeRequest::new("orders", ChangeKind::AlterTable, ChangeFlags::default());
//! let report = coordinator.start(request, ClientStream::detached())?.await??;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::result_large_err)]

/// Cluster agreement protocol
pub mod agreement;

/// Builder for the coordinator
pub mod builder;

/// Client-facing progress stream
pub mod client;

/// Marker serialization
pub mod codec;

/// Configuration types
pub mod config;

/// Schema-change state machine
pub mod coordinator;

/// External execution collaborators
pub mod dispatcher;

/// Dry-run diagnostics
pub mod dryrun;

/// Error types
pub mod error;

/// Process-wide in-flight gate
pub mod gate;

mod index_rename;

/// Master role observation
pub mod monitor;

/// Durable progress markers
pub mod progress;

/// Change requests
pub mod request;

/// Failover resume
pub mod resume;

/// Retry policies
pub mod retry;

/// Exclusive schema lock
pub mod schema_lock;

/// Shadow table lifecycle
pub mod temp_table;

pub use {
    agreement::{ClusterAgreement, ClusterTransport, ClusterVote, NodeId, ScMessage},
    builder::CoordinatorBuilder,
    client::{ChannelSink, ClientSink, ClientStream},
    config::SchemaChangeConfig,
    coordinator::{ChangeReport, Coordinator, Outcome, PendingChange, ScState},
    dispatcher::{Catalog, DispatchError, ExecutionDispatcher},
    error::{Error, Result},
    gate::{InFlightGate, InFlightGuard},
    monitor::{MasterRole, MasterRoleMonitor},
    progress::DurableProgressStore,
    request::{ChangeFlags, ChangeKind, SchemaChangeRequest, TableDescriptor},
    resume::{AbortMarker, ResumeManager, ResumeOutcome},
    retry::{Backoff, RetryPolicy},
    schema_lock::SchemaLock,
    temp_table::{FileVersions, TableStorage, TempTable, TempTableVersionGuard},
};
