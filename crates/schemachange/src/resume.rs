//! Picks up schema changes interrupted by a crash or failover.
//!
//! Run by a node right after it becomes master. Operators can veto a resume by
//! creating the abort marker file before the new master comes up.

use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use schemachange_llmeta::MetaStore;

use crate::client::ClientStream;
use crate::coordinator::{ChangeReport, Coordinator};
use crate::error::{Error, Result};
use crate::request::ChangeKind;

/// Operator-created file that cancels the next resume.
#[derive(Clone, Debug)]
pub struct AbortMarker {
    path: PathBuf,
}

impl AbortMarker {
    /// Marker at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the marker file exists.
    pub async fn is_present(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Deletes the marker file.
    pub async fn remove(&self) -> Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        Ok(())
    }
}

/// What a resume pass did.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// No table had an in-progress marker
    Idle,
    /// The operator abort marker cancelled the change
    Cancelled {
        /// Table whose change was cancelled
        table: String,
    },
    /// A marker was found for a change that cannot be resumed
    Skipped {
        /// Table carrying the marker
        table: String,
        /// Kind of the persisted change
        kind: ChangeKind,
    },
    /// The change was restarted on a worker task
    Resumed {
        /// Table being altered
        table: String,
        /// Worker running the change
        handle: JoinHandle<Result<ChangeReport>>,
    },
}

/// Scans for interrupted changes and restarts them.
#[derive(Debug)]
pub struct ResumeManager<S> {
    coordinator: Coordinator<S>,
    abort_marker: AbortMarker,
}

impl<S: MetaStore> ResumeManager<S> {
    /// Creates a manager using the coordinator's configured abort marker path.
    pub fn new(coordinator: Coordinator<S>) -> Self {
        let abort_marker = AbortMarker::new(coordinator.config().abort_marker_path());
        Self {
            coordinator,
            abort_marker,
        }
    }

    /// The abort marker this manager honours.
    #[must_use]
    pub const fn abort_marker(&self) -> &AbortMarker {
        &self.abort_marker
    }

    /// Resumes the first interrupted change found.
    ///
    /// Only one change is resumed per call; the in-flight gate admits one
    /// change at a time, so remaining markers wait for the next pass.
    pub async fn resume_all(&self) -> Result<ResumeOutcome> {
        if !self.coordinator.monitor().is_master().await {
            warn!("not the master, cannot resume a schema change");
            return Err(Error::NotMaster);
        }

        if let Some(stale) = self.coordinator.gate().reset() {
            info!(
                table = %stale.table,
                seed = stale.seed,
                "discarding in-flight schema change left from the previous role"
            );
        }

        for table in self.coordinator.catalog().table_names().await {
            let mut request = match self.coordinator.progress().read_in_progress(&table).await {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(Error::Codec(e)) => {
                    error!(table, "could not unpack the schema change data retrieved from the low level meta table: {e}");
                    return Err(Error::Codec(e));
                }
                Err(e) => {
                    warn!(table, "failed to discover whether table is in the middle of a schema change: {e}");
                    continue;
                }
            };

            warn!(table, kind = %request.kind(), "table is in the middle of a schema change, resuming");

            if self.abort_marker.is_present().await {
                match self.coordinator.progress().clear_in_progress(&table).await {
                    Ok(()) => {
                        warn!(table, "Cancelling schema change");
                        if let Err(e) = self.abort_marker.remove().await {
                            error!(
                                path = %self.abort_marker.path().display(),
                                "can't delete abort marker file, future schema changes may abort: {e}"
                            );
                        }
                        return Ok(ResumeOutcome::Cancelled { table });
                    }
                    Err(e) => error!(table, "failed to cancel resuming schema change: {e}"),
                }
            }

            let kind = request.kind();
            if kind.is_upgrade() {
                debug!(table, "this was a table upgrade, skipping");
                return Ok(ResumeOutcome::Skipped { table, kind });
            }
            if !kind.is_resumable() {
                error!(table, %kind, "only table alters can resume");
                return Ok(ResumeOutcome::Skipped { table, kind });
            }

            request.mark_for_resume();
            let handle = self.coordinator.resume(request, ClientStream::detached())?;
            return Ok(ResumeOutcome::Resumed { table, handle });
        }

        debug!("no schema change to resume");
        Ok(ResumeOutcome::Idle)
    }
}
