//! Durable in-progress markers.
//!
//! A marker is the packed request stored under its table name. Its presence is
//! the only proof a new master has that a change was interrupted, so it is
//! written before any work starts and removed only when the change commits or
//! is cancelled.

use tracing::{debug, error, warn};

use schemachange_llmeta::MetaStore;

use crate::client::ClientStream;
use crate::codec::{decode_marker, encode_marker};
use crate::error::{Error, Result};
use crate::monitor::MasterRoleMonitor;
use crate::request::SchemaChangeRequest;
use crate::retry::RetryPolicy;

/// Marker persistence over the low-level metadata store.
#[derive(Clone, Debug)]
pub struct DurableProgressStore<S> {
    store: S,
    policy: RetryPolicy,
    monitor: MasterRoleMonitor,
}

impl<S: MetaStore> DurableProgressStore<S> {
    /// Creates a progress store over an already-scoped metadata view.
    pub const fn new(store: S, policy: RetryPolicy, monitor: MasterRoleMonitor) -> Self {
        Self {
            store,
            policy,
            monitor,
        }
    }

    /// Records `request` as in progress for its table.
    ///
    /// The write is retried per the configured policy. When every attempt
    /// fails on a resumed change, this node gives up mastership so a
    /// healthier node can take the change over.
    pub async fn mark_in_progress(
        &self,
        request: &SchemaChangeRequest,
        client: &ClientStream,
    ) -> Result<()> {
        let table = request.table();
        let blob = encode_marker(request).map_err(|e| {
            client.error("could not pack the schema change data for storage in low level meta table");
            Error::Llmeta(e.to_string())
        })?;

        let written = self
            .policy
            .run(|attempt| {
                let blob = blob.clone();
                async move {
                    let result = self.store.put(table, blob).await;
                    if let Err(e) = &result {
                        warn!(table, attempt, "could not mark schema change in progress: {e}");
                        client.error(
                            "could not mark schema change in progress in the low level meta table, retrying ...",
                        );
                    }
                    result
                }
            })
            .await;

        match written {
            Ok(()) => {
                debug!(table, "schema change marked in progress");
                Ok(())
            }
            Err(exhausted) => {
                error!(
                    table,
                    attempts = exhausted.attempts,
                    "giving up marking schema change in progress: {}",
                    exhausted.last_error
                );
                client.error(format!(
                    "could not mark schema change in progress in the low level meta table, giving up after {} retries",
                    exhausted.attempts
                ));

                if request.flags().resume {
                    client.error(
                        "failed to resume schema change, downgrading to give another master a shot",
                    );
                    self.monitor.step_down().await;
                }

                Err(Error::Llmeta(exhausted.last_error.to_string()))
            }
        }
    }

    /// Removes the marker for `table`. Clearing an absent marker succeeds.
    pub async fn clear_in_progress(&self, table: &str) -> Result<()> {
        self.store.del(table).await.map_err(|e| {
            error!(table, "could not clear schema change marker: {e}");
            Error::Llmeta(e.to_string())
        })?;

        debug!(table, "schema change marker cleared");
        Ok(())
    }

    /// Reads back the marker for `table`, if one exists.
    pub async fn read_in_progress(&self, table: &str) -> Result<Option<SchemaChangeRequest>> {
        let Some(blob) = self
            .store
            .get(table)
            .await
            .map_err(|e| Error::Llmeta(e.to_string()))?
        else {
            return Ok(None);
        };

        Ok(Some(decode_marker(&blob)?))
    }
}
