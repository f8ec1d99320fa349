//! Cluster agreement for schema changes
//!
//! Before any destructive work the master announces the change and, unless the
//! on-disk structure is unchanged, asks every member to confirm readiness.
//! Same-schema changes (forced rebuilds, fastinit) skip the readiness round:
//! everything they touch is already fully replicated, so there is nothing for
//! replicas to disagree about.

mod messages;

pub use messages::{ClusterVote, NodeId, ScMessage};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::ClientStream;
use crate::error::{Error, Result};
use crate::request::SchemaChangeRequest;

/// Errors from the cluster transport.
#[derive(Clone, Debug, Error)]
#[error("cluster transport error: {0}")]
pub struct TransportError(pub String);

/// Fire-and-collect broadcast to the cluster.
#[async_trait]
pub trait ClusterTransport: Send + Sync + 'static {
    /// Members whose acknowledgement a round requires.
    async fn members(&self) -> Result<Vec<NodeId>, TransportError>;

    /// Sends `message` to every member and collects their votes.
    async fn broadcast(&self, message: ScMessage) -> Result<Vec<ClusterVote>, TransportError>;
}

/// Runs the propose / readiness / end rounds of a schema change.
#[derive(Clone)]
pub struct ClusterAgreement {
    transport: Arc<dyn ClusterTransport>,
    local_node: NodeId,
}

impl ClusterAgreement {
    /// Create a new agreement runner
    pub fn new(transport: Arc<dyn ClusterTransport>, local_node: NodeId) -> Self {
        Self {
            transport,
            local_node,
        }
    }

    /// Announces the change and waits for the cluster to agree.
    ///
    /// With `force` set, readiness failures are overridden. A failed start
    /// round is never overridden: it means members are not connected.
    pub async fn propose(
        &self,
        request: &SchemaChangeRequest,
        seed: u64,
        client: &ClientStream,
    ) -> Result<()> {
        let start = ScMessage::Start {
            seed,
            origin: self.local_node.clone(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        if let Err(reason) = self.round(start).await {
            warn!(table = request.table(), seed, "schema change start not agreed: {reason}");
            client.error("unable to gain agreement from all nodes to do schema change");
            client.error("check that all nodes are connected ('send bdb cluster')");
            return Err(Error::ProposeFailed(reason));
        }

        if request.flags().same_schema {
            debug!(table = request.table(), seed, "same schema, skipping readiness round");
            return Ok(());
        }

        let readiness = match self
            .round(ScMessage::ReadinessCheck {
                seed,
                table: request.table().to_string(),
            })
            .await
        {
            Ok(()) => self.round(ScMessage::Ok { seed }).await,
            Err(reason) => Err(reason),
        };

        match readiness {
            Ok(()) => {
                info!(table = request.table(), seed, "all nodes ready for schema change");
                Ok(())
            }
            Err(reason) => {
                client.error("cannot perform schema change; not all nodes acknowledged readiness");
                if request.flags().force {
                    warn!(
                        table = request.table(),
                        seed, "FORCING schema change without cluster agreement: {reason}"
                    );
                    client.info("Performing schema change regardless in force mode");
                    Ok(())
                } else {
                    Err(Error::ProposeFailed(reason))
                }
            }
        }
    }

    /// Tells every member the change is over. Never fails.
    pub async fn end(&self, seed: u64) {
        match self.round(ScMessage::End { seed }).await {
            Ok(()) => debug!(seed, "schema change end acknowledged"),
            Err(reason) => warn!(seed, "schema change end broadcast incomplete: {reason}"),
        }
    }

    async fn round(&self, message: ScMessage) -> Result<(), String> {
        let name = message.name();
        let members = self
            .transport
            .members()
            .await
            .map_err(|e| format!("{name}: {e}"))?;
        let votes = self
            .transport
            .broadcast(message)
            .await
            .map_err(|e| format!("{name}: {e}"))?;

        let missing: Vec<String> = members
            .iter()
            .filter_map(|member| {
                match votes.iter().find(|vote| &vote.node == member) {
                    Some(vote) if vote.acknowledged => None,
                    Some(vote) => Some(format!(
                        "{member} ({})",
                        vote.reason.as_deref().unwrap_or("refused")
                    )),
                    None => Some(format!("{member} (no reply)")),
                }
            })
            .collect();

        if missing.is_empty() {
            debug!("{name} round acknowledged by {} members", members.len());
            Ok(())
        } else {
            Err(format!("{name} round not acknowledged by {}", missing.join(", ")))
        }
    }
}

impl std::fmt::Debug for ClusterAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterAgreement")
            .field("local_node", &self.local_node)
            .finish_non_exhaustive()
    }
}
