//! Messages exchanged with cluster members during a schema change

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a cluster member.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A schema-change broadcast.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ScMessage {
    /// A change is starting on the master
    Start {
        /// Change seed
        seed: u64,
        /// Master that started the change
        origin: NodeId,
        /// Unix timestamp in seconds
        timestamp: i64,
    },
    /// Ask every member whether it can take the change
    ReadinessCheck {
        /// Change seed
        seed: u64,
        /// Target table
        table: String,
    },
    /// Every member said yes; proceed
    Ok {
        /// Change seed
        seed: u64,
    },
    /// The change is over; drop per-change tracking state
    End {
        /// Change seed
        seed: u64,
    },
}

impl ScMessage {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::ReadinessCheck { .. } => "readiness check",
            Self::Ok { .. } => "ok",
            Self::End { .. } => "end",
        }
    }
}

/// One member's answer to a broadcast.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ClusterVote {
    /// Voting member
    pub node: NodeId,
    /// Whether it acknowledged
    pub acknowledged: bool,
    /// Why it refused, if it did
    pub reason: Option<String>,
}

impl ClusterVote {
    /// A positive acknowledgement.
    #[must_use]
    pub const fn ack(node: NodeId) -> Self {
        Self {
            node,
            acknowledged: true,
            reason: None,
        }
    }

    /// A refusal.
    pub fn nack(node: NodeId, reason: impl Into<String>) -> Self {
        Self {
            node,
            acknowledged: false,
            reason: Some(reason.into()),
        }
    }
}
