//! Observes the node's master role and external stop requests.
//!
//! A stop request is how a master downgrade reaches a running change: the
//! coordinator polls it at fixed checkpoints and hands off cleanly instead of
//! failing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::agreement::NodeId;

/// The cluster's view of who is master.
#[async_trait]
pub trait MasterRole: Send + Sync + 'static {
    /// This node's id.
    fn local_node(&self) -> NodeId;

    /// Current master, if one is known.
    async fn current_master(&self) -> Option<NodeId>;

    /// Voluntarily gives up mastership so another node can take over.
    async fn yield_mastership(&self);
}

/// Stop-signal and role checks for running changes.
#[derive(Clone)]
pub struct MasterRoleMonitor {
    stop: Arc<AtomicBool>,
    role: Arc<dyn MasterRole>,
}

impl MasterRoleMonitor {
    /// Create a new monitor
    pub fn new(role: Arc<dyn MasterRole>) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            role,
        }
    }

    /// Asks running changes to stop at their next checkpoint.
    pub fn request_stop(&self) {
        info!("schema change stop requested");
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested and not yet acted on.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Consumes a pending stop request.
    pub(crate) fn take_stop_request(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    /// This node's id.
    #[must_use]
    pub fn local_node(&self) -> NodeId {
        self.role.local_node()
    }

    /// Whether this node is currently master.
    pub async fn is_master(&self) -> bool {
        self.role.current_master().await.as_ref() == Some(&self.role.local_node())
    }

    /// Gives up mastership.
    pub async fn step_down(&self) {
        warn!(node = %self.role.local_node(), "yielding mastership");
        self.role.yield_mastership().await;
    }
}

impl std::fmt::Debug for MasterRoleMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterRoleMonitor")
            .field("stop_requested", &self.is_stop_requested())
            .finish_non_exhaustive()
    }
}
