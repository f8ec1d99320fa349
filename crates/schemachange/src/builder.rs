//! Builder for the schema-change coordinator
//!
//! Collects the collaborators a coordinator needs and wires the internal
//! components (progress store, agreement runner, monitor) out of them.

use std::sync::Arc;

use tracing::info;

use schemachange_llmeta::MetaStore1;

use crate::agreement::{ClusterAgreement, ClusterTransport};
use crate::config::SchemaChangeConfig;
use crate::coordinator::Coordinator;
use crate::dispatcher::{Catalog, ExecutionDispatcher};
use crate::error::{Error, Result};
use crate::gate::InFlightGate;
use crate::monitor::{MasterRole, MasterRoleMonitor};
use crate::progress::DurableProgressStore;
use crate::schema_lock::SchemaLock;

/// Builder for creating [`Coordinator`] instances
pub struct CoordinatorBuilder<M>
where
    M: MetaStore1,
{
    config: SchemaChangeConfig,

    // External dependencies
    meta_store: Option<M>,
    transport: Option<Arc<dyn ClusterTransport>>,
    master_role: Option<Arc<dyn MasterRole>>,
    dispatcher: Option<Arc<dyn ExecutionDispatcher>>,
    catalog: Option<Arc<dyn Catalog>>,

    // Shared process-wide state
    gate: Option<Arc<InFlightGate>>,
    schema_lock: Option<SchemaLock>,
    monitor: Option<MasterRoleMonitor>,
}

impl<M> CoordinatorBuilder<M>
where
    M: MetaStore1,
{
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchemaChangeConfig::default(),
            meta_store: None,
            transport: None,
            master_role: None,
            dispatcher: None,
            catalog: None,
            gate: None,
            schema_lock: None,
            monitor: None,
        }
    }

    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: SchemaChangeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the low-level metadata store; markers live in a scope of it
    #[must_use]
    pub fn meta_store(mut self, meta_store: M) -> Self {
        self.meta_store = Some(meta_store);
        self
    }

    /// Set the cluster transport
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn ClusterTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the master role source
    #[must_use]
    pub fn master_role(mut self, master_role: Arc<dyn MasterRole>) -> Self {
        self.master_role = Some(master_role);
        self
    }

    /// Set the execution dispatcher
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Arc<dyn ExecutionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Set the table catalog
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Share an in-flight gate with other coordinators of this process
    #[must_use]
    pub fn gate(mut self, gate: Arc<InFlightGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Share a schema lock with the rest of the process
    #[must_use]
    pub fn schema_lock(mut self, schema_lock: SchemaLock) -> Self {
        self.schema_lock = Some(schema_lock);
        self
    }

    /// Share a master role monitor; by default one is created from the role
    #[must_use]
    pub fn monitor(mut self, monitor: MasterRoleMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Build the coordinator
    pub fn build(self) -> Result<Coordinator<M::Scoped>> {
        self.config.validate()?;

        let meta_store = self.meta_store.ok_or_else(|| missing("meta_store"))?;
        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let dispatcher = self.dispatcher.ok_or_else(|| missing("dispatcher"))?;
        let catalog = self.catalog.ok_or_else(|| missing("catalog"))?;

        let monitor = match (self.monitor, self.master_role) {
            (Some(monitor), _) => monitor,
            (None, Some(role)) => MasterRoleMonitor::new(role),
            (None, None) => return Err(missing("master_role")),
        };

        let progress = DurableProgressStore::new(
            meta_store.scope(self.config.marker_scope.clone()),
            self.config.marker_retry.clone(),
            monitor.clone(),
        );
        let agreement = ClusterAgreement::new(transport, monitor.local_node());

        info!(
            environment = %self.config.environment,
            node = %monitor.local_node(),
            "schema change coordinator ready"
        );

        Ok(Coordinator::new(
            self.config,
            progress,
            agreement,
            monitor,
            self.gate.unwrap_or_else(InFlightGate::new),
            self.schema_lock.unwrap_or_default(),
            dispatcher,
            catalog,
        ))
    }
}

impl<M> Default for CoordinatorBuilder<M>
where
    M: MetaStore1,
{
    fn default() -> Self {
        Self::new()
    }
}

fn missing(key: &str) -> Error {
    Error::Configuration(format!("missing required component: {key}"))
}
