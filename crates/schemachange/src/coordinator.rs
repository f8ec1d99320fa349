//! The schema-change state machine.
//!
//! A change moves through
//! `Accepted -> MarkedDurable -> Proposed -> Executing -> {CommitPending | Finalizing | Aborted} -> Done`.
//! Which of those steps a change actually takes depends on its kind; see
//! [`FlowPlan`]. Every path reports exactly once to the client and, for kinds
//! that took part in cluster agreement, ends with an `End` broadcast.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use schemachange_llmeta::MetaStore;

use crate::agreement::ClusterAgreement;
use crate::client::{ClientStream, DOWNGRADE_NOTICE};
use crate::config::SchemaChangeConfig;
use crate::dispatcher::{Catalog, ExecutionDispatcher};
use crate::dryrun::{self, DryRunAssessment, ExistingTable, SchemaDiff};
use crate::error::{Error, Result};
use crate::gate::{InFlightGate, InFlightGuard};
use crate::index_rename::find_index_renames;
use crate::monitor::MasterRoleMonitor;
use crate::progress::DurableProgressStore;
use crate::request::{ChangeKind, SchemaChangeRequest};
use crate::schema_lock::{SchemaLock, SchemaWriteGuard};

/// Lifecycle states of a change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScState {
    /// Request accepted, gate held
    Accepted,
    /// Durable marker written
    MarkedDurable,
    /// Cluster agreed
    Proposed,
    /// Dispatcher running
    Executing,
    /// Executed; waiting for an explicit finalize
    CommitPending,
    /// Swapping the result in under the schema lock
    Finalizing,
    /// Failed
    Aborted,
    /// Finished
    Done,
}

/// Non-failure terminal result of a change.
#[derive(Debug)]
pub enum Outcome {
    /// The change is complete
    Success,
    /// Executed, finalize deferred
    CommitPending(PendingChange),
    /// Handed off to the next master
    MasterDowngrade,
}

/// What happened to a change.
#[derive(Debug)]
pub struct ChangeReport {
    /// Canonical table name
    pub table: String,
    /// Change seed
    pub seed: u64,
    /// Terminal outcome
    pub outcome: Outcome,
    /// States visited, in order
    pub states: Vec<ScState>,
}

/// An executed change waiting to be finalized.
///
/// Holds the in-flight gate and leaves the durable marker in place until it
/// is passed to [`Coordinator::finalize`].
#[derive(Debug)]
pub struct PendingChange {
    request: SchemaChangeRequest,
    client: ClientStream,
    seed: u64,
    guard: InFlightGuard,
}

impl PendingChange {
    /// The executed request.
    #[must_use]
    pub const fn request(&self) -> &SchemaChangeRequest {
        &self.request
    }

    /// Change seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

/// Steps a change of a given kind goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FlowPlan {
    /// Written to the durable marker store before work starts
    pub durable: bool,
    /// Runs cluster agreement
    pub propose: bool,
    /// Holds the schema write lock for the whole flow
    pub hold_lock: bool,
    /// Has a finalize step
    pub finalize: bool,
}

impl FlowPlan {
    pub(crate) const fn for_kind(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::AlterTable => Self {
                durable: true,
                propose: true,
                hold_lock: false,
                finalize: true,
            },
            ChangeKind::FastInit => Self {
                durable: true,
                propose: true,
                hold_lock: true,
                finalize: true,
            },
            ChangeKind::AddTable => Self {
                durable: true,
                propose: false,
                hold_lock: true,
                finalize: true,
            },
            ChangeKind::UpgradeTable(_) => Self {
                durable: true,
                propose: false,
                hold_lock: false,
                finalize: true,
            },
            ChangeKind::AlterQueue | ChangeKind::AlterStripes => Self {
                durable: false,
                propose: true,
                hold_lock: false,
                finalize: false,
            },
            ChangeKind::StoredProcedure(_) => Self {
                durable: false,
                propose: false,
                hold_lock: false,
                finalize: false,
            },
            ChangeKind::Trigger | ChangeKind::LuaFunction(_) => Self {
                durable: false,
                propose: false,
                hold_lock: false,
                finalize: true,
            },
        }
    }

    /// Whether a master downgrade is honoured at the flow checkpoints.
    const fn checks_downgrade(self) -> bool {
        self.durable || self.propose
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Entry {
    Accepted,
    MarkedDurable,
}

enum Step {
    Finished,
    Pending,
    Downgraded,
}

struct Flow {
    request: SchemaChangeRequest,
    client: ClientStream,
    seed: u64,
    states: Vec<ScState>,
}

impl Flow {
    fn enter(&mut self, state: ScState) {
        debug!(table = self.request.table(), seed = self.seed, ?state, "schema change state");
        self.states.push(state);
    }
}

/// Sequences schema changes on the master.
pub struct Coordinator<S> {
    config: Arc<SchemaChangeConfig>,
    progress: DurableProgressStore<S>,
    agreement: ClusterAgreement,
    monitor: MasterRoleMonitor,
    gate: Arc<InFlightGate>,
    schema_lock: SchemaLock,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    catalog: Arc<dyn Catalog>,
}

impl<S: Clone> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            progress: self.progress.clone(),
            agreement: self.agreement.clone(),
            monitor: self.monitor.clone(),
            gate: Arc::clone(&self.gate),
            schema_lock: self.schema_lock.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<S: MetaStore> Coordinator<S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SchemaChangeConfig,
        progress: DurableProgressStore<S>,
        agreement: ClusterAgreement,
        monitor: MasterRoleMonitor,
        gate: Arc<InFlightGate>,
        schema_lock: SchemaLock,
        dispatcher: Arc<dyn ExecutionDispatcher>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            progress,
            agreement,
            monitor,
            gate,
            schema_lock,
            dispatcher,
            catalog,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &SchemaChangeConfig {
        &self.config
    }

    /// Marker store.
    #[must_use]
    pub const fn progress(&self) -> &DurableProgressStore<S> {
        &self.progress
    }

    /// Master role monitor; call `request_stop` on it when the node is
    /// being downgraded.
    #[must_use]
    pub const fn monitor(&self) -> &MasterRoleMonitor {
        &self.monitor
    }

    /// In-flight gate.
    #[must_use]
    pub const fn gate(&self) -> &Arc<InFlightGate> {
        &self.gate
    }

    /// Process-wide schema lock.
    #[must_use]
    pub const fn schema_lock(&self) -> &SchemaLock {
        &self.schema_lock
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Accepts a change and runs it on its own task.
    ///
    /// Fails immediately with [`Error::AlreadyRunning`] if another change
    /// holds the in-flight gate.
    pub fn start(
        &self,
        request: SchemaChangeRequest,
        client: ClientStream,
    ) -> Result<JoinHandle<Result<ChangeReport>>> {
        let seed = rand::random::<u64>();
        let guard = self.gate.try_acquire(seed, request.table())?;
        info!(table = request.table(), kind = %request.kind(), seed, "starting schema change");

        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            coordinator
                .drive(request, client, seed, guard, Entry::Accepted)
                .await
        }))
    }

    /// Accepts a change and runs it to completion on the calling task.
    pub async fn run(
        &self,
        request: SchemaChangeRequest,
        client: ClientStream,
    ) -> Result<ChangeReport> {
        let seed = rand::random::<u64>();
        let guard = self.gate.try_acquire(seed, request.table())?;
        info!(table = request.table(), kind = %request.kind(), seed, "running schema change");

        self.drive(request, client, seed, guard, Entry::Accepted)
            .await
    }

    /// Re-enters a change recovered from its durable marker.
    pub(crate) fn resume(
        &self,
        request: SchemaChangeRequest,
        client: ClientStream,
    ) -> Result<JoinHandle<Result<ChangeReport>>> {
        let seed = rand::random::<u64>();
        let guard = self.gate.try_acquire(seed, request.table())?;
        info!(table = request.table(), seed, "resuming schema change");

        let coordinator = self.clone();
        Ok(tokio::spawn(async move {
            coordinator
                .drive(request, client, seed, guard, Entry::MarkedDurable)
                .await
        }))
    }

    /// Finalizes a change that returned [`Outcome::CommitPending`].
    pub async fn finalize(&self, pending: PendingChange) -> Result<ChangeReport> {
        let PendingChange {
            request,
            client,
            seed,
            guard,
        } = pending;

        let mut flow = Flow {
            request,
            client,
            seed,
            states: Vec::new(),
        };
        flow.enter(ScState::Finalizing);

        let result = self.finalize_step(&mut flow.request, None).await;
        self.discard_late_stop(&flow);
        let report = Self::conclude(flow, result.map(|()| Step::Finished));
        drop(guard);
        report
    }

    /// Evaluates an alter without executing it.
    ///
    /// Holds the schema lock for reading so a concurrent finalize cannot swap
    /// the table out from under the assessment.
    pub async fn dry_run(
        &self,
        mut request: SchemaChangeRequest,
        existing: &ExistingTable,
        diff: &SchemaDiff,
        client: &ClientStream,
    ) -> Result<DryRunAssessment> {
        self.normalize(&mut request).await;

        let _schema = self.schema_lock.read().await;
        let result = dryrun::dry_run(&request, existing, diff, client);
        if request.reports_status() {
            client.status(result.is_ok());
        }
        result
    }

    async fn drive(
        &self,
        mut request: SchemaChangeRequest,
        client: ClientStream,
        seed: u64,
        guard: InFlightGuard,
        entry: Entry,
    ) -> Result<ChangeReport> {
        self.normalize(&mut request).await;

        let plan = FlowPlan::for_kind(request.kind());
        let shards = if request.kind() == ChangeKind::AlterTable && !request.flags().resume {
            self.catalog.partition_shards(request.table()).await
        } else {
            None
        };

        let mut flow = Flow {
            request,
            client,
            seed,
            states: Vec::new(),
        };
        if entry == Entry::Accepted {
            flow.enter(ScState::Accepted);
        }

        let result = match shards {
            Some(shards) => self.run_view(&mut flow, shards).await,
            None => self.run_single(&mut flow, plan, entry).await,
        };

        if !matches!(result, Ok(Step::Downgraded)) {
            self.discard_late_stop(&flow);
        }

        if plan.propose {
            self.agreement.end(seed).await;
        }

        match result {
            Ok(Step::Pending) => {
                info!(table = flow.request.table(), seed, "schema change commit pending");
                let table = flow.request.table().to_string();
                Ok(ChangeReport {
                    table,
                    seed,
                    states: flow.states,
                    outcome: Outcome::CommitPending(PendingChange {
                        request: flow.request,
                        client: flow.client,
                        seed,
                        guard,
                    }),
                })
            }
            other => {
                let report = Self::conclude(flow, other);
                drop(guard);
                report
            }
        }
    }

    /// Writes the terminal client line and builds the report.
    fn conclude(mut flow: Flow, result: Result<Step>) -> Result<ChangeReport> {
        let reports_status = flow.request.reports_status();

        let outcome = match result {
            Ok(Step::Finished) => {
                flow.enter(ScState::Done);
                info!(table = flow.request.table(), seed = flow.seed, "Schema change returning SUCCESS");
                if reports_status {
                    flow.client.status(true);
                }
                Outcome::Success
            }
            Ok(Step::Downgraded) => Outcome::MasterDowngrade,
            Ok(Step::Pending) => {
                return Err(Error::Worker(
                    "commit-pending change cannot conclude".to_string(),
                ));
            }
            Err(e) => {
                flow.enter(ScState::Aborted);
                error!(table = flow.request.table(), seed = flow.seed, "Schema change returning FAILED: {e}");
                if reports_status {
                    flow.client.status(false);
                }
                return Err(e);
            }
        };

        Ok(ChangeReport {
            table: flow.request.table().to_string(),
            seed: flow.seed,
            outcome,
            states: flow.states,
        })
    }

    async fn run_single(&self, flow: &mut Flow, plan: FlowPlan, entry: Entry) -> Result<Step> {
        let mut held = if plan.hold_lock {
            Some(self.schema_lock.write().await)
        } else {
            None
        };

        if plan.durable {
            if entry == Entry::Accepted {
                self.progress
                    .mark_in_progress(&flow.request, &flow.client)
                    .await?;
            }
            flow.enter(ScState::MarkedDurable);
        }

        if plan.propose {
            if let Err(e) = self
                .agreement
                .propose(&flow.request, flow.seed, &flow.client)
                .await
            {
                if plan.durable {
                    self.clear_marker(flow.request.table()).await;
                }
                return Err(e);
            }
            flow.enter(ScState::Proposed);

            if self.downgrade_requested(flow) {
                return Ok(Step::Downgraded);
            }
        }

        flow.enter(ScState::Executing);
        let executed = self.execute(&mut flow.request).await;

        if plan.checks_downgrade() && self.downgrade_requested(flow) {
            return Ok(Step::Downgraded);
        }

        if let Err(e) = executed {
            if plan.durable {
                self.clear_marker(flow.request.table()).await;
            }
            return Err(e);
        }

        if !plan.finalize {
            return Ok(Step::Finished);
        }

        if !flow.request.flags().finalize {
            flow.enter(ScState::CommitPending);
            return Ok(Step::Pending);
        }

        flow.enter(ScState::Finalizing);
        self.finalize_step(&mut flow.request, held.take()).await?;
        Ok(Step::Finished)
    }

    /// Alters each shard of a partitioned view in turn, then finalizes the view.
    async fn run_view(&self, flow: &mut Flow, shards: Vec<String>) -> Result<Step> {
        let total = shards.len();
        flow.request.shards_mut(total);
        info!(view = flow.request.table(), shards = total, "altering partitioned view");

        for (index, shard) in shards.into_iter().enumerate() {
            let mut shard_request = flow.request.for_shard(&shard);
            self.normalize(&mut shard_request).await;

            match self.run_shard(flow, &mut shard_request).await {
                Ok(Step::Downgraded) => {
                    info!(
                        view = flow.request.table(),
                        shard = %shard,
                        completed = index,
                        "shard marker kept for the next master"
                    );
                    return Ok(Step::Downgraded);
                }
                Ok(_) => {}
                Err(e) => {
                    if index > 0 {
                        warn!(
                            view = flow.request.table(),
                            completed = index,
                            "shard failed, earlier shards are not rolled back"
                        );
                    }
                    return Err(Error::ShardFailed {
                        shard,
                        index,
                        source: Box::new(e),
                    });
                }
            }

            let set = flow.request.shards_mut(total);
            set.old[index] = shard_request.old_table().cloned();
            set.new[index] = shard_request.new_table().cloned();
        }

        if !flow.request.flags().finalize {
            flow.enter(ScState::CommitPending);
            return Ok(Step::Pending);
        }

        flow.enter(ScState::Finalizing);
        self.finalize_step(&mut flow.request, None).await?;
        Ok(Step::Finished)
    }

    /// Alters one shard. A downgrade at either checkpoint leaves the shard's
    /// marker in place so the next master resumes it.
    async fn run_shard(&self, flow: &mut Flow, shard: &mut SchemaChangeRequest) -> Result<Step> {
        self.progress.mark_in_progress(shard, &flow.client).await?;
        flow.enter(ScState::MarkedDurable);

        let result = match self.agreement.propose(shard, flow.seed, &flow.client).await {
            Ok(()) => {
                flow.enter(ScState::Proposed);
                if self.downgrade_requested(flow) {
                    return Ok(Step::Downgraded);
                }

                flow.enter(ScState::Executing);
                let executed = self.dispatcher.alter_table(shard).await.map_err(Error::from);
                if self.downgrade_requested(flow) {
                    return Ok(Step::Downgraded);
                }
                executed
            }
            Err(e) => Err(e),
        };

        self.clear_marker(shard.table()).await;
        result.map(|()| Step::Finished)
    }

    async fn execute(&self, request: &mut SchemaChangeRequest) -> Result<()> {
        let dispatcher = &self.dispatcher;
        let result = match request.kind() {
            ChangeKind::AlterTable => dispatcher.alter_table(request).await,
            ChangeKind::AddTable => dispatcher.add_table(request).await,
            ChangeKind::FastInit => dispatcher.fast_init(request).await,
            ChangeKind::AlterStripes => dispatcher.alter_stripes(request).await,
            ChangeKind::AlterQueue => dispatcher.alter_queue(request).await,
            ChangeKind::UpgradeTable(_) => dispatcher.upgrade_table(request).await,
            ChangeKind::StoredProcedure(action) => {
                dispatcher.stored_procedure(request, action).await
            }
            ChangeKind::Trigger => dispatcher.trigger(request).await,
            ChangeKind::LuaFunction(kind) => dispatcher.lua_function(request, kind).await,
        };

        result.map_err(|e| {
            error!(table = request.table(), kind = %request.kind(), "schema change execution failed: {e}");
            Error::from(e)
        })
    }

    /// Index-rename bookkeeping, then the kind's finalize under the schema
    /// write lock. The durable marker is cleared whatever the result.
    async fn finalize_step(
        &self,
        request: &mut SchemaChangeRequest,
        held: Option<SchemaWriteGuard>,
    ) -> Result<()> {
        let kind = request.kind();
        let is_view = request.shards().is_some();

        if kind == ChangeKind::AlterTable && !is_view {
            self.record_index_renames(request).await;
        }

        let lock = match held {
            Some(lock) => lock,
            None => self.schema_lock.write().await,
        };

        let dispatcher = &self.dispatcher;
        let result = match kind {
            ChangeKind::AlterTable => dispatcher.finalize_alter_table(request).await,
            ChangeKind::AddTable => dispatcher.finalize_add_table(request).await,
            ChangeKind::FastInit => dispatcher.finalize_fast_init(request).await,
            ChangeKind::UpgradeTable(_) => dispatcher.finalize_upgrade_table(request).await,
            ChangeKind::Trigger => dispatcher.finalize_trigger(request).await,
            ChangeKind::LuaFunction(_) => dispatcher.finalize_lua_function(request).await,
            ChangeKind::AlterQueue | ChangeKind::AlterStripes | ChangeKind::StoredProcedure(_) => {
                debug!(table = request.table(), %kind, "nothing to finalize");
                Ok(())
            }
        };
        drop(lock);

        if FlowPlan::for_kind(kind).durable && !is_view {
            self.clear_marker(request.table()).await;
        }

        result.map_err(|e| {
            error!(table = request.table(), %kind, "schema change finalize failed: {e}");
            Error::from(e)
        })
    }

    async fn record_index_renames(&self, request: &SchemaChangeRequest) {
        let (Some(old_table), Some(new_table)) = (request.old_table(), request.new_table()) else {
            return;
        };

        for (old_tag, new_tag) in find_index_renames(new_table, old_table) {
            info!(
                table = %new_table.name,
                old = %old_tag,
                new = %new_tag,
                "index renamed, moving its statistics"
            );
            if let Err(e) = self
                .catalog
                .rename_index_stats(&new_table.name, &old_tag, &new_tag)
                .await
            {
                warn!(table = %new_table.name, "failed to move index statistics: {e}");
            }
        }
    }

    async fn normalize(&self, request: &mut SchemaChangeRequest) {
        if let Some(name) = self.catalog.canonical_name(request.table()).await {
            if name != request.table() {
                debug!(requested = request.table(), canonical = %name, "normalized table name");
                request.set_table(name);
            }
        }
    }

    /// Consumes a pending stop request and hands the change off.
    fn downgrade_requested(&self, flow: &Flow) -> bool {
        if !self.monitor.take_stop_request() {
            return false;
        }

        warn!(table = flow.request.table(), seed = flow.seed, "{DOWNGRADE_NOTICE}");
        flow.client.downgrading();
        true
    }

    /// Drops a stop request that arrived after the change's last checkpoint.
    ///
    /// A stop targets the change running when it was raised and never carries
    /// over to the next one.
    fn discard_late_stop(&self, flow: &Flow) {
        if self.monitor.take_stop_request() {
            warn!(
                table = flow.request.table(),
                seed = flow.seed,
                kind = %flow.request.kind(),
                "stop requested after the last checkpoint, change ran to completion"
            );
        }
    }

    async fn clear_marker(&self, table: &str) {
        if let Err(e) = self.progress.clear_in_progress(table).await {
            warn!(table, "schema change marker left behind: {e}");
        }
    }
}

impl<S> std::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("agreement", &self.agreement)
            .field("active", &self.gate.active())
            .finish_non_exhaustive()
    }
}
