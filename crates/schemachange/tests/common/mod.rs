//! Mock collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use schemachange::agreement::TransportError;
use schemachange::request::{LuaFunctionKind, ProcedureAction};
use schemachange::temp_table::StorageError;
use schemachange::{
    Catalog, ChannelSink, ClientStream, ClusterTransport, ClusterVote, Coordinator,
    CoordinatorBuilder, DispatchError, ExecutionDispatcher, FileVersions, MasterRole,
    MasterRoleMonitor, NodeId, SchemaChangeConfig, SchemaChangeRequest, SchemaLock, ScMessage,
    TableDescriptor, TableStorage,
};
use schemachange_llmeta::{MetaStore, MetaStore1};
use schemachange_llmeta_memory::{Error as MemoryError, MemoryMetaStore};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("schemachange=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Client stream plus everything written to it.
pub struct TestClient {
    pub stream: ClientStream,
    pub sink: Arc<ChannelSink>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl TestClient {
    pub fn new() -> Self {
        let (sink, rx) = ChannelSink::new();
        Self {
            stream: ClientStream::new(sink.clone()),
            sink,
            rx,
        }
    }

    pub fn lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = self.rx.try_recv() {
            lines.push(line);
        }
        lines
    }
}

/// Metadata store whose next `n` puts fail.
#[derive(Clone, Debug, Default)]
pub struct FlakyStore {
    inner: MemoryMetaStore,
    failing_puts: Arc<AtomicU32>,
    put_attempts: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new(inner: MemoryMetaStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetaStore for FlakyStore {
    type Error = MemoryError;

    async fn del<K: Into<String> + Send>(&self, key: K) -> Result<(), MemoryError> {
        self.inner.del(key).await
    }

    async fn get<K: Into<String> + Send>(&self, key: K) -> Result<Option<Bytes>, MemoryError> {
        self.inner.get(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, MemoryError> {
        self.inner.keys().await
    }

    async fn put<K: Into<String> + Send>(&self, key: K, bytes: Bytes) -> Result<(), MemoryError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MemoryError("replication quorum lost".to_string()));
        }
        self.inner.put(key, bytes).await
    }
}

impl MetaStore1 for FlakyStore {
    type Error = MemoryError;
    type Scoped = Self;

    fn scope<S: Into<String> + Send>(&self, scope: S) -> Self::Scoped {
        Self {
            inner: self.inner.scope(scope),
            failing_puts: Arc::clone(&self.failing_puts),
            put_attempts: Arc::clone(&self.put_attempts),
        }
    }
}

/// Three-node cluster that acknowledges everything unless told otherwise.
pub struct MockTransport {
    members: Vec<NodeId>,
    refused_rounds: Mutex<HashSet<&'static str>>,
    sent: Mutex<Vec<ScMessage>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: vec!["n1".into(), "n2".into(), "n3".into()],
            refused_rounds: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Makes `n3` refuse every round with this message name.
    pub fn refuse(&self, round: &'static str) {
        self.refused_rounds.lock().insert(round);
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(ScMessage::name).collect()
    }

    pub fn count(&self, round: &str) -> usize {
        self.sent_names().iter().filter(|name| **name == round).count()
    }
}

#[async_trait]
impl ClusterTransport for MockTransport {
    async fn members(&self) -> Result<Vec<NodeId>, TransportError> {
        Ok(self.members.clone())
    }

    async fn broadcast(&self, message: ScMessage) -> Result<Vec<ClusterVote>, TransportError> {
        let refused = self.refused_rounds.lock().contains(message.name());
        self.sent.lock().push(message);
        Ok(self
            .members
            .iter()
            .map(|node| {
                if refused && node.as_str() == "n3" {
                    ClusterVote::nack(node.clone(), "replication lagging")
                } else {
                    ClusterVote::ack(node.clone())
                }
            })
            .collect())
    }
}

/// Master role that can be handed to another node.
pub struct MockRole {
    local: NodeId,
    master: Mutex<Option<NodeId>>,
    yields: AtomicU32,
}

impl MockRole {
    pub fn master() -> Arc<Self> {
        Arc::new(Self {
            local: "n1".into(),
            master: Mutex::new(Some("n1".into())),
            yields: AtomicU32::new(0),
        })
    }

    pub fn replica() -> Arc<Self> {
        Arc::new(Self {
            local: "n1".into(),
            master: Mutex::new(Some("n2".into())),
            yields: AtomicU32::new(0),
        })
    }

    pub fn yields(&self) -> u32 {
        self.yields.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MasterRole for MockRole {
    fn local_node(&self) -> NodeId {
        self.local.clone()
    }

    async fn current_master(&self) -> Option<NodeId> {
        self.master.lock().clone()
    }

    async fn yield_mastership(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
        *self.master.lock() = None;
    }
}

/// Dispatcher recording `op:table` for every call.
#[derive(Default)]
pub struct MockDispatcher {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<String>>,
    stop_during: Mutex<Option<(String, MasterRoleMonitor)>>,
    descriptors: Mutex<HashMap<String, (TableDescriptor, TableDescriptor)>>,
    schema_lock: Mutex<Option<SchemaLock>>,
    locked_finalizes: AtomicU32,
}

impl MockDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails `op` (e.g. `alter_table`) or `op:table`.
    pub fn fail(&self, op: &str) {
        self.failures.lock().insert(op.to_string());
    }

    /// Requests a master downgrade while `op` runs.
    pub fn stop_during(&self, op: &str, monitor: MasterRoleMonitor) {
        *self.stop_during.lock() = Some((op.to_string(), monitor));
    }

    /// Descriptors attached to requests for `table` when they execute.
    pub fn describe(&self, table: &str, old: TableDescriptor, new: TableDescriptor) {
        self.descriptors
            .lock()
            .insert(table.to_string(), (old, new));
    }

    pub fn watch_lock(&self, lock: SchemaLock) {
        *self.schema_lock.lock() = Some(lock);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn locked_finalizes(&self) -> u32 {
        self.locked_finalizes.load(Ordering::SeqCst)
    }

    fn step(&self, op: &str, request: &mut SchemaChangeRequest) -> Result<(), DispatchError> {
        let call = format!("{op}:{}", request.table());
        self.calls.lock().push(call.clone());

        if let Some((stop_op, monitor)) = self.stop_during.lock().as_ref() {
            if stop_op == op {
                monitor.request_stop();
            }
        }

        if op.starts_with("finalize")
            && self
                .schema_lock
                .lock()
                .as_ref()
                .is_some_and(SchemaLock::is_write_locked)
        {
            self.locked_finalizes.fetch_add(1, Ordering::SeqCst);
        }

        if let Some((old, new)) = self.descriptors.lock().get(request.table()) {
            request.attach_tables(Some(Arc::new(old.clone())), Some(Arc::new(new.clone())));
        }

        let failures = self.failures.lock();
        if failures.contains(op) || failures.contains(&call) {
            return Err(DispatchError::new(format!("{call} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionDispatcher for MockDispatcher {
    async fn alter_table(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError> {
        self.step("alter_table", request)
    }

    async fn add_table(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError> {
        self.step("add_table", request)
    }

    async fn fast_init(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError> {
        self.step("fast_init", request)
    }

    async fn alter_stripes(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("alter_stripes", request)
    }

    async fn alter_queue(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError> {
        self.step("alter_queue", request)
    }

    async fn upgrade_table(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("upgrade_table", request)
    }

    async fn stored_procedure(
        &self,
        request: &mut SchemaChangeRequest,
        _action: ProcedureAction,
    ) -> Result<(), DispatchError> {
        self.step("stored_procedure", request)
    }

    async fn trigger(&self, request: &mut SchemaChangeRequest) -> Result<(), DispatchError> {
        self.step("trigger", request)
    }

    async fn lua_function(
        &self,
        request: &mut SchemaChangeRequest,
        _kind: LuaFunctionKind,
    ) -> Result<(), DispatchError> {
        self.step("lua_function", request)
    }

    async fn finalize_alter_table(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("finalize_alter_table", request)
    }

    async fn finalize_add_table(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("finalize_add_table", request)
    }

    async fn finalize_fast_init(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("finalize_fast_init", request)
    }

    async fn finalize_upgrade_table(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("finalize_upgrade_table", request)
    }

    async fn finalize_trigger(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("finalize_trigger", request)
    }

    async fn finalize_lua_function(
        &self,
        request: &mut SchemaChangeRequest,
    ) -> Result<(), DispatchError> {
        self.step("finalize_lua_function", request)
    }
}

/// Catalog over a fixed table list.
#[derive(Default)]
pub struct MockCatalog {
    tables: Vec<String>,
    aliases: HashMap<String, String>,
    views: HashMap<String, Vec<String>>,
    renames: Mutex<Vec<(String, String, String)>>,
}

impl MockCatalog {
    pub fn with_tables(tables: &[&str]) -> Self {
        Self {
            tables: tables.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn alias(mut self, alias: &str, table: &str) -> Self {
        self.aliases.insert(alias.to_string(), table.to_string());
        self
    }

    pub fn view(mut self, view: &str, shards: &[&str]) -> Self {
        self.views.insert(
            view.to_string(),
            shards.iter().map(ToString::to_string).collect(),
        );
        self
    }

    pub fn renames(&self) -> Vec<(String, String, String)> {
        self.renames.lock().clone()
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn canonical_name(&self, table: &str) -> Option<String> {
        if let Some(canonical) = self.aliases.get(table) {
            return Some(canonical.clone());
        }
        self.tables
            .iter()
            .find(|known| known.eq_ignore_ascii_case(table))
            .cloned()
    }

    async fn table_names(&self) -> Vec<String> {
        self.tables.clone()
    }

    async fn partition_shards(&self, table: &str) -> Option<Vec<String>> {
        self.views.get(table).cloned()
    }

    async fn rename_index_stats(
        &self,
        table: &str,
        old_tag: &str,
        new_tag: &str,
    ) -> Result<(), DispatchError> {
        self.renames.lock().push((
            table.to_string(),
            old_tag.to_string(),
            new_tag.to_string(),
        ));
        Ok(())
    }
}

/// Everything a coordinator test needs, sharing one metadata store.
pub struct Harness {
    pub store: FlakyStore,
    pub transport: Arc<MockTransport>,
    pub role: Arc<MockRole>,
    pub dispatcher: Arc<MockDispatcher>,
    pub catalog: Arc<MockCatalog>,
    pub coordinator: Coordinator<FlakyStore>,
}

impl Harness {
    pub fn new(catalog: MockCatalog) -> Self {
        Self::with(
            FlakyStore::new(MemoryMetaStore::new()),
            MockRole::master(),
            catalog,
            SchemaChangeConfig::default(),
        )
    }

    pub fn with(
        store: FlakyStore,
        role: Arc<MockRole>,
        catalog: MockCatalog,
        config: SchemaChangeConfig,
    ) -> Self {
        let transport = MockTransport::new();
        let dispatcher = MockDispatcher::new();
        let catalog = Arc::new(catalog);

        let coordinator = CoordinatorBuilder::new()
            .config(config)
            .meta_store(store.clone())
            .transport(transport.clone())
            .master_role(role.clone())
            .dispatcher(dispatcher.clone())
            .catalog(catalog.clone())
            .build()
            .unwrap();
        dispatcher.watch_lock(coordinator.schema_lock().clone());

        Self {
            store,
            transport,
            role,
            dispatcher,
            catalog,
            coordinator,
        }
    }

    pub async fn marker(&self, table: &str) -> Option<SchemaChangeRequest> {
        self.coordinator
            .progress()
            .read_in_progress(table)
            .await
            .unwrap()
    }
}

/// Storage engine keeping tables and version records in memory.
///
/// Deletes are staged in the transaction and applied on commit.
#[derive(Default)]
pub struct MockStorage {
    state: Mutex<StorageState>,
    next_versions: Mutex<FileVersions>,
    failing_deletes: AtomicU32,
    begins: AtomicU32,
    aborts: AtomicU32,
    commits: AtomicU32,
}

#[derive(Default)]
struct StorageState {
    tables: HashMap<String, FileVersions>,
    version_records: HashSet<String>,
    genids: HashMap<String, u64>,
    closed: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MockTxn {
    tables: Vec<String>,
    version_records: Vec<String>,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs a table directly, as if left by an earlier process.
    pub fn install(&self, name: &str, versions: FileVersions) {
        let mut state = self.state.lock();
        state.tables.insert(name.to_string(), versions);
        state.version_records.insert(name.to_string());
    }

    /// Versions given to the next created table.
    pub fn next_versions(&self, versions: FileVersions) {
        *self.next_versions.lock() = versions;
    }

    pub fn fail_next_deletes(&self, count: u32) {
        self.failing_deletes.store(count, Ordering::SeqCst);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state.lock().tables.contains_key(name)
    }

    pub fn has_version_records(&self, name: &str) -> bool {
        self.state.lock().version_records.contains(name)
    }

    pub fn genid(&self, name: &str) -> Option<u64> {
        self.state.lock().genids.get(name).copied()
    }

    pub fn is_closed(&self, name: &str) -> bool {
        self.state.lock().closed.contains(name)
    }

    pub fn begins(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableStorage for MockStorage {
    type Handle = String;
    type Txn = MockTxn;

    async fn open_existing(
        &self,
        name: &str,
        _source: &TableDescriptor,
    ) -> Result<Option<String>, StorageError> {
        Ok(self
            .state
            .lock()
            .tables
            .contains_key(name)
            .then(|| name.to_string()))
    }

    async fn create(&self, name: &str, _source: &TableDescriptor) -> Result<String, StorageError> {
        let versions = self.next_versions.lock().clone();
        let mut state = self.state.lock();
        state.tables.insert(name.to_string(), versions);
        state.version_records.insert(name.to_string());
        Ok(name.to_string())
    }

    async fn file_versions(&self, handle: &String) -> Result<FileVersions, StorageError> {
        self.state
            .lock()
            .tables
            .get(handle)
            .cloned()
            .ok_or_else(|| StorageError(format!("no such table {handle}")))
    }

    async fn set_blobstripe_genid(&self, handle: &String, genid: u64) -> Result<(), StorageError> {
        self.state.lock().genids.insert(handle.clone(), genid);
        Ok(())
    }

    async fn close(&self, handle: &String) -> Result<(), StorageError> {
        self.state.lock().closed.insert(handle.clone());
        Ok(())
    }

    async fn begin(&self) -> Result<MockTxn, StorageError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MockTxn::default())
    }

    async fn delete_table(&self, txn: &mut MockTxn, handle: &String) -> Result<(), StorageError> {
        let failing = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError("deadlock".to_string()));
        }
        txn.tables.push(handle.clone());
        Ok(())
    }

    async fn delete_file_versions(&self, txn: &mut MockTxn, name: &str) -> Result<(), StorageError> {
        txn.version_records.push(name.to_string());
        Ok(())
    }

    async fn commit(&self, txn: MockTxn) -> Result<(), StorageError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        for table in txn.tables {
            if state.tables.remove(&table).is_none() {
                return Err(StorageError(format!("{table} deleted twice")));
            }
        }
        for name in txn.version_records {
            state.version_records.remove(&name);
        }
        Ok(())
    }

    async fn abort(&self, _txn: MockTxn) -> Result<(), StorageError> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
