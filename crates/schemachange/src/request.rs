//! The schema-change request: the unit of work every component passes around.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scope of a table upgrade.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum UpgradeScope {
    /// Rewrite every record
    Full,
    /// Background upgrade of a subset of records
    Partial,
}

/// Stored-procedure operation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ProcedureAction {
    /// Add a procedure version
    Add,
    /// Delete a procedure version
    Delete,
    /// Make a version the default
    Default,
    /// Show a procedure
    Show,
}

/// Embedded Lua function flavour.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum LuaFunctionKind {
    /// Scalar function
    Scalar,
    /// Aggregate function
    Aggregate,
}

/// What kind of change a request performs.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    /// Structural alter of a tagged table (possibly a partitioned view)
    AlterTable,
    /// Create a new table
    AddTable,
    /// Truncate and re-initialise a table ("fastinit")
    FastInit,
    /// Change the data stripe count
    AlterStripes,
    /// Alter a queue
    AlterQueue,
    /// Upgrade records to the current on-disk format
    UpgradeTable(UpgradeScope),
    /// Stored-procedure management
    StoredProcedure(ProcedureAction),
    /// Trigger update
    Trigger,
    /// Lua function management
    LuaFunction(LuaFunctionKind),
}

impl ChangeKind {
    /// Whether a persisted change of this kind may be resumed by a new master.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::AlterTable)
    }

    /// Whether the change is a table upgrade.
    #[must_use]
    pub const fn is_upgrade(self) -> bool {
        matches!(self, Self::UpgradeTable(_))
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlterTable => write!(f, "alter table"),
            Self::AddTable => write!(f, "add table"),
            Self::FastInit => write!(f, "fastinit"),
            Self::AlterStripes => write!(f, "alter stripes"),
            Self::AlterQueue => write!(f, "alter queue"),
            Self::UpgradeTable(UpgradeScope::Full) => write!(f, "full table upgrade"),
            Self::UpgradeTable(UpgradeScope::Partial) => write!(f, "partial table upgrade"),
            Self::StoredProcedure(action) => write!(f, "stored procedure ({action:?})"),
            Self::Trigger => write!(f, "trigger"),
            Self::LuaFunction(kind) => write!(f, "lua function ({kind:?})"),
        }
    }
}

/// Compression algorithm for records or blobs.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression
    #[default]
    None,
    /// Run-length encoding
    Rle,
    /// Compressed run-length encoding
    Crle,
    /// zlib
    Zlib,
    /// LZ4
    Lz4,
}

/// Options attached to a change at construction.
///
/// Unknown or missing fields in a persisted marker fall back to these
/// defaults, so markers written by older or newer nodes still decode.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct ChangeFlags {
    /// The change is being resumed after failover
    pub resume: bool,
    /// Finalize immediately instead of returning commit-pending
    pub finalize: bool,
    /// Proceed even if replicas do not acknowledge readiness
    pub force: bool,
    /// On-disk structure is unchanged; full readiness round not needed
    pub same_schema: bool,
    /// Table uses instant schema change
    pub instant_schema_change: bool,
    /// Table allows in-place updates
    pub in_place_updates: bool,
    /// Table carries on-disk headers
    pub headers: bool,
    /// Record compression
    pub compression: Compression,
    /// Blob compression
    pub blob_compression: Compression,
    /// Force a full rebuild
    pub force_rebuild: bool,
    /// Force a data file rebuild
    pub force_data_rebuild: bool,
    /// Force a blob file rebuild
    pub force_blob_rebuild: bool,
}

impl Default for ChangeFlags {
    fn default() -> Self {
        Self {
            resume: false,
            finalize: true,
            force: false,
            same_schema: false,
            instant_schema_change: false,
            in_place_updates: false,
            headers: true,
            compression: Compression::None,
            blob_compression: Compression::None,
            force_rebuild: false,
            force_data_rebuild: false,
            force_blob_rebuild: false,
        }
    }
}

/// One index of a table definition.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    /// Logical index tag, e.g. `KEY_ID`
    pub tag: String,
}

/// Rebuild plan produced by the external planner.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct RebuildPlan {
    /// For each new index, the old index it was derived from, if any
    pub index_plan: Vec<Option<usize>>,
}

/// A table definition owned by the catalog and borrowed by a request.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    /// On-disk table name
    pub name: String,
    /// Indexes in definition order
    pub indexes: Vec<IndexDescriptor>,
    /// Number of blob files
    pub blob_count: usize,
    /// Blob stripe generation id
    pub blobstripe_genid: u64,
    /// Rebuild plan, present on new definitions
    pub plan: Option<RebuildPlan>,
}

impl TableDescriptor {
    /// Creates a descriptor with the given index tags and no blobs.
    pub fn new<I, T>(name: impl Into<String>, index_tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            indexes: index_tags
                .into_iter()
                .map(|tag| IndexDescriptor { tag: tag.into() })
                .collect(),
            ..Self::default()
        }
    }
}

/// Old/new table descriptors for each shard of a partitioned view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardSet {
    /// Source descriptor per shard
    pub old: Vec<Option<Arc<TableDescriptor>>>,
    /// Rebuilt descriptor per shard
    pub new: Vec<Option<Arc<TableDescriptor>>>,
}

impl ShardSet {
    /// Creates an empty set sized to the partition count.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            old: vec![None; len],
            new: vec![None; len],
        }
    }

    /// Number of shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.old.len()
    }

    /// Whether the view has no shards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.old.is_empty()
    }

    /// Number of shards that completed their pass.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.new.iter().filter(|slot| slot.is_some()).count()
    }
}

/// A schema change request.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SchemaChangeRequest {
    table: String,
    kind: ChangeKind,
    flags: ChangeFlags,
    #[serde(default)]
    new_schema: Option<String>,
    #[serde(skip)]
    old_table: Option<Arc<TableDescriptor>>,
    #[serde(skip)]
    new_table: Option<Arc<TableDescriptor>>,
    #[serde(skip)]
    shards: Option<ShardSet>,
}

impl SchemaChangeRequest {
    /// Creates a new request.
    pub fn new(table: impl Into<String>, kind: ChangeKind, flags: ChangeFlags) -> Self {
        Self {
            table: table.into(),
            kind,
            flags,
            new_schema: None,
            old_table: None,
            new_table: None,
            shards: None,
        }
    }

    /// Attaches the new schema definition text.
    #[must_use]
    pub fn with_new_schema(mut self, schema: impl Into<String>) -> Self {
        self.new_schema = Some(schema.into());
        self
    }

    /// Target table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Change kind.
    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Change flags.
    #[must_use]
    pub const fn flags(&self) -> &ChangeFlags {
        &self.flags
    }

    /// New schema definition text, if any.
    #[must_use]
    pub fn new_schema(&self) -> Option<&str> {
        self.new_schema.as_deref()
    }

    /// Source table descriptor.
    #[must_use]
    pub const fn old_table(&self) -> Option<&Arc<TableDescriptor>> {
        self.old_table.as_ref()
    }

    /// Rebuilt table descriptor.
    #[must_use]
    pub const fn new_table(&self) -> Option<&Arc<TableDescriptor>> {
        self.new_table.as_ref()
    }

    /// Attaches the descriptors the dispatcher resolved or built.
    pub fn attach_tables(
        &mut self,
        old_table: Option<Arc<TableDescriptor>>,
        new_table: Option<Arc<TableDescriptor>>,
    ) {
        self.old_table = old_table;
        self.new_table = new_table;
    }

    /// Shard results when the table is a partitioned view.
    #[must_use]
    pub const fn shards(&self) -> Option<&ShardSet> {
        self.shards.as_ref()
    }

    pub(crate) fn set_table(&mut self, table: impl Into<String>) {
        self.table = table.into();
    }

    pub(crate) fn shards_mut(&mut self, len: usize) -> &mut ShardSet {
        self.shards.get_or_insert_with(|| ShardSet::with_len(len))
    }

    /// Copy of this request targeting one shard of a partitioned view.
    pub(crate) fn for_shard(&self, shard: &str) -> Self {
        Self {
            table: shard.to_string(),
            kind: self.kind,
            flags: self.flags.clone(),
            new_schema: self.new_schema.clone(),
            old_table: None,
            new_table: None,
            shards: None,
        }
    }

    /// Flips the request into resume mode after failover.
    pub(crate) fn mark_for_resume(&mut self) {
        self.flags.resume = true;
        self.flags.finalize = true;
    }

    /// Whether the client expects a terminal status line.
    pub(crate) const fn reports_status(&self) -> bool {
        !matches!(self.kind, ChangeKind::UpgradeTable(UpgradeScope::Partial))
    }
}
