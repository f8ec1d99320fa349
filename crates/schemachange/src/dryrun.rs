//! Dry-run diagnostics for table alters.
//!
//! A dry run tells the client what an alter would do without doing it: which
//! files would be rebuilt, and whether the change is possible at all.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::ClientStream;
use crate::error::{Error, Result};
use crate::request::{Compression, SchemaChangeRequest};

/// Highest schema version a table reaches before instant schema change
/// requires a rebuild.
pub const MAX_SCHEMA_VERSION: u32 = 255;

/// Current on-disk settings of the table being altered.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct ExistingTable {
    /// Records carry on-disk headers
    pub headers: bool,
    /// In-place updates enabled
    pub in_place_updates: bool,
    /// Instant schema change enabled
    pub instant_schema_change: bool,
    /// Record compression
    pub compression: Compression,
    /// Blob compression
    pub blob_compression: Compression,
    /// Current schema version
    pub version: u32,
    /// Number of constraints on the table
    pub constraint_count: usize,
}

/// How the on-disk schema changes.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum SchemaDelta {
    /// Same on-disk layout
    NoChange,
    /// Layout changes
    Changed,
    /// A new field has neither a default nor allows null
    BadNewField,
    /// An index referenced by another table's constraint changes
    BadIndexChange,
    /// The new schema could not be processed
    Invalid,
}

/// What the external schema differ found.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SchemaDiff {
    /// On-disk delta
    pub delta: SchemaDelta,
    /// Constraints of the new schema reference existing tables and indexes
    pub constraints_valid: bool,
    /// A rebuild plan could be produced
    pub plan_available: bool,
    /// Number of constraints in the new schema
    pub new_constraint_count: usize,
}

/// Result of an accepted dry run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DryRunAssessment {
    /// The on-disk header setting changes
    pub header_change: bool,
    /// Data files would be rebuilt
    pub force_data_rebuild: bool,
    /// Blob files would be rebuilt
    pub force_blob_rebuild: bool,
    /// The whole table would be rebuilt
    pub rebuild_required: bool,
}

/// Evaluates an alter of `existing` without executing it.
///
/// Diagnostics go to `client` as `>` lines. A change that cannot be applied
/// returns [`Error::DryRunRejected`] carrying the same text.
pub fn dry_run(
    request: &SchemaChangeRequest,
    existing: &ExistingTable,
    diff: &SchemaDiff,
    client: &ClientStream,
) -> Result<DryRunAssessment> {
    let flags = request.flags();
    let mut assessment = DryRunAssessment {
        force_data_rebuild: flags.force_data_rebuild,
        force_blob_rebuild: flags.force_blob_rebuild,
        ..DryRunAssessment::default()
    };

    if flags.headers != existing.headers {
        assessment.header_change = true;
        assessment.force_data_rebuild = true;
        assessment.force_blob_rebuild = true;
    }

    if existing.in_place_updates && !flags.in_place_updates && !flags.force_rebuild {
        return Err(reject(client, "Cannot remove inplace updates without rebuilding."));
    }

    if existing.instant_schema_change && !flags.instant_schema_change {
        return Err(reject(
            client,
            "Cannot remove instant schema-change without rebuilding.",
        ));
    }

    if flags.force_rebuild {
        client.info("Forcing table rebuild");
        assessment.rebuild_required = true;
        return Ok(assessment);
    }

    if assessment.force_data_rebuild {
        client.info("Forcing data file rebuild");
    }

    if assessment.force_blob_rebuild {
        client.info("Forcing blob file rebuild");
    }

    if !diff.constraints_valid {
        return Err(reject(client, "Constraints of the new schema are invalid"));
    }

    if flags.compression != existing.compression {
        assessment.force_data_rebuild = true;
    }

    if flags.blob_compression != existing.blob_compression {
        assessment.force_blob_rebuild = true;
    }

    match diff.delta {
        SchemaDelta::BadNewField => {
            return Err(reject(client, "Cannot add new field without dbstore or null"));
        }
        SchemaDelta::BadIndexChange => {
            return Err(reject(
                client,
                "Cannot change index referenced by other tables",
            ));
        }
        SchemaDelta::Invalid => return Err(reject(client, "Failed to process schema!")),
        SchemaDelta::NoChange | SchemaDelta::Changed => {}
    }

    if !diff.plan_available {
        client.info("Error in plan module.");
        client.info("Will need to rebuild table");
        assessment.rebuild_required = true;
        return Ok(assessment);
    }

    match diff.delta {
        SchemaDelta::NoChange => {
            if existing.constraint_count > 0 && diff.new_constraint_count == 0 {
                client.info("All table constraints will be dropped");
            } else {
                client.info("There is no change in the schema");
            }
        }
        SchemaDelta::Changed
            if existing.version >= MAX_SCHEMA_VERSION && flags.instant_schema_change =>
        {
            client.info(format!(
                "Table is at version: {} MAXVER: {MAX_SCHEMA_VERSION}",
                existing.version
            ));
            client.info("Will need to rebuild table");
            assessment.rebuild_required = true;
        }
        _ => {}
    }

    debug!(table = request.table(), ?assessment, "dry run complete");
    Ok(assessment)
}

fn reject(client: &ClientStream, message: &str) -> Error {
    client.info(message);
    Error::DryRunRejected(message.to_string())
}
