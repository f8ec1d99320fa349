use schemachange_llmeta::MetaStoreError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
#[error("in-memory metadata store error: {0}")]
pub struct Error(pub String);

impl MetaStoreError for Error {}
