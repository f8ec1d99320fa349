//! Versioned envelope for persisted schema-change markers.
//!
//! A marker written by one node must be readable by whichever node becomes
//! master next, which may run a different build. The envelope carries the
//! writer's format version and the oldest reader version able to understand
//! it; fields added later default when missing and are ignored when unknown.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::request::SchemaChangeRequest;

/// Marker format written by this build.
pub const MARKER_FORMAT_VERSION: u16 = 1;

/// Oldest marker reader that can decode what this build writes.
pub const MARKER_MIN_READER_VERSION: u16 = 1;

/// Errors while packing or unpacking a marker.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization error
    #[error("could not pack schema change: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("could not unpack schema change: {0}")]
    Deserialization(String),

    /// The marker needs a newer reader
    #[error("marker format {found} requires reader version {required}, this node reads up to {supported}")]
    UnsupportedVersion {
        /// Writer format version
        found: u16,
        /// Minimum reader version required
        required: u16,
        /// Highest version this node understands
        supported: u16,
    },
}

impl From<ciborium::ser::Error<std::io::Error>> for CodecError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for CodecError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        Self::Deserialization(err.to_string())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct MarkerEnvelope {
    version: u16,
    min_reader_version: u16,
    request: SchemaChangeRequest,
}

/// Packs a request into a marker blob.
pub fn encode_marker(request: &SchemaChangeRequest) -> Result<Bytes, CodecError> {
    let envelope = MarkerEnvelope {
        version: MARKER_FORMAT_VERSION,
        min_reader_version: MARKER_MIN_READER_VERSION,
        request: request.clone(),
    };

    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut bytes)?;
    Ok(Bytes::from(bytes))
}

/// Unpacks a marker blob into a request.
pub fn decode_marker(bytes: &[u8]) -> Result<SchemaChangeRequest, CodecError> {
    let envelope: MarkerEnvelope = ciborium::de::from_reader(bytes)?;

    if envelope.min_reader_version > MARKER_FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: envelope.version,
            required: envelope.min_reader_version,
            supported: MARKER_FORMAT_VERSION,
        });
    }

    Ok(envelope.request)
}

impl TryFrom<Bytes> for SchemaChangeRequest {
    type Error = CodecError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        decode_marker(bytes.as_ref())
    }
}

impl TryFrom<&SchemaChangeRequest> for Bytes {
    type Error = CodecError;

    fn try_from(request: &SchemaChangeRequest) -> Result<Self, Self::Error> {
        encode_marker(request)
    }
}
