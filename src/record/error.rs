//! Record codec error types.

use thiserror::Error;

/// Errors that can occur encoding, decoding or validating a durable record
#[derive(Debug, Error)]
pub enum RecordError {
    /// Serialization to JSON or binary format failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON or binary format failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Record format version is not supported by this version
    #[error("Unsupported record version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Record decoded but describes an impossible bike
    #[error("Record validation failed: {0}")]
    ValidationFailed(String),
}
