//! Error types for message records.

use thiserror::Error;

/// A record whose field values break one of the record invariants.
///
/// Only raised by explicit checks such as [`Message::validate`](crate::Message::validate);
/// construction and decoding never raise it on their own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRecord {
    /// The topic is the empty string.
    #[error("topic must not be empty")]
    EmptyTopic,

    /// The topic contains whitespace or non-printable characters.
    #[error("topic {0:?} contains whitespace or control characters")]
    TopicCharset(String),

    /// An assigned partition is negative.
    #[error("partition must be >= 0, got {0}")]
    NegativePartition(i32),

    /// An assigned offset is negative.
    #[error("offset must be >= 0, got {0}")]
    NegativeOffset(i64),

    /// The timestamp is before the Unix epoch.
    #[error("timestamp must be >= 0, got {0}")]
    NegativeTimestamp(i64),

    /// The declared size does not describe the payload.
    #[error("declared size {declared} does not match payload length {actual}")]
    SizeMismatch { declared: i32, actual: usize },

    /// Partition or offset was already assigned by the log.
    #[error("record already carries partition {partition:?} and offset {offset:?}")]
    AlreadyAssigned {
        partition: Option<i32>,
        offset: Option<i64>,
    },

    /// The record has not been assigned a partition and offset yet.
    #[error("record has no partition/offset assigned")]
    Unassigned,

    /// The source message carried no timestamp.
    #[error("record has no timestamp")]
    MissingTimestamp,
}

/// Failure to produce the wire form of a record.
#[derive(Error, Debug)]
pub enum EncodingError {
    /// The payload is longer than a 32-bit size field can describe.
    #[error("payload of {0} bytes does not fit the 32-bit size field")]
    PayloadTooLarge(usize),

    /// The record carries a size that does not describe its payload.
    #[error("refusing to encode declared size {declared} for a payload of {actual} bytes")]
    SizeMismatch { declared: i32, actual: usize },

    /// Error serializing the record or a typed payload to JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure to reconstruct a record (or its typed payload) from bytes.
#[derive(Error, Debug)]
pub enum DecodingError {
    /// The bytes are not a well-formed encoded record.
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The record belongs to a different topic than the requested payload type.
    #[error("expected a record from topic '{expected}', found '{found}'")]
    TopicMismatch {
        expected: &'static str,
        found: String,
    },

    /// The record value is not a valid JSON payload of the requested type.
    #[error("Deserialization error: {0}")]
    Payload(serde_json::Error),
}
