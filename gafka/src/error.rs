//! Error types for the gafka client library.

use gafka_protocol::{DecodingError, EncodingError, InvalidRecord};
use thiserror::Error;

/// Result type alias for gafka operations.
pub type Result<T> = std::result::Result<T, GafkaError>;

/// Errors that can occur while producing or consuming records.
#[derive(Error, Debug)]
pub enum GafkaError {
    /// A record broke one of the record invariants.
    #[error("Invalid record: {0}")]
    Invalid(#[from] InvalidRecord),

    /// Error encoding a record or its payload.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Error decoding a record or its payload.
    #[error("Decoding error: {0}")]
    Decoding(#[from] DecodingError),

    /// An encoded record exceeded the configured size limit.
    #[error("Record of {len} bytes exceeds the {limit} byte limit")]
    Oversized { len: usize, limit: usize },

    /// Error from a message handler.
    #[error("Handler error: {0}")]
    Handler(String),
}

impl GafkaError {
    /// Whether the error is a property of the record itself rather than of
    /// the code handling it. Such records are rejected, not retried.
    pub fn is_bad_record(&self) -> bool {
        matches!(
            self,
            GafkaError::Invalid(_) | GafkaError::Decoding(_) | GafkaError::Oversized { .. }
        )
    }
}
