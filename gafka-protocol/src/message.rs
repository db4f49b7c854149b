//! The message record and its validity contract.

use crate::error::{DecodingError, EncodingError, InvalidRecord};
use crate::wire;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry in a topic-partition log.
///
/// A record starts out producer-side, with no partition or offset, and is
/// [`assign`](Message::assign)ed both exactly once by the owning log. After
/// that it is an immutable value that can be shared freely between threads.
///
/// `size` is derived from `value` when the record is built here. A record
/// that came out of [`decode`](Message::decode) carries whatever size the
/// sender declared, so it must be checked with [`validate`](Message::validate)
/// or [`check_size`](Message::check_size) before the size is trusted.
///
/// # Example
///
/// ```
/// use gafka_protocol::Message;
///
/// let message = Message::keyed("orders", "cust-9", "paid", 1_700_000_000)
///     .assign(2, 17)?;
/// assert_eq!(message.size(), 4);
///
/// let bytes = message.encode()?;
/// let decoded = Message::decode(&bytes)?;
/// decoded.validate()?;
/// assert_eq!(decoded, message);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    topic: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::present"
    )]
    partition: Option<i32>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::present"
    )]
    offset: Option<i64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "wire::optional_bytes"
    )]
    key: Option<Vec<u8>>,

    #[serde(with = "wire::bytes")]
    value: Vec<u8>,

    timestamp: i64,

    size: i32,
}

/// Size field for a payload, saturating at `i32::MAX` so an oversized
/// payload shows up as a mismatch instead of a wrapped value.
fn payload_size(value: &[u8]) -> i32 {
    i32::try_from(value.len()).unwrap_or(i32::MAX)
}

impl Message {
    /// Creates an unassigned record without a key.
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>, timestamp: i64) -> Self {
        let value = value.into();
        Self {
            topic: topic.into(),
            partition: None,
            offset: None,
            key: None,
            size: payload_size(&value),
            value,
            timestamp,
        }
    }

    /// Creates an unassigned record with a key.
    ///
    /// An empty key is still a key: it is kept distinct from "no key".
    pub fn keyed(
        topic: impl Into<String>,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        let mut message = Self::new(topic, value, timestamp);
        message.key = Some(key.into());
        message
    }

    /// Assigns the record its partition and offset.
    ///
    /// This is the log-side step of the lifecycle and happens once. A record
    /// that already carries either field is rejected.
    pub fn assign(mut self, partition: i32, offset: i64) -> Result<Self, InvalidRecord> {
        if self.partition.is_some() || self.offset.is_some() {
            return Err(InvalidRecord::AlreadyAssigned {
                partition: self.partition,
                offset: self.offset,
            });
        }
        self.partition = Some(partition);
        self.offset = Some(offset);
        Ok(self)
    }

    /// The topic the record belongs to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The partition, or `None` before the log assigned one.
    pub fn partition(&self) -> Option<i32> {
        self.partition
    }

    /// The offset, or `None` before the log assigned one.
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// The key, or `None` when the record has none (distinct from an empty key).
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// The opaque payload bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The declared payload size. Only trustworthy once checked.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Whether the log has assigned both partition and offset.
    pub fn is_assigned(&self) -> bool {
        self.partition.is_some() && self.offset.is_some()
    }

    /// The `(topic, partition, offset)` address, once assigned.
    pub fn address(&self) -> Option<RecordAddress> {
        Some(RecordAddress {
            topic: self.topic.clone(),
            partition: self.partition?,
            offset: self.offset?,
        })
    }

    /// Whether the declared size matches the payload length.
    pub fn is_size_consistent(&self) -> bool {
        usize::try_from(self.size).is_ok_and(|size| size == self.value.len())
    }

    /// Fails with [`InvalidRecord::SizeMismatch`] if the declared size is wrong.
    pub fn check_size(&self) -> Result<(), InvalidRecord> {
        if self.is_size_consistent() {
            Ok(())
        } else {
            Err(InvalidRecord::SizeMismatch {
                declared: self.size,
                actual: self.value.len(),
            })
        }
    }

    /// Replaces the declared size with the one measured from the payload.
    pub fn rederive_size(mut self) -> Self {
        self.size = payload_size(&self.value);
        self
    }

    /// Checks every record invariant and reports the first one broken.
    pub fn validate(&self) -> Result<(), InvalidRecord> {
        if self.topic.is_empty() {
            return Err(InvalidRecord::EmptyTopic);
        }
        if let Some(partition) = self.partition.filter(|p| *p < 0) {
            return Err(InvalidRecord::NegativePartition(partition));
        }
        if let Some(offset) = self.offset.filter(|o| *o < 0) {
            return Err(InvalidRecord::NegativeOffset(offset));
        }
        if self.timestamp < 0 {
            return Err(InvalidRecord::NegativeTimestamp(self.timestamp));
        }
        self.check_size()
    }

    /// [`validate`](Message::validate), plus the recommended topic charset:
    /// printable characters only, no whitespace.
    pub fn validate_strict(&self) -> Result<(), InvalidRecord> {
        self.validate()?;
        if self
            .topic
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(InvalidRecord::TopicCharset(self.topic.clone()));
        }
        Ok(())
    }

    /// Serializes the record to its JSON wire form.
    ///
    /// Field order and names are fixed. An unassigned partition/offset and an
    /// absent key are left out entirely.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let actual = self.value.len();
        if i32::try_from(actual).is_err() {
            return Err(EncodingError::PayloadTooLarge(actual));
        }
        if !self.is_size_consistent() {
            return Err(EncodingError::SizeMismatch {
                declared: self.size,
                actual,
            });
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a record from its JSON wire form.
    ///
    /// The result is syntactically sound but not validated.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodingError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// What a caller does with a decoded record whose size is wrong.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SizePolicy {
    /// Treat the record as invalid.
    #[default]
    Reject,
    /// Replace the declared size with the measured one.
    Rederive,
}

impl SizePolicy {
    /// Checks or repairs the declared size of `message` according to the policy.
    pub fn apply(self, message: Message) -> Result<Message, InvalidRecord> {
        match self {
            SizePolicy::Reject => message.check_size().map(|()| message),
            SizePolicy::Rederive => Ok(message.rederive_size()),
        }
    }
}

/// Stable address of an assigned record within the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordAddress {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for RecordAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}
