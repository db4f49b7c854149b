//! Producer-side record construction.

use crate::error::Result;
use gafka_protocol::{Message, TopicMessage};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Builds records from typed payloads.
///
/// Records come out unassigned: partition and offset are left for the log
/// to fill in at append time. Each record is stamped with the current Unix
/// time in seconds.
///
/// # Example
///
/// ```
/// use gafka::{Producer, TopicMessage};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl TopicMessage for UserCreated {
///     const TOPIC: &'static str = "user.created";
/// }
///
/// let producer = Producer::new();
/// let message = UserCreated { user_id: "123".to_string() };
/// let record = producer.record_with_key(&message, "123")?;
///
/// assert_eq!(record.topic(), "user.created");
/// assert_eq!(record.key(), Some("123".as_bytes()));
/// assert!(!record.is_assigned());
/// # Ok::<(), gafka::GafkaError>(())
/// ```
#[derive(Clone)]
pub struct Producer {
    clock: Clock,
}

impl Producer {
    /// Creates a producer stamping records with the system clock.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(unix_now),
        }
    }

    /// Creates a producer that takes its timestamps from `clock`.
    pub fn with_clock(clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    /// Builds a record for a typed message on `T::TOPIC`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn record<T: TopicMessage>(&self, message: &T) -> Result<Message> {
        let record = Message::from_payload(message, (self.clock)())?;
        debug!(
            "Built record for topic '{}' ({} bytes)",
            record.topic(),
            record.size()
        );
        Ok(record)
    }

    /// Builds a keyed record for a typed message on `T::TOPIC`.
    ///
    /// The key is what the log routes on when picking a partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn record_with_key<T: TopicMessage>(&self, message: &T, key: &str) -> Result<Message> {
        let record = Message::keyed_payload(message, key, (self.clock)())?;
        debug!(
            "Built record for topic '{}' with key '{}' ({} bytes)",
            record.topic(),
            key,
            record.size()
        );
        Ok(record)
    }

    /// Builds a record and encodes it to its wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload or the record cannot be serialized.
    pub fn encode<T: TopicMessage>(&self, message: &T) -> Result<Vec<u8>> {
        Ok(self.record(message)?.encode()?)
    }

    /// Builds a keyed record and encodes it to its wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload or the record cannot be serialized.
    pub fn encode_with_key<T: TopicMessage>(&self, message: &T, key: &str) -> Result<Vec<u8>> {
        Ok(self.record_with_key(message, key)?.encode()?)
    }
}

impl Default for Producer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}
