//! Binding between payload types and the topics they travel on.

use crate::error::{DecodingError, EncodingError};
use crate::message::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for payload types carried in a message record's `value`.
///
/// Implementors name the topic their records belong to. Payloads are JSON
/// inside the record value, which itself stays opaque bytes on the wire.
///
/// # Example
///
/// ```
/// use gafka_protocol::{Message, TopicMessage};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct OrderPaid {
///     order_id: String,
///     amount_cents: u64,
/// }
///
/// impl TopicMessage for OrderPaid {
///     const TOPIC: &'static str = "orders";
/// }
///
/// let paid = OrderPaid { order_id: "o-1".into(), amount_cents: 1299 };
/// let message = Message::from_payload(&paid, 1_700_000_000)?;
/// assert_eq!(message.topic(), "orders");
/// assert_eq!(message.payload::<OrderPaid>()?, paid);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub trait TopicMessage: Serialize + DeserializeOwned + Send + Sync {
    /// The topic where records of this type are appended.
    const TOPIC: &'static str;
}

impl Message {
    /// Builds an unassigned record on `T::TOPIC` holding the JSON payload.
    pub fn from_payload<T: TopicMessage>(payload: &T, timestamp: i64) -> Result<Self, EncodingError> {
        let value = serde_json::to_vec(payload)?;
        Ok(Self::new(T::TOPIC, value, timestamp))
    }

    /// Like [`from_payload`](Message::from_payload), with a routing key.
    pub fn keyed_payload<T: TopicMessage>(
        payload: &T,
        key: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Result<Self, EncodingError> {
        let value = serde_json::to_vec(payload)?;
        Ok(Self::keyed(T::TOPIC, key, value, timestamp))
    }

    /// Decodes the record value as a `T`, provided the record is on `T::TOPIC`.
    pub fn payload<T: TopicMessage>(&self) -> Result<T, DecodingError> {
        if self.topic() != T::TOPIC {
            return Err(DecodingError::TopicMismatch {
                expected: T::TOPIC,
                found: self.topic().to_string(),
            });
        }
        serde_json::from_slice(self.value()).map_err(DecodingError::Payload)
    }
}
