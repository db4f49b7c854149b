//! Conversion from messages read with `rdkafka`.

use crate::error::InvalidRecord;
use crate::message::Message;
use rdkafka::message::Message as KafkaMessage;

impl Message {
    /// Copies an `rdkafka` message into an assigned record.
    ///
    /// Kafka timestamps are milliseconds; the record keeps whole Unix seconds.
    /// A message without a payload becomes a record with an empty value.
    pub fn from_kafka<M: KafkaMessage>(message: &M) -> Result<Self, InvalidRecord> {
        let millis = message
            .timestamp()
            .to_millis()
            .ok_or(InvalidRecord::MissingTimestamp)?;
        let value = message.payload().unwrap_or_default().to_vec();
        let record = match message.key() {
            Some(key) => Self::keyed(message.topic(), key, value, millis.div_euclid(1000)),
            None => Self::new(message.topic(), value, millis.div_euclid(1000)),
        };
        record.assign(message.partition(), message.offset())
    }
}
