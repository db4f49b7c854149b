//! Wire-level message record for a partitioned, offset-addressed log.
//!
//! A [`Message`] is one log entry addressed by topic, partition and offset,
//! carrying an optional key, an opaque value, a Unix-seconds timestamp and
//! the declared size of the value. This crate defines the record, the checks
//! that make a record valid, and its JSON wire form:
//!
//! ```json
//! {"topic":"orders","partition":2,"offset":17,"key":"Y3VzdC05","value":"cGFpZA==","timestamp":1700000000,"size":4}
//! ```
//!
//! Key and value are base64 on the wire. `partition`, `offset` and `key` are
//! omitted while unset. Decoding never validates; callers reading from an
//! untrusted source call [`Message::validate`] themselves.
//!
//! Payload types are bound to their topic with [`TopicMessage`].

mod error;
#[cfg(feature = "rdkafka")]
mod interop;
mod message;
mod typed;
mod wire;

pub use error::{DecodingError, EncodingError, InvalidRecord};
pub use message::{Message, RecordAddress, SizePolicy};
pub use typed::TopicMessage;
