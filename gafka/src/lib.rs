//! Typed producer and consumer surface over gafka message records.
//!
//! This crate sits on top of [`gafka_protocol`]. It builds records from typed
//! payloads on the producing side and turns a stream of encoded records into
//! typed handler calls on the consuming side.
//!
//! # Features
//!
//! - Typed record construction with `Producer::record<T: TopicMessage>(&T)`
//! - Consumer with topic-based routing using `HashMap<&'static str, HandlerBox>`
//! - `topic_handlers!` macro for easy handler registration
//! - Validation of every consumed record, with bad records skipped and counted
//! - Retry with backoff on handler errors, redelivery detection per partition
//! - Graceful shutdown support
//! - Integrated tracing
//!
//! # Example
//!
//! ```
//! use gafka::{topic_handlers, Consumer, ConsumerConfig, Delivery, Producer, TopicMessage};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct UserCreated {
//!     user_id: String,
//! }
//!
//! impl TopicMessage for UserCreated {
//!     const TOPIC: &'static str = "user.created";
//! }
//!
//! async fn handle_user_created(msg: UserCreated) -> anyhow::Result<()> {
//!     println!("User created: {}", msg.user_id);
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let producer = Producer::new();
//!     let record = producer.record(&UserCreated { user_id: "123".to_string() })?;
//!
//!     // The log assigns partition and offset on append.
//!     let bytes = record.assign(0, 0)?.encode()?;
//!
//!     let consumer = Consumer::new(
//!         ConsumerConfig::new(),
//!         topic_handlers![UserCreated => handle_user_created],
//!     );
//!     let delivery = consumer.process(&bytes).await?;
//!     assert!(matches!(delivery, Delivery::Handled(_)));
//!     Ok(())
//! }
//! ```

mod consumer;
mod error;
mod producer;

pub use consumer::{
    Consumer, ConsumerConfig, ConsumerStats, Delivery, HandlerBox, RetryPolicy, ShutdownHandle,
};
pub use error::{GafkaError, Result};
pub use producer::Producer;

/// Re-export the record types for convenience
pub use gafka_protocol::{
    DecodingError, EncodingError, InvalidRecord, Message, RecordAddress, SizePolicy, TopicMessage,
};

/// Macro to create a HashMap of topic handlers for the Consumer.
///
/// Each handler receives the record payload decoded as its message type.
/// A payload that does not decode is reported as a bad record.
///
/// # Example
///
/// ```
/// use gafka::{topic_handlers, TopicMessage};
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
/// async fn handle_user_created(msg: UserCreated) -> anyhow::Result<()> {
///     println!("User created: {:?}", msg);
///     Ok(())
/// }
///
/// let handlers = topic_handlers![
///     UserCreated => handle_user_created,
/// ];
/// assert!(handlers.contains_key("user.created"));
/// ```
#[macro_export]
macro_rules! topic_handlers {
    ($($msg_type:ty => $handler:expr),* $(,)?) => {{
        let mut map: ::std::collections::HashMap<
            &'static str,
            $crate::HandlerBox,
        > = ::std::collections::HashMap::new();
        $(
            let handler = ::std::sync::Arc::new($handler);
            map.insert(
                <$msg_type as $crate::TopicMessage>::TOPIC,
                Box::new(move |message: $crate::Message| {
                    let handler = ::std::sync::Arc::clone(&handler);
                    Box::pin(async move {
                        let payload = message
                            .payload::<$msg_type>()
                            .map_err($crate::GafkaError::from)?;
                        handler(payload).await
                            .map_err(|e| $crate::GafkaError::Handler(e.to_string()))
                    })
                })
            );
        )*
        map
    }};
}
