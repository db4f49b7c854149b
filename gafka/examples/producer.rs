//! Example producer writing encoded records to stdout.
//!
//! This example shows how to:
//! - Define message types with the TopicMessage trait
//! - Build unassigned records with a Producer
//! - Assign partition and offset the way a log does on append
//! - Encode records to their wire form
//!
//! To run this example together with the consumer:
//! ```bash
//! cargo run --example producer | cargo run --example consumer
//! ```
//!
//! `GAFKA_PARTITIONS` sets the number of partitions per topic (default 3).

use gafka::{Message, Producer, TopicMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Example message type for user creation events
#[derive(Debug, Serialize, Deserialize)]
struct UserCreated {
    user_id: String,
    email: String,
    name: String,
}

impl TopicMessage for UserCreated {
    const TOPIC: &'static str = "user.created";
}

/// Example message type for order placement events
#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    user_id: String,
    amount: f64,
    items: Vec<String>,
}

impl TopicMessage for OrderPlaced {
    const TOPIC: &'static str = "order.placed";
}

/// Stand-in for the log: routes by key and hands out offsets per partition.
struct DemoLog {
    partitions: i32,
    next_offsets: HashMap<(String, i32), i64>,
}

impl DemoLog {
    fn append(&mut self, record: Message) -> anyhow::Result<Message> {
        let partition = match record.key() {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as i32
            }
            None => 0,
        };
        let next = self
            .next_offsets
            .entry((record.topic().to_string(), partition))
            .or_insert(0);
        let offset = *next;
        *next += 1;
        Ok(record.assign(partition, offset)?)
    }
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only records
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let partitions = std::env::var("GAFKA_PARTITIONS")
        .ok()
        .and_then(|p| p.parse().ok())
        .filter(|p: &i32| *p > 0)
        .unwrap_or(3);

    info!("Starting producer example with {} partition(s)", partitions);

    let producer = Producer::new();
    let mut log = DemoLog {
        partitions,
        next_offsets: HashMap::new(),
    };
    let mut out = std::io::stdout().lock();

    for i in 1..=5 {
        let user = UserCreated {
            user_id: format!("user-{}", i),
            email: format!("user{}@example.com", i),
            name: format!("User {}", i),
        };

        let record = log.append(producer.record(&user)?)?;
        info!("Appended UserCreated for {} at {:?}", user.user_id, record.address());
        out.write_all(&record.encode()?)?;
        out.write_all(b"\n")?;
    }

    // Orders are keyed by user so one user's orders share a partition
    for i in 1..=3 {
        let order = OrderPlaced {
            order_id: format!("order-{}", i),
            user_id: format!("user-{}", i),
            amount: 99.99 * i as f64,
            items: vec![format!("item-{}", i), format!("item-{}", i + 1)],
        };

        let record = log.append(producer.record_with_key(&order, &order.user_id)?)?;
        info!("Appended OrderPlaced {} at {:?}", order.order_id, record.address());
        out.write_all(&record.encode()?)?;
        out.write_all(b"\n")?;
    }

    out.flush()?;
    info!("All records written");
    Ok(())
}
