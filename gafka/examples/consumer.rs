//! Example consumer reading encoded records from stdin.
//!
//! This example shows how to:
//! - Define message types with the TopicMessage trait
//! - Create message handlers
//! - Use the topic_handlers! macro to register handlers
//! - Feed encoded records into a Consumer
//! - Handle graceful shutdown
//!
//! To run this example:
//! ```bash
//! cargo run --example producer | cargo run --example consumer
//! ```
//!
//! Corrupt lines are reported and skipped. `GAFKA_STRICT_TOPICS=1` enables
//! the strict topic charset check, `GAFKA_REDERIVE_SIZE=1` re-derives wrong
//! size fields instead of rejecting the record.

use gafka::{topic_handlers, Consumer, ConsumerConfig, RetryPolicy, SizePolicy, TopicMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Example message type for user creation events
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserCreated {
    user_id: String,
    email: String,
    name: String,
}

impl TopicMessage for UserCreated {
    const TOPIC: &'static str = "user.created";
}

/// Example message type for order placement events
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    user_id: String,
    amount: f64,
    items: Vec<String>,
}

impl TopicMessage for OrderPlaced {
    const TOPIC: &'static str = "order.placed";
}

/// Handler for UserCreated messages
async fn handle_user_created(msg: UserCreated) -> anyhow::Result<()> {
    info!(
        "User created - ID: {}, Email: {}, Name: {}",
        msg.user_id, msg.email, msg.name
    );
    Ok(())
}

/// Handler for OrderPlaced messages
async fn handle_order_placed(msg: OrderPlaced) -> anyhow::Result<()> {
    info!(
        "Order placed - ID: {}, User: {}, Amount: ${:.2}, Items: {:?}",
        msg.order_id, msg.user_id, msg.amount, msg.items
    );
    Ok(())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting consumer example");

    let size_policy = if env_flag("GAFKA_REDERIVE_SIZE") {
        SizePolicy::Rederive
    } else {
        SizePolicy::Reject
    };
    let config = ConsumerConfig::new()
        .with_retry_policy(
            RetryPolicy::new(3).with_backoff(Duration::from_millis(100), Duration::from_secs(30)),
        )
        .with_size_policy(size_policy)
        .with_strict_topics(env_flag("GAFKA_STRICT_TOPICS"));

    info!("Consumer config: {:?}", config);

    let handlers = topic_handlers![
        UserCreated => handle_user_created,
        OrderPlaced => handle_order_placed,
    ];
    let consumer = Consumer::new(config, handlers);

    let shutdown_handle = consumer.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received shutdown signal (Ctrl+C)");
        shutdown_handle.shutdown().await;
    });

    // One encoded record per line
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if tx.send(line.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let stats = consumer.run(rx).await;
    info!(
        "Consumer finished: {} handled, {} rejected, {} failed",
        stats.handled, stats.rejected, stats.failed
    );
    Ok(())
}
