//! Integration tests for the gafka library.

use gafka::{
    topic_handlers, Consumer, ConsumerConfig, ConsumerStats, Delivery, GafkaError, HandlerBox,
    InvalidRecord, Message, Producer, RetryPolicy, SizePolicy, TopicMessage,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestMessage {
    id: String,
    value: i32,
}

impl TopicMessage for TestMessage {
    const TOPIC: &'static str = "test.topic";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnotherMessage {
    name: String,
}

impl TopicMessage for AnotherMessage {
    const TOPIC: &'static str = "another.topic";
}

const NOW: i64 = 1_700_000_000;

fn producer() -> Producer {
    Producer::with_clock(|| NOW)
}

fn test_message(id: &str) -> TestMessage {
    TestMessage {
        id: id.to_string(),
        value: 42,
    }
}

/// Encodes a record the way the log hands it to consumers.
fn appended(msg: &TestMessage, partition: i32, offset: i64) -> Vec<u8> {
    producer()
        .record(msg)
        .unwrap()
        .assign(partition, offset)
        .unwrap()
        .encode()
        .unwrap()
}

/// Rewrites the `size` field of an encoded record.
fn with_size(bytes: &[u8], size: i64) -> Vec<u8> {
    let mut json: serde_json::Value = serde_json::from_slice(bytes).unwrap();
    json["size"] = serde_json::json!(size);
    serde_json::to_vec(&json).unwrap()
}

fn counting_handlers(count: Arc<AtomicUsize>) -> HashMap<&'static str, HandlerBox> {
    topic_handlers![
        TestMessage => move |msg: TestMessage| {
            let count = Arc::clone(&count);
            async move {
                assert!(!msg.id.is_empty());
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        },
    ]
}

fn fast_retries() -> ConsumerConfig {
    ConsumerConfig::new()
        .with_retry_policy(
            RetryPolicy::new(2).with_backoff(Duration::from_millis(1), Duration::from_millis(4)),
        )
}

#[tokio::test]
async fn test_topic_message_trait() {
    // Verify that the TOPIC constant is accessible
    assert_eq!(TestMessage::TOPIC, "test.topic");
    assert_eq!(AnotherMessage::TOPIC, "another.topic");
}

#[tokio::test]
async fn test_producer_builds_unassigned_records() {
    let record = producer().record(&test_message("test-123")).unwrap();

    assert_eq!(record.topic(), "test.topic");
    assert_eq!(record.timestamp(), NOW);
    assert_eq!(record.key(), None);
    assert!(!record.is_assigned());
    assert!(record.validate().is_ok());

    let payload: TestMessage = record.payload().unwrap();
    assert_eq!(payload.id, "test-123");
    assert_eq!(payload.value, 42);
}

#[tokio::test]
async fn test_producer_encodes_keyed_records() {
    let bytes = producer()
        .encode_with_key(&test_message("test-123"), "user-42")
        .unwrap();

    let decoded = Message::decode(&bytes).unwrap();
    assert_eq!(decoded.key(), Some("user-42".as_bytes()));
    assert_eq!(decoded.size() as usize, decoded.value().len());
    assert_eq!(decoded.partition(), None);
}

#[tokio::test]
async fn test_producer_uses_system_clock_by_default() {
    let record = Producer::new().record(&test_message("now")).unwrap();
    assert!(record.timestamp() >= NOW);
}

#[tokio::test]
async fn test_topic_handlers_macro() {
    async fn handle_test(msg: TestMessage) -> anyhow::Result<()> {
        assert_eq!(msg.id, "test");
        Ok(())
    }

    async fn handle_another(msg: AnotherMessage) -> anyhow::Result<()> {
        assert_eq!(msg.name, "another");
        Ok(())
    }

    let handlers = topic_handlers![
        TestMessage => handle_test,
        AnotherMessage => handle_another,
    ];

    // Verify handlers are registered for the correct topics
    assert!(handlers.contains_key("test.topic"));
    assert!(handlers.contains_key("another.topic"));
    assert_eq!(handlers.len(), 2);
}

#[tokio::test]
async fn test_handler_execution() {
    async fn handle_message(msg: TestMessage) -> anyhow::Result<()> {
        assert!(!msg.id.is_empty());
        Ok(())
    }

    let handlers = topic_handlers![
        TestMessage => handle_message,
    ];

    let handler = handlers.get("test.topic").unwrap();
    let record = producer().record(&test_message("test-456")).unwrap();

    let result = handler(record).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_handler_with_invalid_payload() {
    async fn handle_message(_msg: TestMessage) -> anyhow::Result<()> {
        Ok(())
    }

    let handlers = topic_handlers![
        TestMessage => handle_message,
    ];

    let handler = handlers.get("test.topic").unwrap();

    // A value that is not JSON should result in a decoding error
    let record = Message::new("test.topic", "not valid json", NOW);
    let err = handler(record).await.unwrap_err();
    assert!(matches!(err, GafkaError::Decoding(_)));
    assert!(err.is_bad_record());
}

#[tokio::test]
async fn test_process_handles_valid_record() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(ConsumerConfig::new(), counting_handlers(Arc::clone(&count)));

    let delivery = consumer
        .process(&appended(&test_message("a"), 1, 7))
        .await
        .unwrap();

    match delivery {
        Delivery::Handled(address) => assert_eq!(address.to_string(), "test.topic/1@7"),
        other => panic!("expected Handled, got {:?}", other),
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(consumer.last_handled("test.topic", 1), Some(7));
    assert_eq!(consumer.last_handled("test.topic", 0), None);
}

#[tokio::test]
async fn test_process_rejects_bad_records() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(ConsumerConfig::new(), counting_handlers(Arc::clone(&count)));
    let good = appended(&test_message("a"), 0, 0);

    let corrupt = consumer.process(b"{\"topic\":").await.unwrap_err();
    assert!(matches!(corrupt, GafkaError::Decoding(_)));

    let forged = consumer.process(&with_size(&good, 3)).await.unwrap_err();
    assert!(matches!(
        forged,
        GafkaError::Invalid(InvalidRecord::SizeMismatch { declared: 3, .. })
    ));

    let unassigned = producer().encode(&test_message("a")).unwrap();
    let err = consumer.process(&unassigned).await.unwrap_err();
    assert!(matches!(err, GafkaError::Invalid(InvalidRecord::Unassigned)));

    let negative = Message::new("test.topic", "{}", -1)
        .assign(0, 0)
        .unwrap()
        .encode()
        .unwrap();
    let err = consumer.process(&negative).await.unwrap_err();
    assert!(matches!(
        err,
        GafkaError::Invalid(InvalidRecord::NegativeTimestamp(-1))
    ));

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_process_rederives_size_when_configured() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(
        ConsumerConfig::new().with_size_policy(SizePolicy::Rederive),
        counting_handlers(Arc::clone(&count)),
    );

    let forged = with_size(&appended(&test_message("a"), 0, 0), 3);
    let delivery = consumer.process(&forged).await.unwrap();

    assert!(matches!(delivery, Delivery::Handled(_)));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_process_rejects_oversized_records() {
    let consumer = Consumer::new(
        ConsumerConfig::new().with_max_record_bytes(16),
        counting_handlers(Arc::new(AtomicUsize::new(0))),
    );

    let err = consumer
        .process(&appended(&test_message("a"), 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, GafkaError::Oversized { limit: 16, .. }));
    assert!(err.is_bad_record());
}

#[tokio::test]
async fn test_process_strict_topics() {
    let consumer = Consumer::new(
        ConsumerConfig::new().with_strict_topics(true),
        counting_handlers(Arc::new(AtomicUsize::new(0))),
    );

    let spaced = Message::new("test topic", "{}", NOW)
        .assign(0, 0)
        .unwrap()
        .encode()
        .unwrap();
    let err = consumer.process(&spaced).await.unwrap_err();
    assert!(matches!(
        err,
        GafkaError::Invalid(InvalidRecord::TopicCharset(_))
    ));
}

#[tokio::test]
async fn test_process_unrouted_and_duplicate() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(ConsumerConfig::new(), counting_handlers(Arc::clone(&count)));

    let other = producer()
        .record(&AnotherMessage {
            name: "x".to_string(),
        })
        .unwrap()
        .assign(0, 0)
        .unwrap()
        .encode()
        .unwrap();
    assert!(matches!(
        consumer.process(&other).await.unwrap(),
        Delivery::Unrouted(_)
    ));

    let first = appended(&test_message("a"), 0, 5);
    assert!(matches!(
        consumer.process(&first).await.unwrap(),
        Delivery::Handled(_)
    ));
    assert!(matches!(
        consumer.process(&first).await.unwrap(),
        Delivery::Duplicate(_)
    ));
    assert!(matches!(
        consumer.process(&appended(&test_message("b"), 0, 4)).await.unwrap(),
        Delivery::Duplicate(_)
    ));
    // Offsets are tracked per partition
    assert!(matches!(
        consumer.process(&appended(&test_message("c"), 1, 4)).await.unwrap(),
        Delivery::Handled(_)
    ));

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_handler_retries_then_succeeds() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let handlers = topic_handlers![
        TestMessage => move |_msg: TestMessage| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("temporarily unavailable");
                }
                Ok(())
            }
        },
    ];
    let consumer = Consumer::new(fast_retries(), handlers);

    let delivery = consumer
        .process(&appended(&test_message("a"), 0, 0))
        .await
        .unwrap();

    assert!(matches!(delivery, Delivery::Handled(_)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_handler_failure_exhausts_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let handlers = topic_handlers![
        TestMessage => move |_msg: TestMessage| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("boom"))
            }
        },
    ];
    let consumer = Consumer::new(fast_retries(), handlers);

    let err = consumer
        .process(&appended(&test_message("a"), 0, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, GafkaError::Handler(ref msg) if msg == "boom"));
    assert!(!err.is_bad_record());
    // One attempt plus two retries
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(consumer.last_handled("test.topic", 0), None);
}

#[tokio::test]
async fn test_bad_payload_is_not_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(fast_retries(), counting_handlers(Arc::clone(&attempts)));

    let record = Message::new("test.topic", "[1,2,3]", NOW)
        .assign(0, 0)
        .unwrap()
        .encode()
        .unwrap();
    let err = consumer.process(&record).await.unwrap_err();

    assert!(err.is_bad_record());
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_run_skips_corrupt_records() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(fast_retries(), counting_handlers(Arc::clone(&count)));
    let (tx, rx) = mpsc::channel(16);

    let first = appended(&test_message("a"), 0, 0);
    let records = vec![
        b"garbage".to_vec(),
        first.clone(),
        with_size(&appended(&test_message("b"), 0, 1), 99),
        producer().encode(&test_message("c")).unwrap(),
        appended(&test_message("d"), 0, 2),
        first,
        producer()
            .record(&AnotherMessage {
                name: "x".to_string(),
            })
            .unwrap()
            .assign(3, 0)
            .unwrap()
            .encode()
            .unwrap(),
    ];
    for record in records {
        tx.send(record).await.unwrap();
    }
    drop(tx);

    let stats = consumer.run(rx).await;

    assert_eq!(
        stats,
        ConsumerStats {
            handled: 2,
            unrouted: 1,
            duplicates: 1,
            rejected: 3,
            failed: 0,
        }
    );
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(consumer.last_handled("test.topic", 0), Some(2));
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let consumer = Consumer::new(
        ConsumerConfig::new().with_poll_interval(Duration::from_millis(10)),
        counting_handlers(Arc::new(AtomicUsize::new(0))),
    );
    let (tx, rx) = mpsc::channel::<Vec<u8>>(1);

    let handle = consumer.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
    });

    let stats = tokio::time::timeout(Duration::from_secs(5), consumer.run(rx))
        .await
        .expect("consumer should stop after shutdown");
    assert_eq!(stats, ConsumerStats::default());

    // The sender is still open; shutdown alone ended the loop
    drop(tx);
}

#[tokio::test]
async fn test_consumer_topics() {
    async fn handle_another(_msg: AnotherMessage) -> anyhow::Result<()> {
        Ok(())
    }

    let mut handlers = counting_handlers(Arc::new(AtomicUsize::new(0)));
    handlers.extend(topic_handlers![AnotherMessage => handle_another]);
    let consumer = Consumer::new(ConsumerConfig::default(), handlers);

    assert_eq!(consumer.topics(), vec!["another.topic", "test.topic"]);

    consumer.shutdown().await;
    let (_tx, rx) = mpsc::channel(1);
    assert_eq!(consumer.run(rx).await, ConsumerStats::default());
}

/// Counts calls; records with id "slow" keep their handler busy for a while.
fn slow_handlers(count: Arc<AtomicUsize>) -> HashMap<&'static str, HandlerBox> {
    topic_handlers![
        TestMessage => move |msg: TestMessage| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                if msg.id == "slow" {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok::<(), anyhow::Error>(())
            }
        },
    ]
}

#[tokio::test]
async fn test_overlapping_offsets_never_move_back() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(ConsumerConfig::new(), slow_handlers(Arc::clone(&count)));

    // Offset 5 finishes after offset 10
    let slow = appended(&test_message("slow"), 0, 5);
    let fast = appended(&test_message("fast"), 0, 10);
    let (first, second) = tokio::join!(consumer.process(&slow), consumer.process(&fast));
    assert!(matches!(first.unwrap(), Delivery::Handled(_)));
    assert!(matches!(second.unwrap(), Delivery::Handled(_)));

    assert_eq!(consumer.last_handled("test.topic", 0), Some(10));
    assert!(matches!(
        consumer.process(&fast).await.unwrap(),
        Delivery::Duplicate(_)
    ));
    assert!(matches!(
        consumer.process(&slow).await.unwrap(),
        Delivery::Duplicate(_)
    ));
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_same_offset_in_flight_runs_once() {
    let count = Arc::new(AtomicUsize::new(0));
    let consumer = Consumer::new(ConsumerConfig::new(), slow_handlers(Arc::clone(&count)));

    let record = appended(&test_message("slow"), 2, 3);
    let (first, second) = tokio::join!(consumer.process(&record), consumer.process(&record));

    let mut deliveries = [first.unwrap(), second.unwrap()];
    deliveries.sort_by_key(|d| matches!(d, Delivery::Duplicate(_)));
    assert!(matches!(deliveries[0], Delivery::Handled(_)));
    assert!(matches!(deliveries[1], Delivery::Duplicate(_)));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(consumer.last_handled("test.topic", 2), Some(3));
}

#[tokio::test]
async fn test_failed_offset_can_be_redelivered() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let handlers = topic_handlers![
        TestMessage => move |_msg: TestMessage| {
            let seen = Arc::clone(&seen);
            async move {
                // Fails on the first delivery only
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("downstream unavailable");
                }
                Ok(())
            }
        },
    ];
    let consumer = Consumer::new(
        ConsumerConfig::new().with_retry_policy(RetryPolicy::never()),
        handlers,
    );
    let record = appended(&test_message("a"), 0, 0);

    assert!(consumer.process(&record).await.is_err());
    assert_eq!(consumer.last_handled("test.topic", 0), None);

    assert!(matches!(
        consumer.process(&record).await.unwrap(),
        Delivery::Handled(_)
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_policy_delays() {
    let policy = RetryPolicy::new(5)
        .with_backoff(Duration::from_millis(100), Duration::from_millis(350));

    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(350));
    assert_eq!(policy.delay(40), Duration::from_millis(350));
    assert_eq!(RetryPolicy::default().max_retries, 3);
}
