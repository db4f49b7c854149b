//! Record consumer with topic-based routing.

use crate::error::{GafkaError, Result};
use gafka_protocol::{InvalidRecord, Message, RecordAddress, SizePolicy};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Type alias for message handlers.
///
/// Handlers are async functions that take a validated, assigned record and
/// return a Result. They may be called more than once for the same record
/// when they fail.
pub type HandlerBox =
    Box<dyn Fn(Message) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// How often, and how patiently, a failing handler is called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls made after the first one fails.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every retry after it.
    pub initial_backoff: Duration,
    /// Upper bound for the doubled delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy with `max_retries` retries and the default backoff window.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }

    /// A policy that gives up after the first failure.
    pub fn never() -> Self {
        Self::new(0)
    }

    /// Sets the first delay and the cap the doubling stops at.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `retry` (starting at 1).
    pub fn delay(&self, retry: u32) -> Duration {
        let doublings = retry.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for the consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Retry behaviour for failing handlers.
    pub retry: RetryPolicy,

    /// What to do with records whose declared size is wrong.
    pub size_policy: SizePolicy,

    /// Whether topics must also pass the printable, no-whitespace charset check.
    pub strict_topics: bool,

    /// Encoded records longer than this are rejected before decoding.
    pub max_record_bytes: usize,

    /// How long `run` waits for a record before re-checking for shutdown.
    pub poll_interval: Duration,
}

impl ConsumerConfig {
    /// Creates a configuration with the default settings.
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
            size_policy: SizePolicy::Reject,
            strict_topics: false,
            max_record_bytes: 1024 * 1024,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Sets how failing handlers are retried.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how records with a wrong declared size are treated.
    pub fn with_size_policy(mut self, policy: SizePolicy) -> Self {
        self.size_policy = policy;
        self
    }

    /// Enables the strict topic charset check.
    pub fn with_strict_topics(mut self, enabled: bool) -> Self {
        self.strict_topics = enabled;
        self
    }

    /// Sets the largest encoded record accepted.
    pub fn with_max_record_bytes(mut self, limit: usize) -> Self {
        self.max_record_bytes = limit;
        self
    }

    /// Sets the receive timeout used between shutdown checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to a single encoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A handler processed the record.
    Handled(RecordAddress),
    /// The record was valid but no handler is registered for its topic.
    Unrouted(RecordAddress),
    /// The record's offset was already handled, or is being handled, for its partition.
    Duplicate(RecordAddress),
}

/// Counters reported by [`Consumer::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub handled: u64,
    pub unrouted: u64,
    pub duplicates: u64,
    /// Records that failed to decode or validate.
    pub rejected: u64,
    /// Valid records whose handler kept failing.
    pub failed: u64,
}

type PartitionKey = (String, i32);

/// Handled and in-flight offsets per topic partition.
#[derive(Debug, Default)]
struct OffsetTracker {
    handled: HashMap<PartitionKey, i64>,
    in_flight: HashSet<(PartitionKey, i64)>,
}

/// Claim on one offset while its handler runs. Dropping it without
/// [`complete`](Reservation::complete) releases the offset for redelivery.
struct Reservation<'a> {
    offsets: &'a Mutex<OffsetTracker>,
    partition: PartitionKey,
    offset: i64,
}

impl Reservation<'_> {
    fn complete(self) {
        lock(self.offsets)
            .handled
            .entry(self.partition.clone())
            .and_modify(|last| *last = (*last).max(self.offset))
            .or_insert(self.offset);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        lock(self.offsets)
            .in_flight
            .remove(&(self.partition.clone(), self.offset));
    }
}

// The tracker is left consistent by every critical section, so a poisoned
// lock is still safe to use.
fn lock(offsets: &Mutex<OffsetTracker>) -> MutexGuard<'_, OffsetTracker> {
    offsets.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consumer that turns encoded records into handler calls.
///
/// Each record is decoded, checked against the record invariants and routed
/// by topic. A bad record is reported and skipped, so one corrupt entry never
/// stops the records behind it. Handler failures are retried per the
/// configured [`RetryPolicy`].
///
/// Offsets are tracked per `(topic, partition)`: a record at or below the
/// last handled offset, or one whose offset is already being handled by a
/// concurrent `process` call, is a redelivery and is not handed to the
/// handler again.
pub struct Consumer {
    handlers: HashMap<&'static str, HandlerBox>,
    config: ConsumerConfig,
    offsets: Mutex<OffsetTracker>,
    stop: ShutdownHandle,
}

impl Consumer {
    /// Creates a consumer with topic handlers.
    ///
    /// # Example
    ///
    /// ```
    /// use gafka::{topic_handlers, Consumer, ConsumerConfig, TopicMessage};
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
    ///
    /// let consumer = Consumer::new(ConsumerConfig::new(), handlers);
    /// assert_eq!(consumer.topics(), vec!["user.created"]);
    /// ```
    pub fn new(config: ConsumerConfig, handlers: HashMap<&'static str, HandlerBox>) -> Self {
        info!("Creating consumer for {} topic(s)", handlers.len());

        Self {
            handlers,
            config,
            offsets: Mutex::new(OffsetTracker::default()),
            stop: ShutdownHandle {
                requested: Arc::new(RwLock::new(false)),
            },
        }
    }

    /// Topics that have a registered handler, sorted.
    pub fn topics(&self) -> Vec<&'static str> {
        let mut topics: Vec<&'static str> = self.handlers.keys().copied().collect();
        topics.sort_unstable();
        topics
    }

    /// The highest offset handled for a topic partition, if any.
    pub fn last_handled(&self, topic: &str, partition: i32) -> Option<i64> {
        lock(&self.offsets)
            .handled
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Decodes, checks and dispatches one encoded record.
    ///
    /// Safe to call concurrently: each offset reaches its handler at most once
    /// until that handler fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is malformed, oversized, invalid or
    /// unassigned (see [`GafkaError::is_bad_record`]), or if its handler
    /// still fails after all retries.
    pub async fn process(&self, bytes: &[u8]) -> Result<Delivery> {
        let message = self.admit(bytes)?;
        let address = message.address().ok_or(InvalidRecord::Unassigned)?;

        let Some(handler) = self.handlers.get(address.topic.as_str()) else {
            warn!("No handler registered for topic '{}'", address.topic);
            return Ok(Delivery::Unrouted(address));
        };

        let Some(reservation) = self.reserve(&address) else {
            debug!("Skipping {}: already handled or in flight", address);
            return Ok(Delivery::Duplicate(address));
        };

        debug!("Received record {} ({} bytes)", address, message.size());
        self.call_with_retry(handler, &message).await?;

        reservation.complete();
        Ok(Delivery::Handled(address))
    }

    /// Runs the length limit, decoding, size policy and validation.
    fn admit(&self, bytes: &[u8]) -> Result<Message> {
        if bytes.len() > self.config.max_record_bytes {
            return Err(GafkaError::Oversized {
                len: bytes.len(),
                limit: self.config.max_record_bytes,
            });
        }

        let message = self.config.size_policy.apply(Message::decode(bytes)?)?;
        if self.config.strict_topics {
            message.validate_strict()?;
        } else {
            message.validate()?;
        }
        Ok(message)
    }

    /// Claims an offset unless it is at or below the last handled one, or
    /// already claimed. Check and claim happen under one lock.
    fn reserve(&self, address: &RecordAddress) -> Option<Reservation<'_>> {
        let partition = (address.topic.clone(), address.partition);
        let mut tracker = lock(&self.offsets);

        if tracker
            .handled
            .get(&partition)
            .is_some_and(|&last| address.offset <= last)
        {
            return None;
        }
        if !tracker.in_flight.insert((partition.clone(), address.offset)) {
            return None;
        }

        Some(Reservation {
            offsets: &self.offsets,
            partition,
            offset: address.offset,
        })
    }

    /// Consumes encoded records until the sender side closes or a shutdown
    /// is requested.
    ///
    /// Failures are logged and counted; they never end the loop.
    pub async fn run(&self, mut records: mpsc::Receiver<Vec<u8>>) -> ConsumerStats {
        info!("Starting consumer loop for topics: {:?}", self.topics());
        let mut stats = ConsumerStats::default();

        while !self.stop.is_requested().await {
            let bytes = match tokio::time::timeout(self.config.poll_interval, records.recv()).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    info!("Record stream closed");
                    break;
                }
                // Nothing arrived; look at the shutdown flag again
                Err(_) => continue,
            };

            match self.process(&bytes).await {
                Ok(Delivery::Handled(_)) => stats.handled += 1,
                Ok(Delivery::Unrouted(_)) => stats.unrouted += 1,
                Ok(Delivery::Duplicate(_)) => stats.duplicates += 1,
                Err(e) if e.is_bad_record() => {
                    warn!("Rejected record ({} bytes): {}", bytes.len(), e);
                    stats.rejected += 1;
                }
                Err(e) => {
                    error!("Giving up on record: {}", e);
                    stats.failed += 1;
                }
            }
        }

        info!("Consumer stopped: {:?}", stats);
        stats
    }

    /// Calls the handler, retrying failures the retry policy allows.
    async fn call_with_retry(&self, handler: &HandlerBox, message: &Message) -> Result<()> {
        let policy = self.config.retry;
        let mut retry = 0;

        loop {
            let err = match handler(message.clone()).await {
                Ok(()) => {
                    if retry > 0 {
                        info!("Handler succeeded on retry {}", retry);
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            // A payload that does not decode will not decode on retry either.
            if err.is_bad_record() || retry >= policy.max_retries {
                error!("Handler failed after {} call(s): {}", retry + 1, err);
                return Err(err);
            }

            retry += 1;
            let delay = policy.delay(retry);
            warn!(
                "Handler failed ({}), retry {}/{} in {:?}",
                err, retry, policy.max_retries, delay
            );
            sleep(delay).await;
        }
    }

    /// Requests a graceful shutdown of the consumer.
    pub async fn shutdown(&self) {
        self.stop.shutdown().await;
    }

    /// Returns a shutdown handle that can be used to signal shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.stop.clone()
    }
}

/// Handle for requesting consumer shutdown from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<RwLock<bool>>,
}

impl ShutdownHandle {
    /// Asks the consumer loop to stop after the record it is working on.
    pub async fn shutdown(&self) {
        info!("Consumer shutdown requested");
        *self.requested.write().await = true;
    }

    /// Whether a shutdown has been requested.
    pub async fn is_requested(&self) -> bool {
        *self.requested.read().await
    }
}
