//! Asynchronous batching producer.
//!
//! `send()` stamps headers, accounts the record against the bounded buffer,
//! and hands it to a background drain task. The drain task enqueues records
//! into librdkafka in submit order (preserving per-key ordering at the
//! facade) and drives every delivery future to completion, firing the
//! caller's callback exactly once. The bounded buffer is the single intended
//! back-pressure point: a full buffer blocks `send()` until space frees.

use futures::stream::{FuturesUnordered, StreamExt};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::types::RDKafkaErrorCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::config::{KafkaConfig, ProducerConfig};
use crate::message::Record;
use crate::metrics;
use crate::{Error, Result};

/// Retry backoff schedule: quadratic growth capped at five seconds.
/// Strictly non-decreasing; replace only with another non-decreasing,
/// bounded schedule.
pub(crate) fn backoff(tries: u32) -> Duration {
    Duration::from_millis((u64::from(tries).pow(2) * 100).min(5_000))
}

/// Point-in-time snapshot of producer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ProducerMetrics {
    pub total_messages: u64,
    pub total_bytes: u64,
    pub success_messages: u64,
    pub failed_messages: u64,
}

struct Submission {
    record: Record,
    // Held until delivery completes, releasing buffered-bytes budget.
    permit: OwnedSemaphorePermit,
    deadline: Instant,
    callback: Box<dyn FnOnce(Result<()>) + Send + 'static>,
}

/// Tracks records between submit and completion, so `flush` can wait for an
/// empty pipeline.
#[derive(Debug)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct Producer {
    inner: FutureProducer,
    tx: Mutex<Option<mpsc::Sender<Submission>>>,
    bytes: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
    counters: Arc<Mutex<ProducerMetrics>>,
    drain: Mutex<Option<tokio::task::JoinHandle<()>>>,
    config: ProducerConfig,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Producer {
    pub(crate) fn new(config: &KafkaConfig) -> Result<Self> {
        let producer_config = config.producer.clone();
        if producer_config.reorder_hazard() {
            tracing::warn!(
                max_in_flight = producer_config.max_in_flight_requests_per_broker,
                retry_max = producer_config.retry_max(),
                "records may be reordered under retry; set maxInFlightRequestsPerBroker=1 \
                 or enable idempotence to preserve per-key ordering"
            );
        }

        let inner: FutureProducer = config
            .producer_client_config()
            .create()
            .map_err(Error::Client)?;

        let (tx, rx) = mpsc::channel(producer_config.max_buffered_records);
        let bytes = Arc::new(Semaphore::new(
            producer_config.max_buffered_bytes.min(Semaphore::MAX_PERMITS),
        ));
        let in_flight = Arc::new(InFlight {
            count: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let counters = Arc::new(Mutex::new(ProducerMetrics::default()));

        let drain = tokio::spawn(drain_loop(
            rx,
            inner.clone(),
            producer_config.clone(),
            counters.clone(),
            in_flight.clone(),
        ));

        Ok(Self {
            inner,
            tx: Mutex::new(Some(tx)),
            bytes,
            in_flight,
            counters,
            drain: Mutex::new(Some(drain)),
            config: producer_config,
        })
    }

    /// Enqueue `record` for delivery. Returns as soon as the record is
    /// buffered; `on_delivery` fires exactly once when the record is
    /// acknowledged or fails terminally. Blocks only when the buffer is full.
    pub async fn send<F>(&self, record: Record, on_delivery: F) -> Result<()>
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        if record.topic.is_empty() {
            return Err(Error::InvalidArgument("record topic must not be empty".into()));
        }
        let tx = match &*self.tx.lock().unwrap() {
            Some(tx) => tx.clone(),
            None => return Err(Error::Closed),
        };

        let mut record = record;
        record.stamp_headers(chrono::Utc::now());
        let size = record.wire_size();

        {
            let mut counters = self.counters.lock().unwrap();
            counters.total_messages += 1;
            counters.total_bytes += size as u64;
        }
        metrics::PRODUCER_SUBMITTED.inc();

        let permits = size.min(self.config.max_buffered_bytes).min(u32::MAX as usize) as u32;
        let permit = self
            .bytes
            .clone()
            .acquire_many_owned(permits)
            .await
            .map_err(|_| Error::Closed)?;

        self.in_flight.enter();
        let submission = Submission {
            record,
            permit,
            deadline: Instant::now() + self.config.delivery_timeout,
            callback: Box::new(on_delivery),
        };
        if let Err(rejected) = tx.send(submission).await {
            // The drain task is gone; fail the record rather than lose it
            // silently.
            self.in_flight.exit();
            (rejected.0.callback)(Err(Error::Closed));
            self.note_failure();
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Enqueue `record` and block until it is acknowledged per the configured
    /// acks, or fails terminally.
    pub async fn send_sync(&self, record: Record) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(record, move |result| {
            let _ = done_tx.send(result);
        })
        .await?;
        done_rx.await.map_err(|_| Error::Closed)?
    }

    /// Block until every buffered record has completed, or `timeout` elapses.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        tokio::time::timeout(timeout, self.in_flight.wait_idle())
            .await
            .map_err(|_| Error::Timeout(timeout))?;

        let remaining = timeout.saturating_sub(started.elapsed());
        let producer = self.inner.clone();
        tokio::task::spawn_blocking(move || producer.flush(remaining).map_err(Error::Client))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    /// Metadata round-trip against any broker.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let producer = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|_| ())
                .map_err(Error::Client)
        })
        .await
        .map_err(|_| Error::Timeout(timeout))?
    }

    pub fn metrics(&self) -> ProducerMetrics {
        *self.counters.lock().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap().is_none()
    }

    /// Stop accepting records, drain what is buffered, and release the
    /// client. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let tx = self.tx.lock().unwrap().take();
        if tx.is_none() {
            return Ok(());
        }
        drop(tx); // The drain loop exits once the queue empties.
        self.bytes.close(); // Unblocks senders waiting on buffer space.

        let drain = self.drain.lock().unwrap().take();
        if let Some(drain) = drain {
            let _ = drain.await;
        }

        self.flush(self.config.delivery_timeout).await
    }

    fn note_failure(&self) {
        self.counters.lock().unwrap().failed_messages += 1;
        metrics::PRODUCER_FAILED.inc();
    }
}

async fn drain_loop(
    mut rx: mpsc::Receiver<Submission>,
    producer: FutureProducer,
    config: ProducerConfig,
    counters: Arc<Mutex<ProducerMetrics>>,
    in_flight: Arc<InFlight>,
) {
    let mut completions = FuturesUnordered::new();

    loop {
        tokio::select! {
            Some(()) = completions.next(), if !completions.is_empty() => {}
            submission = rx.recv() => match submission {
                Some(submission) => {
                    // Records enter librdkafka's queue here, in submit order.
                    completions.push(complete(
                        &producer,
                        &config,
                        counters.clone(),
                        in_flight.clone(),
                        submission,
                    ));
                }
                None => break,
            },
        }
    }

    // Sender side is gone; run down whatever is still in flight.
    while completions.next().await.is_some() {}
}

async fn complete(
    producer: &FutureProducer,
    config: &ProducerConfig,
    counters: Arc<Mutex<ProducerMetrics>>,
    in_flight: Arc<InFlight>,
    submission: Submission,
) {
    let Submission {
        record,
        permit,
        deadline,
        callback,
    } = submission;

    let result = produce_record(producer, config, &record, deadline).await;
    match &result {
        Ok(()) => {
            counters.lock().unwrap().success_messages += 1;
            metrics::PRODUCER_DELIVERED.inc();
        }
        Err(error) => {
            counters.lock().unwrap().failed_messages += 1;
            metrics::PRODUCER_FAILED.inc();
            tracing::warn!(topic = %record.topic, %error, "record failed terminally");
        }
    }
    callback(result);
    drop(permit);
    in_flight.exit();
}

/// Enqueue one record and await its delivery, retrying transient failures on
/// the facade's backoff schedule until `deadline`. Broker-level retries are
/// librdkafka's per the configured retry policy; this loop re-enqueues only
/// for failures librdkafka has already given up on.
async fn produce_record(
    producer: &FutureProducer,
    config: &ProducerConfig,
    record: &Record,
    deadline: Instant,
) -> Result<()> {
    let headers = record.owned_headers();
    let mut tries: u32 = 0;
    let mut unknown_topic_tries: u32 = 0;

    loop {
        let mut future_record = FutureRecord::<Vec<u8>, Vec<u8>>::to(&record.topic)
            .payload(&record.value)
            .headers(headers.clone());
        if !record.key.is_empty() {
            future_record = future_record.key(&record.key);
        }

        let error = match producer.send_result(future_record) {
            Ok(delivery) => match delivery.await {
                Ok(Ok(_delivery)) => return Ok(()),
                Ok(Err((error, _message))) => error,
                // The producer was dropped before delivery resolved.
                Err(_canceled) => KafkaError::Canceled,
            },
            // Local enqueue failure; the record comes back untouched.
            Err((error, _rejected)) => error,
        };

        let retryable = match &error {
            KafkaError::MessageProduction(RDKafkaErrorCode::UnknownTopicOrPartition) => {
                // Newly created topics surface this until metadata propagates.
                unknown_topic_tries += 1;
                unknown_topic_tries <= config.unknown_topic_retries.unwrap_or(0)
            }
            other => crate::client_category(other).is_retryable(),
        };

        tries += 1;
        let delay = backoff(tries);
        if !retryable || Instant::now() + delay >= deadline {
            return Err(Error::Delivery {
                topic: record.topic.clone(),
                source: error,
            });
        }

        tracing::debug!(
            topic = %record.topic,
            tries,
            ?delay,
            %error,
            "transient produce failure, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::config::Validate;
    use courier_core::Categorized;

    fn config(delivery_timeout: Duration) -> KafkaConfig {
        let mut cfg = KafkaConfig {
            brokers: vec!["localhost:9".to_string()], // nothing listens here
            ..KafkaConfig::default()
        };
        cfg.producer.request_timeout = Duration::from_millis(50);
        cfg.producer.delivery_timeout = delivery_timeout;
        cfg.producer.retry_max = Some(0);
        cfg.validate().unwrap();
        cfg
    }

    #[test]
    fn backoff_is_quadratic_and_capped() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(400));
        assert_eq!(backoff(5), Duration::from_millis(2_500));
        assert_eq!(backoff(8), Duration::from_secs(5));
        assert_eq!(backoff(100), Duration::from_secs(5));

        // Strictly non-decreasing.
        for tries in 1..32 {
            assert!(backoff(tries + 1) >= backoff(tries));
        }
    }

    #[tokio::test]
    async fn empty_topic_is_rejected() {
        let producer = Producer::new(&config(Duration::from_millis(200))).unwrap();
        let err = producer
            .send(Record::new("", "v"), |_| {})
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(producer.metrics(), ProducerMetrics::default());
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let producer = Producer::new(&config(Duration::from_millis(200))).unwrap();
        producer.close().await.unwrap();
        assert!(producer.is_closed());

        let err = producer
            .send(Record::new("t", "v"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn close_twice_is_a_no_op() {
        let producer = Producer::new(&config(Duration::from_millis(200))).unwrap();
        producer.close().await.unwrap();
        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_broker_fails_the_callback_within_the_delivery_timeout() {
        let producer = Producer::new(&config(Duration::from_millis(300))).unwrap();
        let (tx, rx) = oneshot::channel();
        producer
            .send(Record::new("t", "v1").with_key("k"), move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .expect("callback must fire")
            .expect("callback result");
        let err = result.unwrap_err();
        assert!(err.is_producer(), "terminal failure surfaces as a producer error");

        let metrics = producer.metrics();
        assert_eq!(metrics.total_messages, 1);
        assert_eq!(metrics.failed_messages, 1);
        assert_eq!(metrics.success_messages, 0);
    }

    #[tokio::test]
    async fn send_sync_surfaces_the_terminal_error() {
        let producer = Producer::new(&config(Duration::from_millis(300))).unwrap();
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            producer.send_sync(Record::new("t", "v1")),
        )
        .await
        .expect("send_sync must resolve")
        .unwrap_err();
        assert!(err.is_producer());
    }
}
