//! Consumer-group worker with commit-on-success semantics.
//!
//! `subscribe()` drives a recv → dispatch → mark → commit loop for the life
//! of the subscription. A callback returning `Ok` marks its offset as
//! committable; a callback returning `Err` leaves the offset unmarked and
//! rewinds the partition so the record is fetched again. Offsets are never
//! stored implicitly, which keeps committed offsets at the highest
//! contiguous successfully-processed position.

use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer as _, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use courier_core::trace;

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::message::ReceivedRecord;
use crate::metrics;
use crate::{Error, Result};

/// How long the loop sleeps after a recoverable fetch error before it
/// continues.
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer lifecycle. Transitions are one-way; re-subscription is not
/// supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Subscribed,
    Running,
    Draining,
    Closed,
}

/// Point-in-time snapshot of consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsumerMetrics {
    pub total_messages: u64,
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub total_bytes: u64,
}

/// Logs group membership changes and commit outcomes.
pub(crate) struct RebalanceLogger {
    group_id: String,
}

impl ClientContext for RebalanceLogger {}

impl ConsumerContext for RebalanceLogger {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                tracing::info!(
                    group = %self.group_id,
                    count = partitions.count(),
                    "partitions assigned"
                );
            }
            Rebalance::Revoke(partitions) => {
                tracing::info!(
                    group = %self.group_id,
                    count = partitions.count(),
                    "partitions revoked"
                );
            }
            Rebalance::Error(error) => {
                tracing::warn!(group = %self.group_id, %error, "rebalance error");
            }
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        tracing::debug!(group = %self.group_id, ?rebalance, "rebalance complete");
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) => tracing::trace!(group = %self.group_id, "offsets committed"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(error) => {
                tracing::warn!(group = %self.group_id, %error, "offset commit failed");
            }
        }
    }
}

pub struct Consumer {
    inner: Arc<StreamConsumer<RebalanceLogger>>,
    group_id: String,
    config: ConsumerConfig,
    state: Mutex<State>,
    state_changed: Notify,
    cancel: CancellationToken,
    counters: Arc<Mutex<ConsumerMetrics>>,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("group_id", &self.group_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Consumer {
    pub(crate) fn new(config: &KafkaConfig, group_id: &str) -> Result<Self> {
        if group_id.is_empty() {
            return Err(Error::InvalidArgument("group id must not be empty".into()));
        }
        let inner: StreamConsumer<RebalanceLogger> = config
            .consumer_client_config(group_id)
            .create_with_context(RebalanceLogger {
                group_id: group_id.to_string(),
            })
            .map_err(Error::Client)?;

        Ok(Self {
            inner: Arc::new(inner),
            group_id: group_id.to_string(),
            config: config.consumer.clone(),
            state: Mutex::new(State::Created),
            state_changed: Notify::new(),
            cancel: CancellationToken::new(),
            counters: Arc::new(Mutex::new(ConsumerMetrics::default())),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    pub fn metrics(&self) -> ConsumerMetrics {
        *self.counters.lock().unwrap()
    }

    /// Consume `topics` under this consumer's group, invoking `handler` for
    /// every fetched record. Returns when the consumer is closed; recoverable
    /// fetch errors are logged and the loop continues after a bounded sleep.
    ///
    /// The handler runs serially. Its record argument carries the producer's
    /// trace-id, which is re-bound as the ambient id around the invocation.
    pub async fn subscribe<F, Fut>(&self, topics: &[&str], handler: F) -> Result<()>
    where
        F: Fn(ReceivedRecord) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        if topics.is_empty() {
            return Err(Error::InvalidArgument("topics must not be empty".into()));
        }
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Created {
                return Err(Error::InvalidArgument(format!(
                    "consumer in group '{}' may only subscribe once",
                    self.group_id
                )));
            }
            *state = State::Subscribed;
        }

        self.inner.subscribe(topics).map_err(Error::Client)?;
        self.set_state(State::Running);
        tracing::info!(group = %self.group_id, ?topics, "consume loop started");

        let manual_commit = !self.config.auto_commit();
        let mut commit_ticker = tokio::time::interval(self.config.auto_commit_interval);
        commit_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut marked_since_commit: usize = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                _ = commit_ticker.tick(), if manual_commit => {
                    if marked_since_commit > 0 {
                        self.commit(CommitMode::Async);
                        marked_since_commit = 0;
                    }
                }

                fetched = self.inner.recv() => match fetched {
                    Err(error) => {
                        if is_fatal_fetch(&error) {
                            // auto.offset.reset=none with no committed offset
                            // lands here: surface and halt.
                            tracing::error!(
                                group = %self.group_id,
                                %error,
                                "fatal fetch error, halting consume loop"
                            );
                            break;
                        }
                        tracing::warn!(group = %self.group_id, %error, "transient fetch error");
                        tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                    }
                    Ok(message) => {
                        let record = ReceivedRecord::from_borrowed(&message);
                        drop(message);
                        if self.dispatch(record, &handler).await {
                            marked_since_commit += 1;
                            // Bound how much marked progress can sit
                            // uncommitted between ticks.
                            if manual_commit && marked_since_commit >= self.config.max_poll_records {
                                self.commit(CommitMode::Async);
                                marked_since_commit = 0;
                            }
                        }
                    }
                },
            }
        }

        self.set_state(State::Draining);
        if self.config.auto_commit_on_close() {
            self.commit(CommitMode::Sync);
        }
        self.inner.unsubscribe();
        self.set_state(State::Closed);
        tracing::info!(group = %self.group_id, "consume loop stopped");
        Ok(())
    }

    /// Returns whether the record's offset was marked committable.
    async fn dispatch<F, Fut>(&self, record: ReceivedRecord, handler: &F) -> bool
    where
        F: Fn(ReceivedRecord) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let (topic, partition, offset) = (record.topic.clone(), record.partition, record.offset);
        {
            let mut counters = self.counters.lock().unwrap();
            counters.total_messages += 1;
            counters.total_bytes += record.wire_size() as u64;
        }
        metrics::CONSUMER_RECEIVED.inc();

        let outcome = match record.trace_id() {
            // Bind before the handler is even invoked, so code running ahead
            // of its first await point sees the ambient id too.
            Some(id) => trace::with_trace_id(id, async { handler(record).await }).await,
            None => handler(record).await,
        };

        match outcome {
            Ok(()) => {
                if let Err(error) = self.inner.store_offset(&topic, partition, offset) {
                    tracing::warn!(
                        group = %self.group_id,
                        %topic, partition, offset, %error,
                        "failed to mark offset committable"
                    );
                    return false;
                }
                self.counters.lock().unwrap().processed_messages += 1;
                metrics::CONSUMER_PROCESSED.inc();
                true
            }
            Err(error) => {
                self.counters.lock().unwrap().failed_messages += 1;
                metrics::CONSUMER_FAILED.inc();
                tracing::warn!(
                    group = %self.group_id,
                    %topic, partition, offset,
                    error = %Error::Callback(error),
                    "callback failed, record will be redelivered"
                );
                // Rewind so the next fetch re-delivers the failed record.
                if let Err(error) =
                    self.inner
                        .seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
                {
                    tracing::warn!(
                        group = %self.group_id,
                        %topic, partition, offset, %error,
                        "failed to rewind after callback failure"
                    );
                }
                false
            }
        }
    }

    fn commit(&self, mode: CommitMode) {
        match self.inner.commit_consumer_state(mode) {
            Ok(()) => {}
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(error) => {
                tracing::warn!(group = %self.group_id, %error, "offset commit failed");
            }
        }
    }

    /// Metadata round-trip against any broker.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        let consumer = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, timeout)
                .map(|_| ())
                .map_err(Error::Client)
        })
        .await
        .map_err(|_| Error::Timeout(timeout))?
    }

    /// Cancel the dispatch loop, wait for it to drain, and release the
    /// client. Safe to call more than once.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                State::Closed => return,
                // Never subscribed: nothing to drain.
                State::Created => {
                    *state = State::Closed;
                    return;
                }
                _ => {}
            }
        }
        self.cancel.cancel();
        loop {
            let notified = self.state_changed.notified();
            if self.state() == State::Closed {
                return;
            }
            notified.await;
        }
    }

    fn set_state(&self, next: State) {
        *self.state.lock().unwrap() = next;
        self.state_changed.notify_waiters();
    }
}

fn is_fatal_fetch(error: &KafkaError) -> bool {
    matches!(
        error,
        KafkaError::MessageConsumption(RDKafkaErrorCode::AutoOffsetReset)
            | KafkaError::MessageConsumption(RDKafkaErrorCode::Fatal)
    )
}
