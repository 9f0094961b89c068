//! Kafka client configuration.
//!
//! All structures resolve through `courier_core::config`: an environment
//! profile (or all-unset defaults), then a `kafka.{json,yaml,yml}` file, then
//! caller overrides. `Default` produces the all-unset value, so callers build
//! overrides with struct-update syntax and only the fields they touched
//! participate in the merge. `validate()` fills whatever is still unset with
//! documented defaults, repairs out-of-range scalars with a warning, and
//! errors only on fields it cannot decide for the caller (no brokers).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use courier_core::config::{overlay, Environment, Error, Merge, Validate};

/// Required acknowledgements before a produce request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// Fire-and-forget.
    None,
    /// The partition leader has written the record.
    Leader,
    /// Every in-sync replica has written the record.
    All,
}

impl Acks {
    pub(crate) fn as_client_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl Compression {
    pub(crate) fn as_client_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Snappy => "snappy",
            Compression::Lz4 => "lz4",
            Compression::Zstd => "zstd",
        }
    }
}

/// Where a consumer starts on a partition with no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
    /// No committed offset is fatal: the consume loop halts.
    None,
}

impl OffsetReset {
    // librdkafka spells the fail-fast policy "error".
    pub(crate) fn as_client_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::None => "error",
        }
    }
}

/// Declared security option matrix. Options are forwarded verbatim to the
/// client when set; courier adds no codepaths of its own on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct SecurityConfig {
    /// plaintext | ssl | sasl_plaintext | sasl_ssl
    pub protocol: String,
    pub sasl_mechanism: String,
    pub sasl_username: String,
    pub sasl_password: String,
    pub ssl_ca_location: String,
}

impl Merge for SecurityConfig {
    fn merge(&mut self, other: Self) {
        overlay::string(&mut self.protocol, other.protocol);
        overlay::string(&mut self.sasl_mechanism, other.sasl_mechanism);
        overlay::string(&mut self.sasl_username, other.sasl_username);
        overlay::string(&mut self.sasl_password, other.sasl_password);
        overlay::string(&mut self.ssl_ca_location, other.ssl_ca_location);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ProducerConfig {
    pub acks: Option<Acks>,
    /// Broker-level send retries. `Some(0)` disables them; unset means 3.
    pub retry_max: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub delivery_timeout: Duration,
    /// Target batch size in bytes.
    pub batch_size: usize,
    #[serde(with = "humantime_serde")]
    pub linger: Option<Duration>,
    pub max_in_flight_requests_per_broker: usize,
    pub enable_idempotence: Option<bool>,
    pub compression: Option<Compression>,
    pub max_buffered_records: usize,
    pub max_buffered_bytes: usize,
    pub unknown_topic_retries: Option<u32>,
}

impl ProducerConfig {
    pub const DEFAULT_RETRY_MAX: u32 = 3;
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_BATCH_SIZE: usize = 16 * 1024;
    pub const DEFAULT_LINGER: Duration = Duration::from_millis(5);
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;
    pub const DEFAULT_MAX_BUFFERED_RECORDS: usize = 10_000;
    pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 64 * 1024 * 1024;
    pub const DEFAULT_UNKNOWN_TOPIC_RETRIES: u32 = 3;

    pub fn retry_max(&self) -> u32 {
        self.retry_max.unwrap_or(Self::DEFAULT_RETRY_MAX)
    }

    pub fn linger(&self) -> Duration {
        self.linger.unwrap_or(Self::DEFAULT_LINGER)
    }

    pub fn idempotent(&self) -> bool {
        self.enable_idempotence.unwrap_or(false)
    }

    /// Whether this configuration can reorder records under retry. Logged as
    /// a warning at construction.
    pub fn reorder_hazard(&self) -> bool {
        self.max_in_flight_requests_per_broker > 1 && !self.idempotent() && self.retry_max() > 0
    }
}

impl Merge for ProducerConfig {
    fn merge(&mut self, other: Self) {
        overlay::option(&mut self.acks, other.acks);
        overlay::option(&mut self.retry_max, other.retry_max);
        overlay::duration(&mut self.request_timeout, other.request_timeout);
        overlay::duration(&mut self.delivery_timeout, other.delivery_timeout);
        overlay::scalar(&mut self.batch_size, other.batch_size);
        overlay::option(&mut self.linger, other.linger);
        overlay::scalar(
            &mut self.max_in_flight_requests_per_broker,
            other.max_in_flight_requests_per_broker,
        );
        overlay::option(&mut self.enable_idempotence, other.enable_idempotence);
        overlay::option(&mut self.compression, other.compression);
        overlay::scalar(&mut self.max_buffered_records, other.max_buffered_records);
        overlay::scalar(&mut self.max_buffered_bytes, other.max_buffered_bytes);
        overlay::option(&mut self.unknown_topic_retries, other.unknown_topic_retries);
    }
}

impl Validate for ProducerConfig {
    fn validate(&mut self) -> Result<(), Error> {
        if self.request_timeout.is_zero() {
            self.request_timeout = Self::DEFAULT_REQUEST_TIMEOUT;
        }
        if self.delivery_timeout.is_zero() {
            self.delivery_timeout = Self::DEFAULT_DELIVERY_TIMEOUT;
        }
        if self.delivery_timeout < self.request_timeout {
            tracing::warn!(
                "producer deliveryTimeout is below requestTimeout, raising to requestTimeout"
            );
            self.delivery_timeout = self.request_timeout;
        }
        if self.batch_size == 0 {
            self.batch_size = Self::DEFAULT_BATCH_SIZE;
        }
        if self.max_in_flight_requests_per_broker == 0 {
            self.max_in_flight_requests_per_broker = Self::DEFAULT_MAX_IN_FLIGHT;
        }
        if self.max_buffered_records == 0 {
            self.max_buffered_records = Self::DEFAULT_MAX_BUFFERED_RECORDS;
        }
        if self.max_buffered_bytes == 0 {
            self.max_buffered_bytes = Self::DEFAULT_MAX_BUFFERED_BYTES;
        }
        self.retry_max.get_or_insert(Self::DEFAULT_RETRY_MAX);
        self.linger.get_or_insert(Self::DEFAULT_LINGER);
        self.acks.get_or_insert(Acks::All);
        self.enable_idempotence.get_or_insert(false);
        self.compression.get_or_insert(Compression::None);
        self.unknown_topic_retries
            .get_or_insert(Self::DEFAULT_UNKNOWN_TOPIC_RETRIES);

        // Idempotence constrains acks and pipelining.
        if self.idempotent() {
            if self.acks != Some(Acks::All) {
                tracing::warn!("enableIdempotence requires acks=all, overriding acks");
                self.acks = Some(Acks::All);
            }
            if self.max_in_flight_requests_per_broker > 5 {
                tracing::warn!("enableIdempotence requires maxInFlight <= 5, clamping to 5");
                self.max_in_flight_requests_per_broker = 5;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ConsumerConfig {
    pub auto_offset_reset: Option<OffsetReset>,
    pub enable_auto_commit: Option<bool>,
    #[serde(with = "humantime_serde")]
    pub auto_commit_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub rebalance_timeout: Duration,
    pub fetch_min_bytes: u64,
    pub fetch_max_bytes: u64,
    #[serde(with = "humantime_serde")]
    pub fetch_max_wait: Duration,
    pub max_poll_records: usize,
    pub max_partition_fetch_bytes: u64,
    pub enable_auto_commit_on_close: Option<bool>,
    pub check_crcs: Option<bool>,
    pub client_id: String,
}

impl ConsumerConfig {
    pub const DEFAULT_AUTO_COMMIT_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_REBALANCE_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_FETCH_MAX_BYTES: u64 = 50 * 1024 * 1024;
    pub const DEFAULT_FETCH_MAX_WAIT: Duration = Duration::from_millis(500);
    pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;
    pub const DEFAULT_MAX_PARTITION_FETCH_BYTES: u64 = 1024 * 1024;
    pub const DEFAULT_CLIENT_ID: &'static str = "courier";

    pub fn auto_commit(&self) -> bool {
        self.enable_auto_commit.unwrap_or(true)
    }

    pub fn auto_commit_on_close(&self) -> bool {
        self.enable_auto_commit_on_close.unwrap_or(true)
    }

    pub fn offset_reset(&self) -> OffsetReset {
        self.auto_offset_reset.unwrap_or(OffsetReset::Latest)
    }
}

impl Merge for ConsumerConfig {
    fn merge(&mut self, other: Self) {
        overlay::option(&mut self.auto_offset_reset, other.auto_offset_reset);
        overlay::option(&mut self.enable_auto_commit, other.enable_auto_commit);
        overlay::duration(&mut self.auto_commit_interval, other.auto_commit_interval);
        overlay::duration(&mut self.session_timeout, other.session_timeout);
        overlay::duration(&mut self.heartbeat_interval, other.heartbeat_interval);
        overlay::duration(&mut self.rebalance_timeout, other.rebalance_timeout);
        overlay::scalar(&mut self.fetch_min_bytes, other.fetch_min_bytes);
        overlay::scalar(&mut self.fetch_max_bytes, other.fetch_max_bytes);
        overlay::duration(&mut self.fetch_max_wait, other.fetch_max_wait);
        overlay::scalar(&mut self.max_poll_records, other.max_poll_records);
        overlay::scalar(
            &mut self.max_partition_fetch_bytes,
            other.max_partition_fetch_bytes,
        );
        overlay::option(
            &mut self.enable_auto_commit_on_close,
            other.enable_auto_commit_on_close,
        );
        overlay::option(&mut self.check_crcs, other.check_crcs);
        overlay::string(&mut self.client_id, other.client_id);
    }
}

impl Validate for ConsumerConfig {
    fn validate(&mut self) -> Result<(), Error> {
        if self.client_id.is_empty() {
            self.client_id = Self::DEFAULT_CLIENT_ID.to_string();
        }
        if self.auto_commit_interval.is_zero() {
            self.auto_commit_interval = Self::DEFAULT_AUTO_COMMIT_INTERVAL;
        }
        if self.session_timeout.is_zero() {
            self.session_timeout = Self::DEFAULT_SESSION_TIMEOUT;
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_interval = self.session_timeout / 3;
        } else if self.heartbeat_interval >= self.session_timeout {
            tracing::warn!("consumer heartbeatInterval must be below sessionTimeout, repairing");
            self.heartbeat_interval = self.session_timeout / 3;
        }
        if self.rebalance_timeout.is_zero() {
            self.rebalance_timeout = Self::DEFAULT_REBALANCE_TIMEOUT.max(self.session_timeout);
        } else if self.rebalance_timeout < self.session_timeout {
            tracing::warn!("consumer rebalanceTimeout must be >= sessionTimeout, repairing");
            self.rebalance_timeout = self.session_timeout;
        }
        if self.fetch_min_bytes == 0 {
            self.fetch_min_bytes = 1;
        }
        if self.fetch_max_bytes <= self.fetch_min_bytes {
            if self.fetch_max_bytes != 0 {
                tracing::warn!("consumer fetchMaxBytes must exceed fetchMinBytes, repairing");
            }
            self.fetch_max_bytes = Self::DEFAULT_FETCH_MAX_BYTES.max(self.fetch_min_bytes + 1);
        }
        if self.fetch_max_wait.is_zero() {
            self.fetch_max_wait = Self::DEFAULT_FETCH_MAX_WAIT;
        }
        if self.max_poll_records == 0 {
            self.max_poll_records = Self::DEFAULT_MAX_POLL_RECORDS;
        }
        if self.max_partition_fetch_bytes == 0 {
            self.max_partition_fetch_bytes = Self::DEFAULT_MAX_PARTITION_FETCH_BYTES;
        }
        self.auto_offset_reset.get_or_insert(OffsetReset::Latest);
        self.enable_auto_commit.get_or_insert(true);
        self.enable_auto_commit_on_close.get_or_insert(true);
        self.check_crcs.get_or_insert(false);
        Ok(())
    }
}

/// Topic settings applied by admin create operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct TopicDetail {
    pub num_partitions: i32,
    pub replication_factor: i32,
    pub config: HashMap<String, String>,
}

impl Default for TopicDetail {
    fn default() -> Self {
        Self {
            num_partitions: 1,
            replication_factor: 1,
            config: HashMap::new(),
        }
    }
}

/// Top-level configuration of one Kafka provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    pub security: SecurityConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
    /// Escape hatch: forwarded verbatim to the client, applied last.
    pub extra: HashMap<String, String>,
}

impl KafkaConfig {
    pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Environment profile defaults, used as the base resolution layer.
    pub fn for_env(env: Environment) -> Self {
        let mut cfg = Self::default();
        match env {
            Environment::Development => {
                cfg.brokers = vec!["localhost:9092".to_string()];
                cfg.dial_timeout = Duration::from_secs(3);
                cfg.producer.acks = Some(Acks::Leader);
                cfg.producer.linger = Some(Duration::ZERO);
                cfg.consumer.auto_offset_reset = Some(OffsetReset::Earliest);
                cfg.consumer.session_timeout = Duration::from_secs(6);
            }
            Environment::Production => {
                cfg.producer.acks = Some(Acks::All);
                cfg.producer.enable_idempotence = Some(true);
                cfg.producer.compression = Some(Compression::Lz4);
                cfg.producer.delivery_timeout = Duration::from_secs(300);
            }
        }
        cfg
    }

    /// Base client properties shared by producers, consumers, and admin.
    pub(crate) fn base_client_config(&self) -> rdkafka::ClientConfig {
        let mut client = rdkafka::ClientConfig::new();
        client
            .set("bootstrap.servers", self.brokers.join(","))
            .set("client.id", &self.client_id)
            .set(
                "socket.connection.setup.timeout.ms",
                self.dial_timeout.as_millis().to_string(),
            );

        if !self.security.protocol.is_empty() {
            client.set("security.protocol", &self.security.protocol);
        }
        if !self.security.sasl_mechanism.is_empty() {
            client.set("sasl.mechanism", &self.security.sasl_mechanism);
        }
        if !self.security.sasl_username.is_empty() {
            client.set("sasl.username", &self.security.sasl_username);
        }
        if !self.security.sasl_password.is_empty() {
            client.set("sasl.password", &self.security.sasl_password);
        }
        if !self.security.ssl_ca_location.is_empty() {
            client.set("ssl.ca.location", &self.security.ssl_ca_location);
        }

        for (key, value) in &self.extra {
            client.set(key, value);
        }
        client
    }

    /// Client properties of a producer built from this configuration.
    pub(crate) fn producer_client_config(&self) -> rdkafka::ClientConfig {
        let p = &self.producer;
        let mut client = self.base_client_config();
        client
            .set("acks", p.acks.unwrap_or(Acks::All).as_client_str())
            .set("retries", p.retry_max().to_string())
            .set("retry.backoff.ms", "100")
            .set("request.timeout.ms", p.request_timeout.as_millis().to_string())
            .set("message.timeout.ms", p.delivery_timeout.as_millis().to_string())
            .set("batch.size", p.batch_size.to_string())
            .set("linger.ms", p.linger().as_millis().to_string())
            .set(
                "max.in.flight.requests.per.connection",
                p.max_in_flight_requests_per_broker.to_string(),
            )
            .set("enable.idempotence", p.idempotent().to_string())
            .set(
                "compression.type",
                p.compression.unwrap_or(Compression::None).as_client_str(),
            )
            .set(
                "queue.buffering.max.messages",
                p.max_buffered_records.to_string(),
            )
            .set(
                "queue.buffering.max.kbytes",
                (p.max_buffered_bytes / 1024).max(1).to_string(),
            );
        client
    }

    /// Client properties of a consumer in `group_id` built from this
    /// configuration. Offsets are always stored explicitly by the dispatch
    /// loop, never implicitly on fetch.
    pub(crate) fn consumer_client_config(&self, group_id: &str) -> rdkafka::ClientConfig {
        let c = &self.consumer;
        let mut client = self.base_client_config();
        client
            .set("group.id", group_id)
            .set("client.id", &c.client_id)
            .set("auto.offset.reset", c.offset_reset().as_client_str())
            .set("enable.auto.commit", c.auto_commit().to_string())
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.commit.interval.ms",
                c.auto_commit_interval.as_millis().to_string(),
            )
            .set("session.timeout.ms", c.session_timeout.as_millis().to_string())
            .set(
                "heartbeat.interval.ms",
                c.heartbeat_interval.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                c.rebalance_timeout.as_millis().to_string(),
            )
            .set("fetch.min.bytes", c.fetch_min_bytes.to_string())
            .set("fetch.max.bytes", c.fetch_max_bytes.to_string())
            .set("fetch.wait.max.ms", c.fetch_max_wait.as_millis().to_string())
            .set(
                "max.partition.fetch.bytes",
                c.max_partition_fetch_bytes.to_string(),
            )
            .set("check.crcs", c.check_crcs.unwrap_or(false).to_string());
        client
    }
}

impl Merge for KafkaConfig {
    fn merge(&mut self, other: Self) {
        overlay::vec(&mut self.brokers, other.brokers);
        overlay::string(&mut self.client_id, other.client_id);
        overlay::duration(&mut self.dial_timeout, other.dial_timeout);
        self.security.merge(other.security);
        self.producer.merge(other.producer);
        self.consumer.merge(other.consumer);
        overlay::map(&mut self.extra, other.extra);
    }
}

impl Validate for KafkaConfig {
    fn validate(&mut self) -> Result<(), Error> {
        if self.brokers.is_empty() || self.brokers.iter().all(|b| b.is_empty()) {
            return Err(Error::Invalid("brokers must not be empty".into()));
        }
        if self.client_id.is_empty() {
            self.client_id = ConsumerConfig::DEFAULT_CLIENT_ID.to_string();
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = Self::DEFAULT_DIAL_TIMEOUT;
        }
        self.producer.validate()?;
        self.consumer.validate()?;
        Ok(())
    }
}
