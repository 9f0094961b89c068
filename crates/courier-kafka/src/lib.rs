//! Kafka client facade for courier services.
//!
//! [`Provider`] is the single entry point. It owns one broker connection and
//! hands out a batching [`Producer`], per-group [`Consumer`]s with
//! commit-on-success semantics, and a topic [`Admin`] surface. The underlying
//! wire protocol is librdkafka's, reached through the `rdkafka` crate; this
//! crate layers delivery callbacks, trace-id propagation, bounded buffering,
//! and idempotent admin semantics on top.

use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

use courier_core::{Categorized, Category};

pub mod admin;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod message;
pub mod metrics;
pub mod producer;
pub mod provider;

pub use admin::{Admin, TopicMetadata};
pub use config::{Acks, Compression, ConsumerConfig, KafkaConfig, OffsetReset, ProducerConfig};
pub use connection::Connection;
pub use consumer::Consumer;
pub use message::{Record, ReceivedRecord};
pub use producer::Producer;
pub use provider::Provider;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] courier_core::config::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("kafka client error")]
    Client(#[source] KafkaError),

    #[error("failed to deliver record to topic '{topic}'")]
    Delivery {
        topic: String,
        #[source]
        source: KafkaError,
    },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("admin operation '{op}' failed on topic '{topic}'")]
    Admin {
        op: &'static str,
        topic: String,
        code: RDKafkaErrorCode,
    },

    #[error("cannot shrink topic '{topic}' from {current} to {requested} partitions")]
    PartitionShrink {
        topic: String,
        current: usize,
        requested: usize,
    },

    #[error("callback failed")]
    Callback(#[source] anyhow::Error),

    #[error("provider is closed")]
    Closed,
}

impl Categorized for Error {
    fn category(&self) -> Category {
        match self {
            Error::Config(_) => Category::Config,
            Error::InvalidArgument(_) | Error::Closed => Category::InvalidArgument,
            Error::Client(source) => client_category(source),
            Error::Delivery { .. } => Category::Producer,
            Error::Timeout(_) => Category::Timeout,
            Error::Admin { .. } | Error::PartitionShrink { .. } => Category::Admin,
            Error::Callback(_) => Category::Consumer,
        }
    }
}

/// Classify a raw client error: broker reachability and deadline failures are
/// retryable, everything else terminates the operation.
pub(crate) fn client_category(err: &KafkaError) -> Category {
    let code = match err {
        KafkaError::MessageProduction(code)
        | KafkaError::MessageConsumption(code)
        | KafkaError::MetadataFetch(code)
        | KafkaError::OffsetFetch(code)
        | KafkaError::ConsumerCommit(code)
        | KafkaError::Global(code)
        | KafkaError::AdminOp(code) => *code,
        _ => return Category::Connection,
    };

    match code {
        RDKafkaErrorCode::RequestTimedOut
        | RDKafkaErrorCode::MessageTimedOut
        | RDKafkaErrorCode::OperationTimedOut => Category::Timeout,
        RDKafkaErrorCode::BrokerTransportFailure
        | RDKafkaErrorCode::AllBrokersDown
        | RDKafkaErrorCode::Resolve
        | RDKafkaErrorCode::NetworkException
        | RDKafkaErrorCode::LeaderNotAvailable
        | RDKafkaErrorCode::NotLeaderForPartition
        | RDKafkaErrorCode::QueueFull => Category::Connection,
        _ => Category::Producer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_split_into_retryable_and_terminal() {
        let timeout = Error::Client(KafkaError::Global(RDKafkaErrorCode::RequestTimedOut));
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());

        let down = Error::Client(KafkaError::Global(RDKafkaErrorCode::AllBrokersDown));
        assert!(down.is_connection());
        assert!(down.is_retryable());

        let invalid = Error::Client(KafkaError::Global(RDKafkaErrorCode::InvalidMessageSize));
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn wrapped_delivery_failures_are_producer_category() {
        let err = Error::Delivery {
            topic: "t".to_string(),
            source: KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge),
        };
        assert!(err.is_producer());
        assert!(!err.is_retryable());
        // The cause stays reachable for diagnostics.
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn closed_is_an_argument_error() {
        assert!(Error::Closed.is_invalid_argument());
    }
}
