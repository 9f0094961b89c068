//! The long-lived broker connection owned by a provider.

use rdkafka::consumer::BaseConsumer;
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::KafkaConfig;
use crate::{Error, Result};

/// Owns the seed-broker list and the base client properties every producer,
/// consumer, and admin client is derived from. Liveness is probed with a
/// metadata round-trip against any reachable broker.
pub struct Connection {
    seed_brokers: Vec<String>,
    base: ClientConfig,
    // Lazily created, reused across pings. BaseConsumer without a group is
    // the cheapest metadata-capable client librdkafka offers.
    probe: Mutex<Option<Arc<BaseConsumer>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("seed_brokers", &self.seed_brokers)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        Ok(Self {
            seed_brokers: config.brokers.clone(),
            base: config.base_client_config(),
            probe: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn seed_brokers(&self) -> &[String] {
        &self.seed_brokers
    }

    /// A fresh copy of the base client properties.
    pub(crate) fn client_config(&self) -> ClientConfig {
        self.base.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Succeeds iff at least one broker answers a metadata round-trip within
    /// `timeout`. Idempotent and safe to call concurrently.
    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let probe = self.probe()?;

        tokio::task::spawn_blocking(move || {
            use rdkafka::consumer::Consumer;
            probe
                .fetch_metadata(None, timeout)
                .map(|_| ())
                .map_err(Error::Client)
        })
        .await
        .map_err(|_| Error::Timeout(timeout))?
    }

    fn probe(&self) -> Result<Arc<BaseConsumer>> {
        let mut guard = self.probe.lock().unwrap();
        if let Some(probe) = guard.as_ref() {
            return Ok(probe.clone());
        }
        let probe: BaseConsumer = self.client_config().create().map_err(Error::Client)?;
        let probe = Arc::new(probe);
        *guard = Some(probe.clone());
        Ok(probe)
    }

    /// Safe to call more than once; every call after the first is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.probe.lock().unwrap().take();
        tracing::debug!(brokers = ?self.seed_brokers, "broker connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::config::Validate;

    fn config() -> KafkaConfig {
        let mut cfg = KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            ..KafkaConfig::default()
        };
        cfg.validate().unwrap();
        cfg
    }

    #[test]
    fn close_is_idempotent() {
        let conn = Connection::new(&config()).unwrap();
        assert!(!conn.is_closed());
        conn.close();
        conn.close();
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn ping_after_close_is_rejected() {
        let conn = Connection::new(&config()).unwrap();
        conn.close();
        let err = conn.ping(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
