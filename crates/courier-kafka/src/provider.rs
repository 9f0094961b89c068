//! The provider facade: one broker connection, one shared producer, a
//! consumer per group-id, and the admin surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::config::{self, Environment, Resolved};

use crate::admin::Admin;
use crate::config::KafkaConfig;
use crate::connection::Connection;
use crate::consumer::Consumer;
use crate::producer::Producer;
use crate::{Error, Result};

#[derive(Debug)]
pub struct Provider {
    config: KafkaConfig,
    connection: Arc<Connection>,
    producer: Arc<Producer>,
    admin: Arc<Admin>,
    // Exactly one consumer per group-id for the provider's lifetime.
    consumers: Mutex<HashMap<String, Arc<Consumer>>>,
    closed: AtomicBool,
}

impl Provider {
    /// Resolve configuration from defaults, a `kafka.{json,yaml,yml}` file,
    /// and `user` overrides, then build the provider.
    pub fn new(user: Option<KafkaConfig>, file: Option<&Path>) -> Result<Self> {
        Self::from_resolved(config::resolve("kafka", user, file)?)
    }

    /// Like [`Provider::new`], starting from an environment profile.
    pub fn for_env(
        env: Environment,
        user: Option<KafkaConfig>,
        file: Option<&Path>,
    ) -> Result<Self> {
        Self::from_resolved(config::resolve_from(
            KafkaConfig::for_env(env),
            "kafka",
            user,
            file,
        )?)
    }

    pub fn from_resolved(resolved: Resolved<KafkaConfig>) -> Result<Self> {
        tracing::info!(
            source = ?resolved.source(),
            brokers = ?resolved.brokers,
            "building kafka provider"
        );
        let config = resolved.into_inner();

        let connection = Arc::new(Connection::new(&config)?);
        let producer = Arc::new(Producer::new(&config)?);
        let admin = Arc::new(Admin::new(&config)?);

        Ok(Self {
            config,
            connection,
            producer,
            admin,
            consumers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    pub fn producer(&self) -> Result<Arc<Producer>> {
        self.ensure_open()?;
        Ok(self.producer.clone())
    }

    pub fn admin(&self) -> Result<Arc<Admin>> {
        self.ensure_open()?;
        Ok(self.admin.clone())
    }

    /// The consumer for `group_id`, creating it on first request. Subsequent
    /// requests for the same group return the same instance.
    pub fn consumer(&self, group_id: &str) -> Result<Arc<Consumer>> {
        self.ensure_open()?;
        if group_id.is_empty() {
            return Err(Error::InvalidArgument("group id must not be empty".into()));
        }

        let mut consumers = self.consumers.lock().unwrap();
        if let Some(consumer) = consumers.get(group_id) {
            return Ok(consumer.clone());
        }
        let consumer = Arc::new(Consumer::new(&self.config, group_id)?);
        consumers.insert(group_id.to_string(), consumer.clone());
        Ok(consumer)
    }

    pub async fn ping(&self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        self.connection.ping(timeout).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shut down everything this provider owns: consumers first, then the
    /// producer, then the broker connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let consumers: Vec<Arc<Consumer>> =
            self.consumers.lock().unwrap().values().cloned().collect();
        for consumer in consumers {
            consumer.close().await;
        }

        let result = self.producer.close().await;
        self.connection.close();
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Provider {
        let user = KafkaConfig {
            brokers: vec!["localhost:9".to_string()], // nothing listens here
            ..KafkaConfig::default()
        };
        Provider::new(Some(user), None).unwrap()
    }

    #[tokio::test]
    async fn consumers_are_cached_by_group_id() {
        let provider = provider();
        let a = provider.consumer("group-a").unwrap();
        let b = provider.consumer("group-a").unwrap();
        let c = provider.consumer("group-b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn empty_group_id_is_rejected() {
        let provider = provider();
        let err = provider.consumer("").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn close_propagates_and_later_calls_fail() {
        let provider = provider();
        let _ = provider.consumer("group-a").unwrap();

        provider.close().await.unwrap();
        assert!(provider.is_closed());

        assert!(matches!(provider.producer().unwrap_err(), Error::Closed));
        assert!(matches!(provider.admin().unwrap_err(), Error::Closed));
        assert!(matches!(provider.consumer("g").unwrap_err(), Error::Closed));
        assert!(matches!(
            provider.ping(Duration::from_millis(10)).await.unwrap_err(),
            Error::Closed
        ));

        // Idempotent.
        provider.close().await.unwrap();
    }

    #[test]
    fn missing_brokers_fail_resolution() {
        let err = Provider::new(None, Some(Path::new("/does/not/exist.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
