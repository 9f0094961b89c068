//! Topic administration with idempotent semantics: creating an existing
//! topic and deleting a missing one both succeed.

use rdkafka::admin::{AdminClient, AdminOptions, NewPartitions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer as _};
use rdkafka::types::RDKafkaErrorCode;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{KafkaConfig, TopicDetail};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PartitionInfo {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

pub struct Admin {
    inner: AdminClient<DefaultClientContext>,
    // Metadata reads go through a plain consumer client; the admin client
    // only speaks mutation RPCs.
    metadata: Arc<BaseConsumer>,
    request_timeout: Duration,
}

impl std::fmt::Debug for Admin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admin")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Admin {
    pub(crate) fn new(config: &KafkaConfig) -> Result<Self> {
        let inner = config.base_client_config().create().map_err(Error::Client)?;
        let metadata: BaseConsumer = config.base_client_config().create().map_err(Error::Client)?;
        Ok(Self {
            inner,
            metadata: Arc::new(metadata),
            request_timeout: config.producer.request_timeout,
        })
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new()
            .request_timeout(Some(self.request_timeout))
            .operation_timeout(Some(self.request_timeout))
    }

    /// Create one topic. "Already exists" is success.
    pub async fn create_topic(&self, name: &str, detail: &TopicDetail) -> Result<()> {
        self.create_topics(&[name], detail).await
    }

    /// Create a batch of topics, all with the same partition count,
    /// replication factor, and config. Callers needing heterogeneous
    /// settings issue separate calls.
    pub async fn create_topics(&self, names: &[&str], detail: &TopicDetail) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        if names.iter().any(|name| name.is_empty()) {
            return Err(Error::InvalidArgument("topic name must not be empty".into()));
        }

        let config_pairs: Vec<(&str, &str)> = detail
            .config
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        let topics: Vec<NewTopic<'_>> = names
            .iter()
            .map(|name| {
                let mut topic = NewTopic::new(
                    name,
                    detail.num_partitions.max(1),
                    TopicReplication::Fixed(detail.replication_factor.max(1)),
                );
                for &(key, value) in &config_pairs {
                    topic = topic.set(key, value);
                }
                topic
            })
            .collect();

        let results = self
            .inner
            .create_topics(topics.iter(), &self.options())
            .await
            .map_err(Error::Client)?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(%topic, "topic created"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::info!(%topic, "topic already exists");
                }
                Err((topic, code)) => {
                    return Err(Error::Admin {
                        op: "create_topic",
                        topic,
                        code,
                    })
                }
            }
        }
        Ok(())
    }

    /// Delete one topic. A missing topic is success.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        let results = self
            .inner
            .delete_topics(&[name], &self.options())
            .await
            .map_err(Error::Client)?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(%topic, "topic deleted"),
                Err((topic, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    tracing::info!(%topic, "topic does not exist");
                }
                Err((topic, code)) => {
                    return Err(Error::Admin {
                        op: "delete_topic",
                        topic,
                        code,
                    })
                }
            }
        }
        Ok(())
    }

    pub async fn list_topics(&self) -> Result<Vec<String>> {
        let metadata = self.fetch_metadata(None).await?;
        Ok(metadata)
    }

    pub async fn topic_metadata(&self, name: &str) -> Result<TopicMetadata> {
        let client = self.metadata.clone();
        let timeout = self.request_timeout;
        let name_owned = name.to_string();

        tokio::task::spawn_blocking(move || {
            let metadata = client
                .fetch_metadata(Some(&name_owned), timeout)
                .map_err(Error::Client)?;

            let topic = metadata
                .topics()
                .iter()
                .find(|topic| topic.name() == name_owned)
                .ok_or_else(|| Error::Admin {
                    op: "topic_metadata",
                    topic: name_owned.clone(),
                    code: RDKafkaErrorCode::UnknownTopicOrPartition,
                })?;

            if let Some(error) = topic.error() {
                let code: RDKafkaErrorCode = error.into();
                return Err(Error::Admin {
                    op: "topic_metadata",
                    topic: name_owned.clone(),
                    code,
                });
            }

            Ok(TopicMetadata {
                name: name_owned.clone(),
                partitions: topic
                    .partitions()
                    .iter()
                    .map(|partition| PartitionInfo {
                        id: partition.id(),
                        leader: partition.leader(),
                        replicas: partition.replicas().to_vec(),
                        isr: partition.isr().to_vec(),
                    })
                    .collect(),
            })
        })
        .await
        .map_err(|_| Error::Timeout(timeout))?
    }

    /// Grow `topic` to `new_total` partitions. The new total must be at
    /// least the current count; an equal total is an idempotent no-op.
    pub async fn create_partitions(&self, topic: &str, new_total: usize) -> Result<()> {
        let current = self.topic_metadata(topic).await?.partitions.len();
        if new_total < current {
            return Err(Error::PartitionShrink {
                topic: topic.to_string(),
                current,
                requested: new_total,
            });
        }
        if new_total == current {
            return Ok(());
        }

        let assignment = NewPartitions::new(topic, new_total);
        let results = self
            .inner
            .create_partitions([&assignment], &self.options())
            .await
            .map_err(Error::Client)?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(%topic, new_total, "partitions grown"),
                Err((topic, code)) => {
                    return Err(Error::Admin {
                        op: "create_partitions",
                        topic,
                        code,
                    })
                }
            }
        }
        Ok(())
    }

    async fn fetch_metadata(&self, topic: Option<String>) -> Result<Vec<String>> {
        let client = self.metadata.clone();
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || {
            let metadata = client
                .fetch_metadata(topic.as_deref(), timeout)
                .map_err(Error::Client)?;
            Ok(metadata
                .topics()
                .iter()
                .map(|topic| topic.name().to_string())
                .collect())
        })
        .await
        .map_err(|_| Error::Timeout(timeout))?
    }
}
