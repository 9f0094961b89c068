//! End-to-end scenarios against a real broker.
//!
//! These need a reachable Kafka listener; point `COURIER_TEST_BROKERS` at it
//! (default `localhost:9092`) and run with `cargo test -- --ignored`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::trace::{self, TraceId};
use courier_kafka::config::TopicDetail;
use courier_kafka::{Acks, KafkaConfig, Provider, Record};

fn provider() -> Provider {
    let brokers = std::env::var("COURIER_TEST_BROKERS")
        .unwrap_or_else(|_| "localhost:9092".to_string());
    let mut user = KafkaConfig {
        brokers: brokers.split(',').map(str::to_string).collect(),
        ..KafkaConfig::default()
    };
    user.producer.acks = Some(Acks::Leader);
    user.consumer.auto_commit_interval = Duration::from_millis(250);
    Provider::new(Some(user), None).unwrap()
}

fn unique_topic(prefix: &str) -> String {
    format!(
        "{prefix}-{}",
        uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
    )
}

#[tokio::test]
#[ignore = "requires a running Kafka broker"]
async fn produce_then_consume_round_trip() {
    let provider = provider();
    let topic = unique_topic("courier-basic");
    provider
        .admin()
        .unwrap()
        .create_topic(&topic, &TopicDetail::default())
        .await
        .unwrap();

    provider
        .producer()
        .unwrap()
        .send_sync(Record::new(topic.clone(), "v1").with_key("k"))
        .await
        .unwrap();

    let consumer = provider.consumer("courier-basic-group").unwrap();
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<(Vec<u8>, Vec<u8>)>();
    let seen_tx = std::sync::Mutex::new(Some(seen_tx));

    let consume = {
        let consumer = consumer.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            consumer
                .subscribe(&[topic.as_str()], move |record| {
                    if let Some(tx) = seen_tx.lock().unwrap().take() {
                        let _ = tx.send((record.key.clone(), record.value.clone()));
                    }
                    async { Ok(()) }
                })
                .await
        })
    };

    let (key, value) = tokio::time::timeout(Duration::from_secs(30), seen_rx)
        .await
        .expect("message must arrive")
        .unwrap();
    assert_eq!(key, b"k");
    assert_eq!(value, b"v1");

    consumer.close().await;
    consume.await.unwrap().unwrap();
    provider.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Kafka broker"]
async fn failed_callback_is_redelivered_and_counted() {
    let provider = provider();
    let topic = unique_topic("courier-retry");
    provider
        .admin()
        .unwrap()
        .create_topic(&topic, &TopicDetail::default())
        .await
        .unwrap();

    provider
        .producer()
        .unwrap()
        .send_sync(Record::new(topic.clone(), "flaky"))
        .await
        .unwrap();

    let consumer = provider.consumer("courier-retry-group").unwrap();
    let deliveries = Arc::new(AtomicU32::new(0));
    let done = Arc::new(tokio::sync::Notify::new());

    let consume = {
        let consumer = consumer.clone();
        let topic = topic.clone();
        let deliveries = deliveries.clone();
        let done = done.clone();
        tokio::spawn(async move {
            consumer
                .subscribe(&[topic.as_str()], move |_record| {
                    let attempt = deliveries.fetch_add(1, Ordering::SeqCst);
                    let done = done.clone();
                    async move {
                        if attempt == 0 {
                            anyhow::bail!("transient processing failure");
                        }
                        done.notify_waiters();
                        Ok(())
                    }
                })
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(30), done.notified())
        .await
        .expect("record must be redelivered and processed");
    // Let the commit tick run before closing.
    tokio::time::sleep(Duration::from_millis(500)).await;
    consumer.close().await;
    consume.await.unwrap().unwrap();

    assert!(deliveries.load(Ordering::SeqCst) >= 2);
    let metrics = consumer.metrics();
    assert_eq!(metrics.failed_messages, 1);
    assert!(metrics.processed_messages >= 1);

    provider.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Kafka broker"]
async fn trace_id_propagates_through_the_broker() {
    let provider = provider();
    let topic = unique_topic("courier-trace");
    provider
        .admin()
        .unwrap()
        .create_topic(&topic, &TopicDetail::default())
        .await
        .unwrap();

    let producer = provider.producer().unwrap();
    trace::with_trace_id(TraceId::new("abc").unwrap(), async {
        producer
            .send_sync(Record::new(topic.clone(), "traced"))
            .await
    })
    .await
    .unwrap();

    let consumer = provider.consumer("courier-trace-group").unwrap();
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<Option<TraceId>>();
    let seen_tx = std::sync::Mutex::new(Some(seen_tx));

    let consume = {
        let consumer = consumer.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            consumer
                .subscribe(&[topic.as_str()], move |record| {
                    // The dispatch loop re-binds the record's trace-id as the
                    // ambient id around the callback.
                    let header = record.trace_id();
                    let ambient = trace::current_trace_id();
                    assert_eq!(header, ambient);
                    if let Some(tx) = seen_tx.lock().unwrap().take() {
                        let _ = tx.send(ambient);
                    }
                    async { Ok(()) }
                })
                .await
        })
    };

    let ambient = tokio::time::timeout(Duration::from_secs(30), seen_rx)
        .await
        .expect("message must arrive")
        .unwrap();
    assert_eq!(ambient, TraceId::new("abc"));

    consumer.close().await;
    consume.await.unwrap().unwrap();
    provider.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Kafka broker"]
async fn topic_admin_is_idempotent() {
    let provider = provider();
    let admin = provider.admin().unwrap();
    let topic = unique_topic("courier-admin");

    let detail = TopicDetail {
        num_partitions: 2,
        ..TopicDetail::default()
    };
    admin.create_topic(&topic, &detail).await.unwrap();
    admin.create_topic(&topic, &detail).await.unwrap(); // already exists: success

    let listed = admin.list_topics().await.unwrap();
    assert!(listed.contains(&topic));

    let metadata = admin.topic_metadata(&topic).await.unwrap();
    assert_eq!(metadata.partitions.len(), 2);

    // Growing partitions is monotonic; equal counts are a no-op.
    admin.create_partitions(&topic, 2).await.unwrap();
    admin.create_partitions(&topic, 4).await.unwrap();
    let err = admin.create_partitions(&topic, 3).await.unwrap_err();
    assert!(matches!(err, courier_kafka::Error::PartitionShrink { .. }));

    admin.delete_topic(&topic).await.unwrap();
    admin.delete_topic(&topic).await.unwrap(); // missing: success

    provider.close().await.unwrap();
}
