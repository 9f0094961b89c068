//! Layered resolution of the kafka configuration through real files.

use std::io::Write;
use std::time::Duration;

use courier_core::config::{self, Source};
use courier_kafka::KafkaConfig;

#[test]
fn caller_fields_beat_file_fields_beat_defaults() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"brokers": ["file:1"], "dialTimeout": "10s"}}"#
    )
    .unwrap();

    let user = KafkaConfig {
        brokers: vec!["user:1".to_string()],
        ..KafkaConfig::default()
    };

    let resolved = config::resolve("kafka", Some(user), Some(file.path())).unwrap();
    assert_eq!(resolved.source(), Source::Mixed);
    assert_eq!(resolved.brokers, vec!["user:1".to_string()]);
    // The file's dial timeout survives because the caller left it unset.
    assert_eq!(resolved.dial_timeout, Duration::from_secs(10));
}

#[test]
fn yaml_files_resolve_the_same_way() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        file,
        "brokers: [\"file:1\"]\nproducer:\n  compression: zstd\n  linger: 20ms\n"
    )
    .unwrap();

    let resolved: config::Resolved<KafkaConfig> =
        config::resolve("kafka", None, Some(file.path())).unwrap();
    assert_eq!(resolved.source(), Source::File);
    assert_eq!(resolved.brokers, vec!["file:1".to_string()]);
    assert_eq!(
        resolved.producer.compression,
        Some(courier_kafka::Compression::Zstd)
    );
    assert_eq!(resolved.producer.linger(), Duration::from_millis(20));
}

#[test]
fn a_garbled_file_is_a_config_error() {
    use courier_core::Categorized;

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, "{{").unwrap();

    let err = config::resolve::<KafkaConfig>("kafka", None, Some(file.path())).unwrap_err();
    assert!(err.is_config());
}
