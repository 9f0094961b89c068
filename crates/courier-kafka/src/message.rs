//! The record wire unit exchanged through the producer and consumer.

use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::Message;
use std::collections::HashMap;

use courier_core::trace::{self, TraceId, TIMESTAMP_HEADER, TRACE_ID_HEADER};

/// An outbound record. The topic must be non-empty; the key may be empty, in
/// which case the broker spreads records across partitions arbitrarily.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, Vec<u8>>,
}

impl Record {
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: Vec::new(),
            value: value.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Serialize `value` as JSON into a new record.
    pub fn json<T: serde::Serialize>(
        topic: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self::new(topic, serde_json::to_vec(value)?))
    }

    /// Approximate wire size, used for buffer accounting.
    pub(crate) fn wire_size(&self) -> usize {
        self.topic.len()
            + self.key.len()
            + self.value.len()
            + self
                .headers
                .iter()
                .map(|(name, value)| name.len() + value.len())
                .sum::<usize>()
    }

    /// Stamp the ambient trace-id and the produce timestamp. Caller-supplied
    /// headers always win; a missing ambient trace-id omits the header.
    pub(crate) fn stamp_headers(&mut self, now: chrono::DateTime<chrono::Utc>) {
        if !self.headers.contains_key(TRACE_ID_HEADER) {
            if let Some(id) = trace::current_trace_id() {
                self.headers
                    .insert(TRACE_ID_HEADER.to_string(), id.as_str().as_bytes().to_vec());
            }
        }
        self.headers.entry(TIMESTAMP_HEADER.to_string()).or_insert_with(|| {
            now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                .into_bytes()
        });
    }

    pub(crate) fn owned_headers(&self) -> OwnedHeaders {
        let mut headers = OwnedHeaders::new_with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            headers = headers.insert(Header {
                key: name,
                value: Some(value.as_slice()),
            });
        }
        headers
    }
}

/// A record fetched by the consumer: logically identical to the [`Record`]
/// that produced it, plus its log position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, Vec<u8>>,
}

impl ReceivedRecord {
    pub(crate) fn from_borrowed(msg: &rdkafka::message::BorrowedMessage<'_>) -> Self {
        let mut headers = HashMap::new();
        if let Some(borrowed) = msg.headers() {
            for header in borrowed.iter() {
                headers.insert(
                    header.key.to_string(),
                    header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                );
            }
        }
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(<[u8]>::to_vec).unwrap_or_default(),
            value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
        }
    }

    /// Best-effort extraction of the producer-stamped trace-id.
    pub fn trace_id(&self) -> Option<TraceId> {
        self.headers
            .get(TRACE_ID_HEADER)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(TraceId::new)
    }

    /// Deserialize the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.value)
    }

    pub(crate) fn wire_size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc)
    }

    #[tokio::test]
    async fn stamping_injects_trace_and_timestamp() {
        let id = TraceId::new("abc").unwrap();
        let record = trace::with_trace_id(id, async {
            let mut record = Record::new("t", "v1").with_key("k");
            record.stamp_headers(fixed_now());
            record
        })
        .await;

        assert_eq!(
            record.headers.get(TRACE_ID_HEADER).unwrap().as_slice(),
            b"abc"
        );
        assert_eq!(
            record.headers.get(TIMESTAMP_HEADER).unwrap().as_slice(),
            b"2024-05-01T12:00:00Z"
        );
    }

    #[test]
    fn stamping_without_ambient_trace_omits_the_header() {
        let mut record = Record::new("t", "v1");
        record.stamp_headers(fixed_now());
        assert!(!record.headers.contains_key(TRACE_ID_HEADER));
        assert!(record.headers.contains_key(TIMESTAMP_HEADER));
    }

    #[tokio::test]
    async fn caller_headers_win_on_collision() {
        let id = TraceId::new("ambient").unwrap();
        let record = trace::with_trace_id(id, async {
            let mut record = Record::new("t", "v1")
                .with_header(TRACE_ID_HEADER, "explicit")
                .with_header(TIMESTAMP_HEADER, "2020-01-01T00:00:00Z");
            record.stamp_headers(fixed_now());
            record
        })
        .await;

        assert_eq!(
            record.headers.get(TRACE_ID_HEADER).unwrap().as_slice(),
            b"explicit"
        );
        assert_eq!(
            record.headers.get(TIMESTAMP_HEADER).unwrap().as_slice(),
            b"2020-01-01T00:00:00Z"
        );
    }

    #[test]
    fn trace_id_round_trips_through_received_headers() {
        let received = ReceivedRecord {
            topic: "t".to_string(),
            partition: 0,
            offset: 4,
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            headers: HashMap::from([(TRACE_ID_HEADER.to_string(), b"abc".to_vec())]),
        };
        assert_eq!(received.trace_id().unwrap().as_str(), "abc");

        let empty = ReceivedRecord {
            headers: HashMap::from([(TRACE_ID_HEADER.to_string(), Vec::new())]),
            ..received
        };
        assert_eq!(empty.trace_id(), None);
    }

    #[test]
    fn wire_size_counts_all_parts() {
        let record = Record::new("topic", "value").with_key("key").with_header("h", "x");
        assert_eq!(record.wire_size(), 5 + 3 + 5 + 1 + 1);
    }
}
