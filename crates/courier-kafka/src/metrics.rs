//! Process-wide Prometheus counters, registered against the default
//! registry so they show up on whatever scrape endpoint the host process
//! exposes.

use lazy_static::lazy_static;
use prometheus::{register_int_counter, IntCounter};

lazy_static! {
    pub static ref PRODUCER_SUBMITTED: IntCounter = register_int_counter!(
        "courier_producer_submitted_total",
        "Records accepted into the producer buffer"
    )
    .unwrap();
    pub static ref PRODUCER_DELIVERED: IntCounter = register_int_counter!(
        "courier_producer_delivered_total",
        "Records acknowledged by the broker"
    )
    .unwrap();
    pub static ref PRODUCER_FAILED: IntCounter = register_int_counter!(
        "courier_producer_failed_total",
        "Records that failed terminally after retries"
    )
    .unwrap();
    pub static ref CONSUMER_RECEIVED: IntCounter = register_int_counter!(
        "courier_consumer_received_total",
        "Records fetched and dispatched to callbacks"
    )
    .unwrap();
    pub static ref CONSUMER_PROCESSED: IntCounter = register_int_counter!(
        "courier_consumer_processed_total",
        "Records whose callback succeeded"
    )
    .unwrap();
    pub static ref CONSUMER_FAILED: IntCounter = register_int_counter!(
        "courier_consumer_failed_total",
        "Records whose callback returned an error"
    )
    .unwrap();
}

/// Render the default registry in Prometheus text format.
pub fn gather() -> String {
    prometheus::TextEncoder::new()
        .encode_to_string(&prometheus::default_registry().gather())
        .unwrap_or_default()
}
