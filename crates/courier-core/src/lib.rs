//! Cross-cutting infrastructure shared by the courier messaging and storage
//! clients: layered configuration resolution, logging setup, ambient trace-id
//! propagation, and the error-category taxonomy.

pub mod config;
pub mod error;
pub mod logging;
pub mod trace;

pub use error::{Categorized, Category};
pub use trace::{TraceId, TIMESTAMP_HEADER, TRACE_ID_HEADER};
