//! Ambient trace-id propagation.
//!
//! A trace-id is an opaque string which follows a request across process
//! boundaries: callers bind one with [`with_trace_id()`], the producer stamps
//! it into the [`TRACE_ID_HEADER`] message header, and the consumer re-binds
//! it around each callback so that every log event emitted underneath can be
//! correlated.

use futures::Future;

/// Message header carrying the trace-id. Wire-fixed; do not rename.
pub const TRACE_ID_HEADER: &str = "X-Trace-ID";
/// Message header carrying the produce wall-clock instant, ISO-8601 with
/// seconds precision. Wire-fixed; do not rename.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

/// An opaque, non-empty trace identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Build a TraceId from a caller-supplied string.
    /// Returns None for the empty string, which means "no trace".
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static TRACE_ID: TraceId;
}

/// Run `fut` with `id` bound as the ambient trace-id. Any prior binding is
/// shadowed for the duration of `fut`.
pub async fn with_trace_id<F: Future>(id: TraceId, fut: F) -> F::Output {
    TRACE_ID.scope(id, fut).await
}

/// The trace-id bound by the nearest enclosing [`with_trace_id()`] scope,
/// if any.
pub fn current_trace_id() -> Option<TraceId> {
    TRACE_ID.try_with(|id| id.clone()).ok()
}

/// Task-locals don't follow futures through `tokio::spawn()`. This re-binds
/// the current trace-id (when one is set) onto `fut` so it can be spawned
/// without losing the ambient id.
pub fn propagate_trace<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let current = current_trace_id();
    async move {
        match current {
            Some(id) => TRACE_ID.scope(id, fut).await,
            None => fut.await,
        }
    }
}
