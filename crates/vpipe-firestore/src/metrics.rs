//! Firestore metrics, recorded through the `metrics` facade.

use metrics::{counter, histogram};

pub mod names {
    /// Requests by operation and HTTP status.
    pub const REQUESTS_TOTAL: &str = "vpipe_firestore_requests_total";

    /// Retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "vpipe_firestore_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vpipe_firestore_latency_seconds";

    /// Optimistic-concurrency conflicts by collection.
    pub const CONFLICTS_TOTAL: &str = "vpipe_firestore_conflicts_total";
}

/// Record a completed request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation.to_string())
        .record(latency_ms / 1000.0);
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// A read-modify-write lost the race and will be re-attempted.
pub fn record_conflict(collection: &str) {
    counter!(names::CONFLICTS_TOTAL, "collection" => collection.to_string()).increment(1);
}
