//! Request correlation and guard metrics.
//!
//! This module provides:
//! - Correlation ID tracking for request tracing
//! - Counters for accepted, rejected and failed queries

use crate::error::FailureKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generate a short correlation ID (8 characters) for compact logging.
pub fn generate_short_correlation_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Request context for carrying correlation information through the request lifecycle.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    pub correlation_id: String,
    /// When the request was received.
    pub start_time: Instant,
    /// Operation being performed (execute, check, estimate).
    pub operation: Option<String>,
}

impl RequestContext {
    /// Create a new request context with a generated correlation ID.
    pub fn new() -> Self {
        Self::with_correlation_id(generate_short_correlation_id())
    }

    /// Create a new request context with a specific correlation ID.
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            start_time: Instant::now(),
            operation: None,
        }
    }

    /// Set the operation name.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Get the elapsed time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Create a log prefix for consistent logging format.
    pub fn log_prefix(&self) -> String {
        match &self.operation {
            Some(op) => format!("[{}] [{}]", self.correlation_id, op),
            None => format!("[{}]", self.correlation_id),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline metrics collection.
#[derive(Debug, Default)]
pub struct GuardMetrics {
    /// Queries that reached the pipeline.
    pub queries_total: AtomicU64,

    /// Queries that executed successfully.
    pub queries_success: AtomicU64,

    /// Queries rejected before reaching the database.
    pub queries_rejected: AtomicU64,

    /// Queries that failed in the driver.
    pub queries_failed: AtomicU64,

    /// Binder invariant violations.
    pub internal_errors: AtomicU64,

    /// Total execution time in milliseconds for dispatched queries.
    pub query_time_ms_total: AtomicU64,
}

impl GuardMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully executed query.
    pub fn record_success(&self, duration: Duration) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.queries_success.fetch_add(1, Ordering::Relaxed);
        self.query_time_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed query by failure class.
    pub fn record_failure(&self, kind: FailureKind) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            FailureKind::Security => &self.queries_rejected,
            FailureKind::Execution => &self.queries_failed,
            FailureKind::Internal => &self.internal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            queries_success: self.queries_success.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            query_time_ms_total: self.query_time_ms_total.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub queries_success: u64,
    pub queries_rejected: u64,
    pub queries_failed: u64,
    pub internal_errors: u64,
    pub query_time_ms_total: u64,
}

impl MetricsSnapshot {
    /// Calculate average execution time of successful queries in milliseconds.
    pub fn avg_query_time_ms(&self) -> f64 {
        if self.queries_success == 0 {
            return 0.0;
        }
        self.query_time_ms_total as f64 / self.queries_success as f64
    }

    /// Calculate the rejection rate as a percentage.
    pub fn rejection_rate(&self) -> f64 {
        if self.queries_total == 0 {
            return 0.0;
        }
        (self.queries_rejected as f64 / self.queries_total as f64) * 100.0
    }
}

/// Shared metrics type for thread-safe access.
pub type SharedMetrics = Arc<GuardMetrics>;

/// Create a new shared metrics collector.
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(GuardMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_length() {
        let id = generate_short_correlation_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_log_prefix() {
        let ctx = RequestContext::with_correlation_id("abc12345");
        assert_eq!(ctx.log_prefix(), "[abc12345]");

        let ctx = ctx.with_operation("execute");
        assert_eq!(ctx.log_prefix(), "[abc12345] [execute]");
    }

    #[test]
    fn test_metrics_by_failure_kind() {
        let metrics = GuardMetrics::new();
        metrics.record_success(Duration::from_millis(40));
        metrics.record_success(Duration::from_millis(20));
        metrics.record_failure(FailureKind::Security);
        metrics.record_failure(FailureKind::Execution);

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_total, 4);
        assert_eq!(snap.queries_success, 2);
        assert_eq!(snap.queries_rejected, 1);
        assert_eq!(snap.queries_failed, 1);
        assert_eq!(snap.internal_errors, 0);
        assert!((snap.avg_query_time_ms() - 30.0).abs() < f64::EPSILON);
        assert!((snap.rejection_rate() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot_rates() {
        let snap = GuardMetrics::new().snapshot();
        assert_eq!(snap.avg_query_time_ms(), 0.0);
        assert_eq!(snap.rejection_rate(), 0.0);
    }
}
