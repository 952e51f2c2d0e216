//! Centralized constants for the SQL guard.
//!
//! This module contains the tokens, limits and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Placeholder Tokens
// =============================================================================

/// Marker emitted by the query generator meaning "the caller's user id goes here".
pub const USER_SCOPE_MARKER: &str = "{user_id}";

/// Positional placeholder understood by the parameterized template.
pub const PLACEHOLDER: &str = "%s";

/// Escaped form of a literal percent sign inside a parameterized template.
pub const ESCAPED_PERCENT: &str = "%%";

/// Column alias used by the row-count estimate wrapper.
pub const ESTIMATE_COUNT_COLUMN: &str = "total_rows";

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout as Duration.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS);

/// Default query timeout as Duration.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS);

// =============================================================================
// Size Constants
// =============================================================================

/// Default maximum query length in bytes.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 1_000_000;

/// Default maximum result rows.
pub const DEFAULT_MAX_RESULT_ROWS: usize = 10_000;

/// Row-count thresholds for the size buckets reported by `estimate`.
pub const SMALL_DATASET_ROWS: u64 = 10;
pub const MEDIUM_DATASET_ROWS: u64 = 100;
pub const LARGE_DATASET_ROWS: u64 = 1000;

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for query logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_durations() {
        assert_eq!(DEFAULT_CONNECTION_TIMEOUT, Duration::from_secs(30));
        assert_eq!(DEFAULT_QUERY_TIMEOUT, Duration::from_secs(30));
    }

    #[test]
    fn test_bucket_thresholds_ascending() {
        assert!(SMALL_DATASET_ROWS < MEDIUM_DATASET_ROWS);
        assert!(MEDIUM_DATASET_ROWS < LARGE_DATASET_ROWS);
    }

    #[test]
    fn test_placeholder_tokens() {
        assert_eq!(ESCAPED_PERCENT, "%%");
        assert!(PLACEHOLDER.starts_with('%'));
        assert!(!USER_SCOPE_MARKER.contains('%'));
    }
}
