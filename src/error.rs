//! Error types for the synchronizer.
//!
//! Errors fall into three groups, which decide what the poll loop does:
//!
//! | Group | Examples | Handling |
//! |-------|----------|----------|
//! | transient | connection refused, pool timeout, HTTP 429/5xx | retried with backoff |
//! | cycle abort | rejected bulk items, SQL errors, checkpoint write failure | logged, watermark kept, next cycle retries |
//! | fatal | retry budget exhausted | loop stops, process exits non-zero |
//!
//! Missing or corrupt checkpoint state is not an error at all; see
//! [`Checkpoint::retrieve`](movies_etl_core::checkpoint::Checkpoint::retrieve).

use thiserror::Error;

use crate::retry::RetryError;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Postgres query or connection error.
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Elasticsearch transport error.
    #[error("Elasticsearch request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Elasticsearch answered with a non-success status.
    #[error("Elasticsearch returned {status}: {body}")]
    ElasticStatus { status: u16, body: String },

    /// The bulk request went through but some items were rejected.
    #[error("Bulk write rejected {failed} item(s): {first_error}")]
    BulkRejected { failed: usize, first_error: String },

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Checkpoint storage could not be read or written.
    #[error("Checkpoint error: {0:#}")]
    Checkpoint(#[from] anyhow::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A retried operation ran out of attempts.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Postgres(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            SyncError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            SyncError::ElasticStatus { status, .. } => *status == 429 || *status >= 500,
            SyncError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_refusal()
                    || e.is_connection_dropped()
                    || e.is_timeout()
            }
            SyncError::Io(_) => true,
            _ => false,
        }
    }

    /// Whether the process must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::RetriesExhausted { .. })
    }
}

impl From<RetryError<SyncError>> for SyncError {
    fn from(err: RetryError<SyncError>) -> Self {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted {
                operation,
                attempts,
                last,
            } => SyncError::RetriesExhausted {
                operation,
                attempts,
                source: Box::new(last),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let unavailable = SyncError::ElasticStatus {
            status: 503,
            body: String::new(),
        };
        let throttled = SyncError::ElasticStatus {
            status: 429,
            body: String::new(),
        };
        let bad_request = SyncError::ElasticStatus {
            status: 400,
            body: String::new(),
        };
        assert!(unavailable.is_transient());
        assert!(throttled.is_transient());
        assert!(!bad_request.is_transient());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(SyncError::Postgres(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!SyncError::Postgres(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_rejected_bulk_is_not_retried() {
        let err = SyncError::BulkRejected {
            failed: 1,
            first_error: "mapper_parsing_exception".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_exhausted_retry_is_fatal() {
        let err = SyncError::from(RetryError::Exhausted {
            operation: "elasticsearch ping".to_string(),
            attempts: 3,
            last: SyncError::ElasticStatus {
                status: 503,
                body: "unavailable".to_string(),
            },
        });
        assert!(err.is_fatal());
        assert!(err.to_string().contains("after 3 attempt(s)"));
    }

    #[test]
    fn test_permanent_retry_unwraps() {
        let err = SyncError::from(RetryError::Permanent(SyncError::BulkRejected {
            failed: 2,
            first_error: "x".to_string(),
        }));
        assert!(matches!(err, SyncError::BulkRejected { failed: 2, .. }));
    }
}
