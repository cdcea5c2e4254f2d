// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Detector Error Types
 * Error taxonomy shared by the store, replayer and control plane
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Duration;
use thiserror::Error;

/// Main detector error type, one variant per surfaced error kind
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Input failed validation at the control plane
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Session or execution state conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store failure that survived the local retry
    #[error("storage error: {0}")]
    Storage(String),

    /// DNS, TLS or connection failure while replaying
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Per-request deadline exceeded
    #[error("request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Target-side rate limiting (client-side limiting delays, never errors)
    #[error("rate limited by target")]
    RateLimited { retry_after: Option<Duration> },

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl DetectorError {
    /// Stable kind string surfaced in API error codes and response records
    pub fn kind(&self) -> &'static str {
        match self {
            DetectorError::Validation(_) => "validation",
            DetectorError::NotFound { .. } => "not_found",
            DetectorError::Conflict(_) => "conflict",
            DetectorError::Storage(_) => "storage",
            DetectorError::Network { .. } => "network",
            DetectorError::Timeout { .. } => "timeout",
            DetectorError::RateLimited { .. } => "rate_limited",
            DetectorError::Internal(_) => "internal",
        }
    }

    /// Transport-level errors are retryable; HTTP statuses are data and
    /// never reach this path as errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DetectorError::Network { .. } | DetectorError::Storage(_)
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DetectorError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DetectorError::Validation(msg.into())
    }
}

impl From<sqlx::Error> for DetectorError {
    fn from(err: sqlx::Error) -> Self {
        DetectorError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DetectorError {
    fn from(err: serde_json::Error) -> Self {
        DetectorError::Internal(format!("serialization failed: {}", err))
    }
}

/// Result type for detector operations
pub type DetectorResult<T> = Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(DetectorError::Validation("x".into()).kind(), "validation");
        assert_eq!(DetectorError::not_found("flow", 7).kind(), "not_found");
        assert_eq!(DetectorError::Conflict("busy".into()).kind(), "conflict");
        assert_eq!(
            DetectorError::Timeout {
                duration: Duration::from_secs(30)
            }
            .kind(),
            "timeout"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(DetectorError::Network {
            url: "http://t".into(),
            reason: "refused".into()
        }
        .is_retryable());
        assert!(DetectorError::Storage("locked".into()).is_retryable());
        assert!(!DetectorError::Validation("bad".into()).is_retryable());
        assert!(!DetectorError::Timeout {
            duration: Duration::from_secs(1)
        }
        .is_retryable());
    }
}
