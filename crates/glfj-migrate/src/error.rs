//! Error types for migration operations.

use std::time::Duration;

use thiserror::Error;

use crate::types::{EntityKind, TargetRef};

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Network-level failure talking to either platform.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The platform asked us to slow down (HTTP 429).
    #[error("Rate limit exceeded{}", fmt_retry_after(.retry_after))]
    RateLimited {
        /// Server supplied `Retry-After` hint.
        retry_after: Option<Duration>,
    },

    /// The target rejected the payload.
    #[error("Validation rejected ({status}): {message}")]
    Validation {
        /// HTTP status returned by the platform.
        status: u16,
        /// Response body or error message.
        message: String,
    },

    /// The token lacks the permission for this call.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Any other unexpected API response.
    #[error("API request failed ({status}): {message}")]
    Api {
        /// HTTP status returned by the platform.
        status: u16,
        /// Response body or error message.
        message: String,
    },

    /// A dependent entity was processed before the entity it references.
    #[error("Unresolved dependency: {dependent} requires {kind} '{key}' which has not been migrated yet")]
    UnresolvedDependency {
        /// Kind of the referenced entity.
        kind: EntityKind,
        /// Natural key of the referenced entity.
        key: String,
        /// Description of the entity that holds the reference.
        dependent: String,
    },

    /// Two different target refs were recorded for the same natural key.
    #[error("Duplicate mapping for {kind} '{key}': already mapped to {existing}, attempted {attempted}")]
    DuplicateMapping {
        /// Entity kind.
        kind: EntityKind,
        /// Natural key.
        key: String,
        /// The ref already present in the mapping table.
        existing: TargetRef,
        /// The conflicting ref.
        attempted: TargetRef,
    },

    /// The referenced entity was processed but has no target counterpart.
    #[error("{kind} '{key}' is unavailable: {reason}")]
    DependencyUnavailable {
        /// Kind of the referenced entity.
        kind: EntityKind,
        /// Natural key of the referenced entity.
        key: String,
        /// Why no target ref exists.
        reason: String,
    },

    /// The referenced entity does not appear in the (complete) source listing.
    #[error("{kind} '{key}' not found in the source listing")]
    MissingFromSource {
        /// Kind of the referenced entity.
        kind: EntityKind,
        /// Natural key of the referenced entity.
        key: String,
    },

    /// A source listing page could not be read after all retries.
    #[error("Reading {kind} listing failed at page {page}: {reason}")]
    ReaderFailure {
        /// Kind being listed.
        kind: EntityKind,
        /// Page index (1-based) that failed.
        page: u32,
        /// Last error seen.
        reason: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A response body did not have the expected shape.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(", retry after {} seconds", delay.as_secs()),
        None => String::new(),
    }
}

impl MigrationError {
    /// Map a non-success HTTP status onto the error taxonomy.
    pub fn from_status(status: u16, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::PermissionDenied(message),
            400 | 409 | 422 => Self::Validation { status, message },
            _ => Self::Api { status, message },
        }
    }

    /// Transient errors are retried with backoff; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Invariant violations abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedDependency { .. } | Self::DuplicateMapping { .. }
        )
    }

    /// Server supplied delay for rate limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            MigrationError::from_status(429, Some(Duration::from_secs(2)), String::new()),
            MigrationError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(2)
        ));
        assert!(matches!(
            MigrationError::from_status(422, None, "bad email".into()),
            MigrationError::Validation { status: 422, .. }
        ));
        assert!(matches!(
            MigrationError::from_status(403, None, "admin only".into()),
            MigrationError::PermissionDenied(_)
        ));
        assert!(matches!(
            MigrationError::from_status(502, None, String::new()),
            MigrationError::Api { status: 502, .. }
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MigrationError::Transport("reset".into()).is_retryable());
        assert!(MigrationError::RateLimited { retry_after: None }.is_retryable());
        assert!(MigrationError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!MigrationError::Api { status: 404, message: String::new() }.is_retryable());
        assert!(!MigrationError::Validation { status: 422, message: String::new() }.is_retryable());
        assert!(!MigrationError::PermissionDenied(String::new()).is_retryable());

        let decode = serde_json::from_str::<u64>("\"seven\"").unwrap_err();
        assert!(!MigrationError::from(decode).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        let unresolved = MigrationError::UnresolvedDependency {
            kind: EntityKind::Group,
            key: "eng".into(),
            dependent: "project eng/api".into(),
        };
        assert!(unresolved.is_fatal());
        assert!(!unresolved.is_retryable());
        assert!(!MigrationError::Transport("x".into()).is_fatal());
    }

    #[test]
    fn test_rate_limit_message() {
        let err = MigrationError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 2 seconds");
    }
}
