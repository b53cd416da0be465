//! Error types for Ratewarden.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Ratewarden operations.
///
/// Store failures are never folded into an admit or deny decision. Callers
/// pick their own fail-open or fail-closed policy from these variants.
#[derive(Error, Debug)]
pub enum RatewardenError {
    /// A rule was defined with a zero limit or an empty period
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// A limiter was constructed without any rules
    #[error("Rate limiter requires at least one rule")]
    EmptyRuleSet,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store rejected the request or could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),

    /// The backing store did not answer within the response timeout
    #[error("Store did not respond within {0:?}")]
    StoreTimeout(Duration),

    /// The store was used after `close()`
    #[error("Store closed")]
    StoreClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatewardenError {
    /// Whether this error came from the backing store rather than from configuration.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            RatewardenError::StoreUnavailable(_)
                | RatewardenError::StoreTimeout(_)
                | RatewardenError::StoreClosed
        )
    }
}

impl From<config::ConfigError> for RatewardenError {
    fn from(err: config::ConfigError) -> Self {
        RatewardenError::Config(err.to_string())
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, RatewardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_failures_are_classified() {
        assert!(RatewardenError::StoreClosed.is_store_failure());
        assert!(RatewardenError::StoreTimeout(Duration::from_millis(10)).is_store_failure());
        assert!(!RatewardenError::EmptyRuleSet.is_store_failure());
        assert!(!RatewardenError::InvalidRule("limit".to_string()).is_store_failure());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(RatewardenError::StoreClosed.to_string(), "Store closed");
        assert_eq!(
            RatewardenError::Config("missing url".to_string()).to_string(),
            "Configuration error: missing url"
        );
    }
}
