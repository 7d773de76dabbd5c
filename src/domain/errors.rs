use serde::Serialize;
use thiserror::Error;

/// Errors raised anywhere in the ingestion pipeline.
///
/// Retryability is decided where the error is created and carried on the
/// value; callers never inspect the message text to classify a failure.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Missing configuration: {0}")]
    Configuration(String),

    #[error("Circuit breaker open for source '{source_name}'")]
    CircuitOpen { source_name: String },

    #[error("Network failure: {message}")]
    Network { message: String, retryable: bool },

    #[error("Upstream responded with HTTP {status}")]
    Upstream { status: u16, retryable: bool },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Too many requests")]
    RateLimited,
}

impl PipelineError {
    pub fn network(message: impl Into<String>) -> Self {
        PipelineError::Network {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(what: &str, deadline: std::time::Duration) -> Self {
        PipelineError::Network {
            message: format!("{} timed out after {}ms", what, deadline.as_millis()),
            retryable: true,
        }
    }

    /// Classify an upstream HTTP status: 429 and 5xx may succeed later, any
    /// other client error will not.
    pub fn from_status(status: u16) -> Self {
        let retryable = status == 429 || (500..600).contains(&status);
        PipelineError::Upstream { status, retryable }
    }

    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_) => false,
            PipelineError::Configuration(_) => false,
            PipelineError::CircuitOpen { .. } => true,
            PipelineError::Network { retryable, .. } => *retryable,
            PipelineError::Upstream { retryable, .. } => *retryable,
            PipelineError::Extraction(_) => false,
            PipelineError::Persistence(_) => false,
            PipelineError::RateLimited => true,
        }
    }

    /// Whether the fetch gateway should spend another attempt on this error.
    /// An open circuit is recoverable for the caller but is never retried
    /// in-place.
    pub fn should_retry_fetch(&self) -> bool {
        !matches!(self, PipelineError::CircuitOpen { .. }) && self.retryable()
    }

    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::Configuration(_) => "CONFIGURATION_ERROR",
            PipelineError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            PipelineError::Network { .. } => "NETWORK_ERROR",
            PipelineError::Upstream { .. } => "UPSTREAM_ERROR",
            PipelineError::Extraction(_) => "EXTRACTION_ERROR",
            PipelineError::Persistence(_) => "PERSISTENCE_ERROR",
            PipelineError::RateLimited => "RATE_LIMITED",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Serializable error body of the outward response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retryable: bool,
}

impl ErrorBody {
    pub fn from_error(error: &PipelineError, request_id: impl Into<String>) -> Self {
        ErrorBody {
            code: error.code().to_string(),
            message: error.to_string(),
            request_id: request_id.into(),
            timestamp: chrono::Utc::now(),
            retryable: error.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_classification() {
        assert!(PipelineError::from_status(429).retryable());
        assert!(PipelineError::from_status(500).retryable());
        assert!(PipelineError::from_status(503).retryable());
        assert!(!PipelineError::from_status(404).retryable());
        assert!(!PipelineError::from_status(403).retryable());
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        assert!(!PipelineError::Validation("unknown action".into()).retryable());
        assert!(!PipelineError::Configuration("missing base url".into()).retryable());
    }

    #[test]
    fn test_circuit_open_is_retryable_but_not_retried_in_place() {
        let err = PipelineError::CircuitOpen {
            source_name: "catalog".into(),
        };
        assert!(err.retryable());
        assert!(!err.should_retry_fetch());
        assert_eq!(err.code(), "CIRCUIT_OPEN");
    }

    #[test]
    fn test_timeout_is_retryable_network_error() {
        let err = PipelineError::timeout("primary fetch", Duration::from_secs(20));
        assert!(err.retryable());
        assert!(err.should_retry_fetch());
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert!(err.to_string().contains("20000ms"));
    }

    #[test]
    fn test_error_body_carries_retryable_flag() {
        let body = ErrorBody::from_error(&PipelineError::from_status(502), "req-1");
        assert_eq!(body.code, "UPSTREAM_ERROR");
        assert_eq!(body.request_id, "req-1");
        assert!(body.retryable);
    }
}
