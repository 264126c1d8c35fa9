//! Error types for rivven-iceberg-source
//!
//! Construction-time failures (`Schema`) abort stream setup, `FilterBuild`
//! aborts a single stream's sync before any scan, and `Scan` errors are
//! surfaced as items of the record stream without being retried here.

use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Errors that can occur while discovering or reading Iceberg streams
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Table schema could not be read or is malformed
    #[error("schema error: {0}")]
    Schema(String),

    /// Stored cursor value cannot be turned into a scan predicate
    #[error("filter build error: {0}")]
    FilterBuild(String),

    /// Table layer failed while producing batches
    #[error("scan error: {0}")]
    Scan(String),

    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the catalog failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Namespace or table not found
    #[error("not found: {0}")]
    NotFound(String),

    /// State could not be interpreted
    #[error("state error: {0}")]
    State(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Arrow compute error
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl ConnectorError {
    /// Check if this error is retryable
    ///
    /// Only transport-level failures qualify. Schema and filter errors will
    /// fail again on the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Scan(_) | Self::Io(_))
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a filter build error
    pub fn filter(msg: impl Into<String>) -> Self {
        Self::FilterBuild(msg.into())
    }

    /// Create a scan error
    pub fn scan(msg: impl Into<String>) -> Self {
        Self::Scan(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectorError::filter("invalid isoformat string: 'yesterday'");
        assert_eq!(
            err.to_string(),
            "filter build error: invalid isoformat string: 'yesterday'"
        );

        let err = ConnectorError::schema("duplicate column 'id'");
        assert_eq!(err.to_string(), "schema error: duplicate column 'id'");
    }

    #[test]
    fn test_retryable_check() {
        assert!(ConnectorError::scan("object store timeout").is_retryable());
        assert!(ConnectorError::connection("refused").is_retryable());
        assert!(!ConnectorError::schema("no columns").is_retryable());
        assert!(!ConnectorError::filter("bad cursor").is_retryable());
        assert!(!ConnectorError::config("missing uri").is_retryable());
    }

    #[test]
    fn test_json_conversion() {
        let err: ConnectorError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ConnectorError::Json(_)));
    }
}
