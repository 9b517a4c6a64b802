//! # Error Types
//!
//! Error types for the albkeeper controller using `thiserror`.

use std::path::PathBuf;

/// Custom result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Main error type for the controller
#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// No certificate in the current snapshot covers the hostname
    #[error("No matching certificate found for hostname '{hostname}'")]
    NoMatchingCertificate { hostname: String },

    /// The orchestrator already reports the requested state
    #[error("No update needed for {resource}")]
    NoUpdateNeeded { resource: String },

    /// Cloud provisioning API failures
    #[error("Provider error during {operation}: {message}")]
    Provider { operation: String, message: String },

    /// Rate limiting from an external API
    #[error("Rate limit exceeded during {operation}")]
    RateLimit { operation: String, retry_after: Option<u64> },

    /// Orchestrator API failures
    #[error("Orchestrator error: {message}")]
    Orchestrator { message: String },

    /// A certificate source failed to produce its certificates
    #[error("Certificate source '{source_name}' failed: {message}")]
    CertificateSource { source_name: String, message: String },

    /// A certificate file could not be parsed
    #[error("Invalid certificate at {path}: {message}")]
    Certificate { path: PathBuf, message: String },

    /// A stack tag carries a value that cannot be decoded
    #[error("Invalid tag {key}={value}: {reason}")]
    InvalidTag { key: String, value: String, reason: String },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// JSON serialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// YAML decoding errors
    #[error("YAML error: {context}")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
        context: String,
    },

    /// Internal errors, including faults recovered at the pass boundary
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ControllerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a no matching certificate error
    pub fn no_matching_certificate<S: Into<String>>(hostname: S) -> Self {
        Self::NoMatchingCertificate { hostname: hostname.into() }
    }

    /// Create a no update needed error
    pub fn no_update_needed<S: Into<String>>(resource: S) -> Self {
        Self::NoUpdateNeeded { resource: resource.into() }
    }

    /// Create a provider error
    pub fn provider<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Provider { operation: operation.into(), message: message.into() }
    }

    /// Create a rate limit error
    pub fn rate_limit<S: Into<String>>(operation: S) -> Self {
        Self::RateLimit { operation: operation.into(), retry_after: None }
    }

    /// Create an orchestrator error
    pub fn orchestrator<S: Into<String>>(message: S) -> Self {
        Self::Orchestrator { message: message.into() }
    }

    /// Create a certificate source error
    pub fn certificate_source<N: Into<String>, M: Into<String>>(source_name: N, message: M) -> Self {
        Self::CertificateSource { source_name: source_name.into(), message: message.into() }
    }

    /// Create a certificate parsing error
    pub fn certificate<P: Into<PathBuf>, M: Into<String>>(path: P, message: M) -> Self {
        Self::Certificate { path: path.into(), message: message.into() }
    }

    /// Create an invalid tag error
    pub fn invalid_tag<K, V, R>(key: K, value: V, reason: R) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        Self::InvalidTag { key: key.into(), value: value.into(), reason: reason.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Add context to an error
    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        let context = context.into();
        match &mut self {
            ControllerError::Io { context: ctx, .. }
            | ControllerError::Serialization { context: ctx, .. }
            | ControllerError::Yaml { context: ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            _ => {}
        }
        self
    }

    /// Check if this error is an expected "not found" condition
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ControllerError::NotFound { .. } | ControllerError::NoMatchingCertificate { .. }
        )
    }

    /// Check if this error should be retried on a later pass
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::Provider { .. }
                | ControllerError::RateLimit { .. }
                | ControllerError::Orchestrator { .. }
                | ControllerError::CertificateSource { .. }
                | ControllerError::Io { .. }
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Config { .. } => "config",
            ControllerError::Validation { .. } => "validation",
            ControllerError::NotFound { .. } => "not_found",
            ControllerError::NoMatchingCertificate { .. } => "no_matching_certificate",
            ControllerError::NoUpdateNeeded { .. } => "no_update_needed",
            ControllerError::Provider { .. } => "provider",
            ControllerError::RateLimit { .. } => "rate_limit",
            ControllerError::Orchestrator { .. } => "orchestrator",
            ControllerError::CertificateSource { .. } => "certificate_source",
            ControllerError::Certificate { .. } => "certificate",
            ControllerError::InvalidTag { .. } => "invalid_tag",
            ControllerError::Io { .. } => "io",
            ControllerError::Serialization { .. } => "serialization",
            ControllerError::Yaml { .. } => "yaml",
            ControllerError::Internal { .. } => "internal",
        }
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for ControllerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<serde_yaml::Error> for ControllerError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Yaml { source: error, context: "YAML decoding failed".to_string() }
    }
}

impl From<config::ConfigError> for ControllerError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for ControllerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ControllerError::config("missing cluster id");
        assert!(matches!(error, ControllerError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: missing cluster id");
    }

    #[test]
    fn test_validation_error() {
        let error = ControllerError::validation_field("must not be empty", "cluster_id");
        if let ControllerError::Validation { field, .. } = error {
            assert_eq!(field, Some("cluster_id".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_not_found_classification() {
        assert!(ControllerError::not_found("stack", "kube-ing-1").is_not_found());
        assert!(ControllerError::no_matching_certificate("foo.example.org").is_not_found());
        assert!(!ControllerError::provider("CreateStack", "boom").is_not_found());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ControllerError::rate_limit("DescribeStacks").is_retryable());
        assert!(ControllerError::provider("UpdateStack", "throttled").is_retryable());
        assert!(ControllerError::orchestrator("connection reset").is_retryable());
        assert!(!ControllerError::validation("bad").is_retryable());
        assert!(!ControllerError::invalid_tag("ingress:http2", "maybe", "not a bool").is_retryable());
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ControllerError = io_error.into();
        assert!(matches!(err, ControllerError::Io { .. }));
        assert_eq!(err.kind(), "io");

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: ControllerError = json_error.into();
        assert!(matches!(err, ControllerError::Serialization { .. }));

        let yaml_error = serde_yaml::from_str::<Vec<String>>("{ not: [a list").unwrap_err();
        let err: ControllerError = yaml_error.into();
        let err = err.with_context("alarm config default/alarms");
        assert!(err.to_string().contains("alarm config default/alarms"));
    }
}
