//! Error types
//!
//! [`ApiError`] is the structured form of a non-2xx response. [`Error`] covers
//! every way a call through the [`Manager`](super::manager::Manager) can fail.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize a body for logging: truncate and strip control characters
pub(crate) fn sanitize_for_log(body: &[u8]) -> String {
    let body = String::from_utf8_lossy(body);
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.into_owned()
    };

    truncated.replace(char::is_control, "")
}

/// Structured error built from a non-2xx API response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    message: String,
    code: u16,
    body: Vec<u8>,
    error_aliases: Vec<String>,
}

#[derive(Deserialize)]
struct AliasBody {
    #[serde(default)]
    error_alias: Vec<String>,
}

impl ApiError {
    /// Classify a failed response. An unparsable body yields no aliases.
    pub fn from_response(url: &str, code: u16, body: Vec<u8>) -> Self {
        let message = format!(
            "HTTP request failure on {}:\n{}: {}",
            url,
            code,
            String::from_utf8_lossy(&body)
        );
        let error_aliases = serde_json::from_slice::<AliasBody>(&body)
            .map(|parsed| parsed.error_alias)
            .unwrap_or_default();

        Self {
            message,
            code,
            body,
            error_aliases,
        }
    }

    /// A 409 that reports a real conflict rather than a transient lock
    pub(crate) fn conflict(url: &str, body: Vec<u8>, conflict: &ConflictBody) -> Self {
        let summary = conflict
            .non_field_errors
            .first()
            .map(display_json)
            .unwrap_or_default();
        let details = serde_json::to_string(&conflict.details).unwrap_or_default();

        Self {
            message: format!("HTTP request failure on {}:\n409: {}: {}", url, summary, details),
            code: 409,
            body,
            error_aliases: conflict.aliases(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Raw response body, unmodified
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Error aliases declared by the server (`error_alias` field)
    pub fn error_aliases(&self) -> &[String] {
        &self.error_aliases
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.error_aliases.iter().any(|a| a == alias)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ApiError {}

/// Body of a 409 response
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConflictBody {
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
    #[serde(default)]
    pub error_alias: Vec<serde_json::Value>,
    #[serde(default)]
    pub non_field_errors: Vec<serde_json::Value>,
}

impl ConflictBody {
    pub fn first_alias(&self) -> Option<String> {
        self.error_alias.first().map(display_json)
    }

    fn aliases(&self) -> Vec<String> {
        self.error_alias.iter().map(display_json).collect()
    }
}

/// Render a JSON scalar without quotes, anything else as compact JSON
fn display_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Errors returned by the client
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced a response
    #[error("HTTP request failure on {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Lock timeout: waiting unlock for '{url}' took more than {}s", .waited.as_secs())]
    LockTimeout { url: String, waited: Duration },

    #[error("Task {task_id} in error status, step: {step}")]
    TaskFailed { task_id: String, step: String },

    #[error("Task timeout: waiting task {task_id} took more than {}s", .waited.as_secs())]
    TaskTimeout { task_id: String, waited: Duration },

    #[error("JSON decode failed on {url}:\n{payload}")]
    Decode {
        url: String,
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("YAML decode failed on {url}:\n{payload}")]
    YamlDecode {
        url: String,
        payload: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to encode request body for {url}")]
    Encode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid request URL {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Incomplete listing on {url}: page {page} left {collected} of {total} items")]
    Pagination {
        url: String,
        page: usize,
        collected: usize,
        total: usize,
    },

    #[error("Empty response body from {url}")]
    EmptyResponse { url: String },

    #[error("No cluster ID found in the URL {url}")]
    KubeconfigId { url: String },

    #[error("I/O error on {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Invalid certificate material in {name}")]
    Certificate {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Structured API error, if this is one
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Error::Api(err) => Some(err),
            _ => None,
        }
    }

    /// HTTP status code of an API error
    pub fn status(&self) -> Option<u16> {
        self.api().map(ApiError::code)
    }

    /// True when the caller's scope ended the operation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

/// Result alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_keeps_body_and_aliases() {
        let body = br#"{"error_alias": ["quota_exceeded"], "details": []}"#.to_vec();
        let err = ApiError::from_response("https://cp.example/v1/disk", 400, body.clone());

        assert_eq!(err.code(), 400);
        assert_eq!(err.body(), body.as_slice());
        assert_eq!(err.error_aliases(), ["quota_exceeded".to_string()]);
        assert!(err.has_alias("quota_exceeded"));
        assert!(err.message().contains("https://cp.example/v1/disk"));
        assert!(err.message().contains("400"));
        assert!(err.message().contains("quota_exceeded"));
    }

    #[test]
    fn test_classifier_tolerates_unparsable_body() {
        let err = ApiError::from_response("https://cp.example/v1/vm", 502, b"<html>bad gateway</html>".to_vec());

        assert!(err.error_aliases().is_empty());
        assert!(err.message().contains("<html>bad gateway</html>"));
        assert_eq!(err.to_string(), err.message());
    }

    #[test]
    fn test_conflict_message_uses_first_non_field_error() {
        let conflict: ConflictBody = serde_json::from_str(
            r#"{"details": [{"field": "name"}], "error_alias": ["name_taken"], "non_field_errors": ["Name already used"]}"#,
        )
        .unwrap();
        let err = ApiError::conflict("https://cp.example/v1/network", b"{}".to_vec(), &conflict);

        assert_eq!(err.code(), 409);
        assert_eq!(conflict.first_alias().as_deref(), Some("name_taken"));
        assert!(err.message().contains("Name already used: [{\"field\":\"name\"}]"));
        assert_eq!(err.error_aliases(), ["name_taken".to_string()]);
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(body.as_bytes());
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
        assert!(sanitized.len() < 300);
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log(b"line\none\ttab"), "lineonetab");
    }

    #[test]
    fn test_error_helpers() {
        let err = Error::from(ApiError::from_response("u", 404, Vec::new()));
        assert_eq!(err.status(), Some(404));
        assert!(!err.is_cancellation());
        assert!(Error::Cancelled.is_cancellation());
        assert!(Error::DeadlineExceeded.is_cancellation());
    }
}
