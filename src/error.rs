//! Error types for usecase-runtime

use std::collections::BTreeMap;

/// Reason string used when a circuit breaker rejects an execution.
pub const REASON_CIRCUIT_OPEN: &str = "circuit breaker is open";
/// Reason string used when a retry budget is spent.
pub const REASON_MAX_RETRIES: &str = "max retries exhausted";
/// Reason string used when failover has visited every provider.
pub const REASON_NO_PROVIDERS: &str = "no providers remaining";

/// Snapshot of an outgoing request attached to HTTP errors for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSnapshot {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// An HTTP response the map did not handle.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpCallError {
    pub status_code: u16,
    pub request: RequestSnapshot,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: Option<serde_json::Value>,
}

impl std::fmt::Display for HttpCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} responded with status {}",
            self.request.method, self.request.url, self.status_code
        )
    }
}

/// Error types for perform operations
#[derive(thiserror::Error, Debug)]
pub enum PerformError {
    /// Invalid or inconsistent configuration document
    #[error("Configuration error: {0}")]
    Config(String),

    /// Binding profile, map, and provider documents failed
    #[error("Bind error: {0}")]
    Bind(String),

    /// The validator rejected the composed input
    #[error("Input validation error: {0}")]
    InputValidation(String),

    /// The validator rejected the mapped result
    #[error("Result validation error: {0}")]
    ResultValidation(String),

    /// Malformed outgoing request (missing base URL, path variables, content type)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Non-2xx response the map did not handle
    #[error("HTTP error: {0}")]
    Http(HttpCallError),

    /// Transport-level failure before any status was received
    #[error("Network error: {0}")]
    Network(String),

    /// The failure policy decided no attempt can succeed
    #[error("{0}")]
    PolicyAbort(String),

    /// The caller cancelled the perform
    #[error("cancelled")]
    Cancelled,

    /// Invariant violation; must never be caught by policies
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Coarse error category, stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Bind,
    InputValidation,
    ResultValidation,
    InvalidRequest,
    Http,
    Network,
    PolicyAbort,
    Cancelled,
    Unexpected,
}

impl PerformError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PerformError::Config(_) => ErrorKind::Config,
            PerformError::Bind(_) => ErrorKind::Bind,
            PerformError::InputValidation(_) => ErrorKind::InputValidation,
            PerformError::ResultValidation(_) => ErrorKind::ResultValidation,
            PerformError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PerformError::Http(_) => ErrorKind::Http,
            PerformError::Network(_) => ErrorKind::Network,
            PerformError::PolicyAbort(_) => ErrorKind::PolicyAbort,
            PerformError::Cancelled => ErrorKind::Cancelled,
            PerformError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Whether a failure policy may observe this error and decide to retry.
    ///
    /// Validation, configuration, and bind errors short-circuit before any
    /// policy is consulted; cancellation and invariant violations propagate
    /// untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PerformError::Http(_) | PerformError::Network(_))
    }

    /// Check whether this is a policy rejection with the given reason.
    pub fn is_policy_abort(&self, reason: &str) -> bool {
        matches!(self, PerformError::PolicyAbort(r) if r == reason)
    }

    /// Deterministic multi-part report: short message, explanation, hints.
    pub fn report(&self) -> ErrorReport {
        let short = self.to_string();
        let (explanation, hints) = match self {
            PerformError::Config(_) => (
                "The configuration document does not describe a runnable setup.".to_string(),
                vec![
                    "Check that every provider named in a profile priority exists under top-level providers".to_string(),
                    "Check super.json against the documented schema".to_string(),
                ],
            ),
            PerformError::Bind(_) => (
                "Profile, map, and provider documents could not be resolved into a bound provider.".to_string(),
                vec!["Verify the registry is reachable and the provider name matches the map header".to_string()],
            ),
            PerformError::InputValidation(detail) => (
                format!("The composed input does not match the use case input shape.\n{detail}"),
                vec!["Compare the passed input with the profile's declared input fields".to_string()],
            ),
            PerformError::ResultValidation(detail) => (
                format!("The mapped result does not match the use case result shape.\n{detail}"),
                vec!["The map may be out of date with the profile".to_string()],
            ),
            PerformError::InvalidRequest(detail) => (
                format!("The map produced a request that cannot be sent.\n{detail}"),
                vec![],
            ),
            PerformError::Http(call) => (
                format!(
                    "{} {} failed with status {} and the map did not handle it.",
                    call.request.method, call.request.url, call.status_code
                ),
                vec!["Inspect the attached response body for provider diagnostics".to_string()],
            ),
            PerformError::Network(detail) => (
                format!("The request never produced a response.\n{detail}"),
                vec!["Check connectivity and the provider service base URL".to_string()],
            ),
            PerformError::PolicyAbort(reason) => (
                format!("The failure policy stopped the perform: {reason}."),
                vec!["Retry later or adjust the use case retry policy".to_string()],
            ),
            PerformError::Cancelled => ("The caller cancelled the perform.".to_string(), vec![]),
            PerformError::Unexpected(detail) => (
                format!("Internal invariant violated.\n{detail}"),
                vec!["This is a bug in the runtime; please report it".to_string()],
            ),
        };
        ErrorReport { short, explanation, hints }
    }
}

/// User-facing error report with a stable textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub short: String,
    pub explanation: String,
    pub hints: Vec<String>,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "error: {}", self.short)?;
        write!(f, "{}", self.explanation)?;
        for hint in &self.hints {
            write!(f, "\nhint: {hint}")?;
        }
        Ok(())
    }
}

impl From<reqwest::Error> for PerformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PerformError::Network(format!("request timed out: {err}"))
        } else {
            PerformError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RequestSnapshot {
        RequestSnapshot {
            url: "https://api.example.com/v1/thing".to_string(),
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_retryable() {
        let http = PerformError::Http(HttpCallError {
            status_code: 500,
            request: snapshot(),
            response_headers: BTreeMap::new(),
            response_body: None,
        });
        assert!(http.is_retryable());
        assert!(PerformError::Network("refused".to_string()).is_retryable());

        assert!(!PerformError::Config("x".to_string()).is_retryable());
        assert!(!PerformError::InputValidation("x".to_string()).is_retryable());
        assert!(!PerformError::ResultValidation("x".to_string()).is_retryable());
        assert!(!PerformError::Cancelled.is_retryable());
        assert!(!PerformError::Unexpected("x".to_string()).is_retryable());
        assert!(!PerformError::PolicyAbort(REASON_CIRCUIT_OPEN.to_string()).is_retryable());
    }

    #[test]
    fn test_policy_abort_reason_matching() {
        let err = PerformError::PolicyAbort(REASON_CIRCUIT_OPEN.to_string());
        assert!(err.is_policy_abort(REASON_CIRCUIT_OPEN));
        assert!(!err.is_policy_abort(REASON_MAX_RETRIES));
        assert_eq!(err.to_string(), "circuit breaker is open");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(PerformError::Config("x".to_string()).kind(), ErrorKind::Config);
        assert_eq!(PerformError::Bind("x".to_string()).kind(), ErrorKind::Bind);
        assert_eq!(PerformError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_report_is_deterministic() {
        let err = PerformError::Http(HttpCallError {
            status_code: 503,
            request: snapshot(),
            response_headers: BTreeMap::new(),
            response_body: Some(serde_json::json!({"error": "overloaded"})),
        });
        let a = err.report().to_string();
        let b = err.report().to_string();
        assert_eq!(a, b);
        assert!(a.starts_with("error: HTTP error:"));
        assert!(a.contains("status 503"));
        assert!(a.contains("hint:"));
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(PerformError::Cancelled.to_string(), "cancelled");
    }
}
