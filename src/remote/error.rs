//! Remote call error types

use thiserror::Error;

/// Failure of one remote operation, classified for display and logging
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// HTTP status when the server answered
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::InvalidRequest, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::ServerError, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Decode, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unknown, message)
    }

    /// Map an HTTP status and response body to an error.
    ///
    /// The server reports failures either as `{"detail": "..."}` or as
    /// `{"error": {"message": "..."}}`; anything else is passed through.
    pub fn from_response(status: u16, body: &str) -> Self {
        let detail = extract_detail(body).unwrap_or_else(|| body.to_string());
        let err = match status {
            401 | 403 => Self::auth(format!("Authentication failed: {detail}")),
            404 => Self::not_found(format!("Not found: {detail}")),
            400 | 422 => Self::invalid_request(format!("Invalid request: {detail}")),
            500..=599 => Self::server_error(format!("Server error: {detail}")),
            _ => Self::unknown(format!("HTTP {status}: {detail}")),
        };
        err.with_status(status)
    }
}

fn extract_detail(body: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(detail) = parsed.get("detail").and_then(|d| d.as_str()) {
        return Some(detail.to_string());
    }
    parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Connection refused, timeout, broken body
    Network,
    /// Missing or rejected `X-User-ID` (401, 403)
    Auth,
    /// Unknown message or user (404)
    NotFound,
    /// Validation failure (400, 422)
    InvalidRequest,
    /// 5xx
    ServerError,
    /// Response body did not match the expected shape
    Decode,
    Unknown,
}

impl RemoteErrorKind {
    /// Whether trying again later could succeed. The engine never retries on
    /// its own; this only feeds logs and the UI.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_reads_fastapi_detail() {
        let err = RemoteError::from_response(404, r#"{"detail":"message not found"}"#);
        assert_eq!(err.kind, RemoteErrorKind::NotFound);
        assert_eq!(err.status, Some(404));
        assert!(err.message.contains("message not found"));
    }

    #[test]
    fn test_from_response_reads_structured_error() {
        let body = r#"{"error":{"code":"VAL_001","message":"text is empty"}}"#;
        let err = RemoteError::from_response(422, body);
        assert_eq!(err.kind, RemoteErrorKind::InvalidRequest);
        assert!(err.message.contains("text is empty"));
    }

    #[test]
    fn test_from_response_passes_through_plain_body() {
        let err = RemoteError::from_response(502, "bad gateway");
        assert_eq!(err.kind, RemoteErrorKind::ServerError);
        assert!(err.kind.is_transient());
        assert!(err.message.ends_with("bad gateway"));
    }

    #[test]
    fn test_auth_is_not_transient() {
        let err = RemoteError::from_response(401, "{}");
        assert_eq!(err.kind, RemoteErrorKind::Auth);
        assert!(!err.kind.is_transient());
    }
}
