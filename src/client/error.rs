//! Errors returned by the Google Workspace API client.

use serde::Deserialize;
use thiserror::Error;

/// An error returned by a Google API call or by the transport beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The API answered with a non-success HTTP status.
    #[error("googleapi: Error {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Message from the Google error envelope.
        message: String,
        /// First `errors[].reason` from the envelope, such as `notFound` or `duplicate`.
        reason: Option<String>,
    },

    /// A conditional fetch matched the supplied `If-None-Match` tag (HTTP 304).
    #[error("googleapi: got HTTP response code 304 (not modified)")]
    NotModified,

    /// The request never produced an HTTP response.
    #[error("request failed: {0}")]
    Transport(String),

    /// An access token could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

impl ApiError {
    /// Build a status error from a code and message.
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
            reason: None,
        }
    }

    /// Build an error from a non-success response, parsing the Google error
    /// envelope (`{"error": {"code", "message", "errors": [{"reason"}]}}`)
    /// when present.
    pub fn from_response(code: u16, body: &[u8]) -> Self {
        if code == 304 {
            return Self::NotModified;
        }

        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) => Self::Status {
                code,
                message: envelope.error.message,
                reason: envelope
                    .error
                    .errors
                    .into_iter()
                    .find_map(|item| item.reason),
            },
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                let message = if text.is_empty() {
                    format!("HTTP {}", code)
                } else {
                    text
                };
                Self::http(code, message)
            }
        }
    }

    /// The HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::NotModified => Some(304),
            _ => None,
        }
    }

    /// Whether the remote object could not be located.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether a conditional fetch reported no change.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }

    /// Whether the call may succeed if simply repeated (rate limiting,
    /// server-side failures, dropped connections).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { code, .. } => matches!(code, 429 | 500 | 502 | 503 | 504),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_parses_envelope() {
        let body = br#"{
            "error": {
                "code": 404,
                "message": "Resource Not Found: userKey",
                "errors": [
                    {
                        "message": "Resource Not Found: userKey",
                        "domain": "global",
                        "reason": "notFound"
                    }
                ]
            }
        }"#;

        let err = ApiError::from_response(404, body);
        assert_eq!(
            err,
            ApiError::Status {
                code: 404,
                message: "Resource Not Found: userKey".to_string(),
                reason: Some("notFound".to_string()),
            }
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "googleapi: Error 404: Resource Not Found: userKey");
    }

    #[test]
    fn test_from_response_plain_body() {
        let err = ApiError::from_response(502, b"Bad Gateway");
        assert_eq!(err, ApiError::http(502, "Bad Gateway"));
        assert!(err.is_retryable());

        let err = ApiError::from_response(500, b"");
        assert_eq!(err, ApiError::http(500, "HTTP 500"));
    }

    #[test]
    fn test_not_modified() {
        let err = ApiError::from_response(304, b"");
        assert!(err.is_not_modified());
        assert_eq!(err.status(), Some(304));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(ApiError::http(429, "rate").is_retryable());
        assert!(ApiError::http(503, "unavailable").is_retryable());
        assert!(ApiError::Transport("connection reset".into()).is_retryable());
        assert!(!ApiError::http(400, "bad").is_retryable());
        assert!(!ApiError::http(404, "missing").is_retryable());
        assert!(!ApiError::Auth("denied".into()).is_retryable());
    }
}
