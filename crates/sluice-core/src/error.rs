//! Error taxonomy for the ingestion path.
//!
//! Parse errors are recovered where they happen (the line is dropped).
//! Network and HTTP errors travel up to the controller, which decides between
//! retrying and failing. Everything else is terminal.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat category tag for a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failed before or during the body (connect, reset, timeout)
    Network,
    /// Server answered with a non-success status
    Http,
    /// A single line could not be decoded
    Parse,
    /// Success status without a body to read
    MissingBody,
    /// Stopped by the consumer
    Cancelled,
    /// Retryable failures kept happening until the retry budget ran out
    RetriesExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Http => write!(f, "http"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::MissingBody => write!(f, "missing_body"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::RetriesExhausted => write!(f, "retries_exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    Network {
        message: String,
    },
    Http {
        status: u16,
        /// Raw response body, if the server sent one.
        body: Option<String>,
    },
    Parse {
        message: String,
    },
    MissingBody,
    Cancelled,
    RetriesExhausted {
        attempts: u32,
        last: Box<StreamError>,
    },
}

impl StreamError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            body: (!body.is_empty()).then(|| body.to_string()),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Network { .. } => ErrorKind::Network,
            StreamError::Http { .. } => ErrorKind::Http,
            StreamError::Parse { .. } => ErrorKind::Parse,
            StreamError::MissingBody => ErrorKind::MissingBody,
            StreamError::Cancelled => ErrorKind::Cancelled,
            StreamError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }

    /// Network errors, 5xx and 429 may be retried. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Network { .. } => true,
            StreamError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Extracts `error.message` from a JSON error body, when there is one.
    fn body_message(body: &str) -> Option<String> {
        let json = serde_json::from_str::<Value>(body).ok()?;
        json.get("error")?
            .get("message")?
            .as_str()
            .map(ToString::to_string)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Network { message } => write!(f, "Network error: {message}"),
            StreamError::Http { status, body } => {
                match body.as_deref().and_then(Self::body_message) {
                    Some(msg) => write!(f, "HTTP {status}: {msg}"),
                    None => write!(f, "HTTP {status}"),
                }
            }
            StreamError::Parse { message } => write!(f, "Parse error: {message}"),
            StreamError::MissingBody => write!(f, "Response body is missing"),
            StreamError::Cancelled => write!(f, "Cancelled"),
            StreamError::RetriesExhausted { attempts, last } => {
                write!(f, "Gave up after {attempts} retries: {last}")
            }
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(StreamError::http_status(500, "").is_retryable());
        assert!(StreamError::http_status(503, "").is_retryable());
        assert!(StreamError::http_status(429, "").is_retryable());
        assert!(!StreamError::http_status(400, "").is_retryable());
        assert!(!StreamError::http_status(404, "").is_retryable());
        assert!(StreamError::network("reset").is_retryable());
        assert!(!StreamError::MissingBody.is_retryable());
        assert!(!StreamError::parse("bad").is_retryable());
    }

    #[test]
    fn test_http_display_prefers_json_message() {
        let err = StreamError::http_status(401, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(err.to_string(), "HTTP 401: bad key");

        let err = StreamError::http_status(502, "upstream down");
        assert_eq!(err.to_string(), "HTTP 502");
        assert_eq!(err.kind(), ErrorKind::Http);
    }

    #[test]
    fn test_exhausted_exposes_last_error() {
        let err = StreamError::RetriesExhausted {
            attempts: 3,
            last: Box::new(StreamError::http_status(503, "")),
        };
        assert_eq!(err.to_string(), "Gave up after 3 retries: HTTP 503");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_retryable());
    }
}
