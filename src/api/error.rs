//! Failure taxonomy for calls to the hospital backend.
//!
//! Every backend call returns `Result<_, BackendError>`. The credential
//! resolver folds these into tagged `AuthResult`s, so nothing here reaches
//! the screen layer as an error.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Substring the backend puts in the message of an already-consumed QR token.
/// Kept only as a fallback for backends that do not send a structured code.
pub const TOKEN_USED_MESSAGE: &str = "token has already been used";

/// Structured code accepted as the "already used" signal
pub const TOKEN_USED_CODE: &str = "token_used";

#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, reset, TLS error
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend did not answer in time")]
    Timeout,

    /// Non-2xx answer
    #[error("Backend returned {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status {
        status: u16,
        message: Option<String>,
    },

    /// The backend reported that a single-use token was already consumed
    #[error("Token has already been used")]
    TokenAlreadyUsed,

    /// 2xx answer whose body did not have any known shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// 2xx answer carrying `success: false`
    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    /// Refused locally before anything was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Build the error for a non-2xx answer, reading the human message out of
    /// the usual `{success:false, message, error}` envelope.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        Self::status_error(status, parsed.as_ref(), body)
    }

    /// Like [`from_status`](Self::from_status), for calls that carry a QR
    /// token (validate, assign). Only those can report the token as used.
    pub fn from_token_status(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        if is_token_used_signal(status, parsed.as_ref(), body) {
            return BackendError::TokenAlreadyUsed;
        }
        Self::status_error(status, parsed.as_ref(), body)
    }

    fn status_error(status: StatusCode, parsed: Option<&Value>, body: &str) -> Self {
        let message = parsed
            .and_then(|v| {
                ["message", "error"]
                    .iter()
                    .find_map(|key| v.get(*key).and_then(Value::as_str))
                    .map(str::to_string)
            })
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
            });

        BackendError::Status {
            status: status.as_u16(),
            message,
        }
    }

    /// Worth trying again later: the request may succeed unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_) | BackendError::Timeout => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// The backend understood the request and refused the credential
    pub fn is_rejection(&self) -> bool {
        match self {
            BackendError::Status { status, .. } => (400..500).contains(status) && *status != 429,
            BackendError::Rejected(_) | BackendError::InvalidRequest(_) => true,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The request URL is dropped first: it can carry a QR token in its path.
impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        let e = e.without_url();
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::MalformedResponse(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

/// Structured signals first (409, `code`/`error_code`/`type`), then the
/// message substring older backends rely on.
fn is_token_used_signal(status: StatusCode, body: Option<&Value>, raw: &str) -> bool {
    if let Some(body) = body {
        let structured = ["code", "error_code", "type"].iter().any(|key| {
            body.get(*key).and_then(Value::as_str) == Some(TOKEN_USED_CODE)
                || body
                    .get("data")
                    .and_then(|d| d.get(*key))
                    .and_then(Value::as_str)
                    == Some(TOKEN_USED_CODE)
        });
        if structured {
            return true;
        }
    }

    if status == StatusCode::CONFLICT && raw.to_lowercase().contains("token") {
        return true;
    }

    raw.to_lowercase().contains(TOKEN_USED_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_used_from_message_substring() {
        let body = r#"{"success":false,"message":"token has already been used","error":"token has already been used"}"#;
        let err = BackendError::from_token_status(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, BackendError::TokenAlreadyUsed));
    }

    #[test]
    fn test_token_used_from_structured_code() {
        let body = r#"{"success":false,"code":"token_used","message":"Consumed"}"#;
        let err = BackendError::from_token_status(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, BackendError::TokenAlreadyUsed));
    }

    #[test]
    fn test_conflict_on_token_is_used() {
        let err = BackendError::from_token_status(StatusCode::CONFLICT, r#"{"message":"token conflict"}"#);
        assert!(matches!(err, BackendError::TokenAlreadyUsed));
    }

    #[test]
    fn test_used_token_signal_ignored_outside_token_calls() {
        let err = BackendError::from_status(StatusCode::CONFLICT, r#"{"message":"token conflict"}"#);
        match err {
            BackendError::Status { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message.as_deref(), Some("token conflict"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let body = r#"{"code":"token_used","message":"token has already been used"}"#;
        assert!(BackendError::from_status(StatusCode::BAD_REQUEST, body).is_rejection());
    }

    #[test]
    fn test_status_extracts_message() {
        let body = r#"{"success":false,"message":"Authentication failed","error":"card inactive"}"#;
        let err = BackendError::from_status(StatusCode::UNAUTHORIZED, body);
        match err {
            BackendError::Status { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message.as_deref(), Some("Authentication failed"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_plain_text_body() {
        let err = BackendError::from_status(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(err.status(), Some(502));
        assert!(err.is_retryable());
        assert!(!err.is_rejection());
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn test_classification() {
        assert!(BackendError::Timeout.is_retryable());
        assert!(BackendError::Transport("reset".into()).is_retryable());
        assert!(!BackendError::TokenAlreadyUsed.is_retryable());

        let not_found = BackendError::Status { status: 404, message: None };
        assert!(not_found.is_rejection());
        assert!(!not_found.is_retryable());

        let throttled = BackendError::Status { status: 429, message: None };
        assert!(throttled.is_retryable());
        assert!(!throttled.is_rejection());
    }
}
