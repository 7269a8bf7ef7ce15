use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::user::UserRecord;

/// Reference carried by legacy QR codes: `{"id", "field", "itemId"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyQrRef {
    pub id: String,
    pub field: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QrTokenKind {
    PatientAssignment,
    PrescriptionInfo,
}

impl QrTokenKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "patient_assignment" => Some(QrTokenKind::PatientAssignment),
            "prescription_info" => Some(QrTokenKind::PrescriptionInfo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InvalidReason {
    /// Nothing was read
    Empty,
    /// Card UID that is not hex of a plausible length
    MalformedCardUid { detail: String },
    /// Scanned code that is neither legacy JSON nor a usable token
    UnrecognizedCode { detail: String },
    /// Validation answer with a token type this kiosk does not handle
    UnsupportedTokenType { token_type: String },
    /// The backend refused the credential
    Rejected {
        status: Option<u16>,
        message: Option<String>,
    },
    /// The backend answered 2xx with a body of unknown shape
    MalformedResponse { detail: String },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Empty => write!(f, "nothing was read"),
            InvalidReason::MalformedCardUid { detail } => write!(f, "unreadable card: {}", detail),
            InvalidReason::UnrecognizedCode { detail } => write!(f, "unrecognized code: {}", detail),
            InvalidReason::UnsupportedTokenType { token_type } => {
                write!(f, "unsupported code type '{}'", token_type)
            }
            InvalidReason::Rejected { status, message } => {
                let message = message.as_deref().unwrap_or("credential not accepted");
                match status {
                    Some(status) => write!(f, "{} ({})", message, status),
                    None => write!(f, "{}", message),
                }
            }
            InvalidReason::MalformedResponse { detail } => {
                write!(f, "unexpected backend answer: {}", detail)
            }
        }
    }
}

/// Outcome of resolving one credential. Every input produces exactly one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthResult {
    Authenticated {
        token: String,
        user: UserRecord,
    },
    TokenUsed,
    Invalid {
        reason: InvalidReason,
    },
    NetworkError {
        detail: String,
    },
    TokenValidated {
        token_kind: QrTokenKind,
        patient_id: Option<String>,
        payload: Value,
    },
    AssignmentSucceeded {
        patient_id: String,
        payload: Value,
    },
    AssignmentFailed {
        patient_id: Option<String>,
        reason: String,
        payload: Value,
    },
    LegacyRecord {
        reference: LegacyQrRef,
        record: Value,
    },
}

impl AuthResult {
    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthResult::Authenticated { .. } => "authenticated",
            AuthResult::TokenUsed => "token_used",
            AuthResult::Invalid { .. } => "invalid",
            AuthResult::NetworkError { .. } => "network_error",
            AuthResult::TokenValidated { .. } => "token_validated",
            AuthResult::AssignmentSucceeded { .. } => "assignment_succeeded",
            AuthResult::AssignmentFailed { .. } => "assignment_failed",
            AuthResult::LegacyRecord { .. } => "legacy_record",
        }
    }

    /// Only transport-level failures are worth resolving again
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthResult::NetworkError { .. })
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        AuthResult::Invalid { reason }
    }
}
