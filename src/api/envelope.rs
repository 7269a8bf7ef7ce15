//! Response-shape normalization.
//!
//! The backend wraps payloads in `{success, message, data, error}`, but the
//! nesting differs between revisions (`data.token` vs `token` vs
//! `data.data.token`, `user` vs `personel`). Every known path is listed here
//! in priority order and nothing outside this module reads raw bodies.

use serde_json::Value;

use super::error::BackendError;
use crate::auth::user::{UserRecord, UserSource};

/// Where a login token may sit, highest priority first
pub const TOKEN_PATHS: &[&[&str]] = &[&["data", "token"], &["token"], &["data", "data", "token"]];

/// Where a login user object may sit, highest priority first
pub const USER_PATHS: &[(&[&str], UserSource)] = &[
    (&["data", "user"], UserSource::User),
    (&["user"], UserSource::User),
    (&["data", "personel"], UserSource::Personnel),
    (&["personel"], UserSource::Personnel),
    (&["data", "data", "user"], UserSource::User),
];

/// Where the QR validation object may sit
pub const VALIDATION_PATHS: &[&[&str]] = &[&["data", "data"], &["data"], &[]];

/// Where a resource list may sit
pub const COLLECTION_PATHS: &[&[&str]] = &[
    &["data", "data"],
    &["data", "items"],
    &["data"],
    &["items"],
    &[],
];

const TOKEN_TYPE_KEYS: &[&str] = &["type", "token_type", "qr_type"];
const PATIENT_ID_KEYS: &[&str] = &["patient_id", "patientId", "PatientID", "hasta_kodu"];

/// Follow a key path; the empty path is the body itself.
pub fn lookup<'a>(body: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(body, |current, key| current.get(*key))
}

/// First string or number found under any of `keys`, as a string.
pub fn field_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(scalar_string)
}

/// A string or number rendered as a string. Empty strings count as absent.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `success: false` on an otherwise 2xx answer
fn check_success_flag(body: &Value) -> Result<(), BackendError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = field_string(body, &["message", "error"])
            .unwrap_or_else(|| "request was not successful".to_string());
        return Err(BackendError::Rejected(message));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoginEnvelope {
    pub token: String,
    pub user: UserRecord,
}

/// Normalize a card-login answer into token + user.
pub fn normalize_login(body: &Value) -> Result<LoginEnvelope, BackendError> {
    check_success_flag(body)?;

    let token = TOKEN_PATHS
        .iter()
        .filter_map(|path| lookup(body, path))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
        .ok_or_else(|| BackendError::MalformedResponse("login response has no token".to_string()))?
        .to_string();

    let (user_value, source) = USER_PATHS
        .iter()
        .find_map(|(path, source)| {
            lookup(body, path)
                .filter(|v| v.is_object())
                .map(|v| (v, *source))
        })
        .ok_or_else(|| {
            BackendError::MalformedResponse("login response has no user record".to_string())
        })?;

    let user = UserRecord::from_value(user_value, source).map_err(BackendError::MalformedResponse)?;

    Ok(LoginEnvelope { token, user })
}

/// A QR validation answer with the fields the flow branches on
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationEnvelope {
    pub token_type: String,
    pub patient_id: Option<String>,
    pub is_used: bool,
    /// The validation object as received
    pub payload: Value,
}

pub fn normalize_validation(body: &Value) -> Result<ValidationEnvelope, BackendError> {
    check_success_flag(body)?;

    let (payload, token_type) = VALIDATION_PATHS
        .iter()
        .filter_map(|path| lookup(body, path))
        .filter(|v| v.is_object())
        .find_map(|v| field_string(v, TOKEN_TYPE_KEYS).map(|t| (v, t)))
        .ok_or_else(|| {
            BackendError::MalformedResponse("validation response has no token type".to_string())
        })?;

    let patient_id = field_string(payload, PATIENT_ID_KEYS).or_else(|| {
        payload
            .get("patient")
            .and_then(|p| field_string(p, &["id", "patient_id"]))
    });

    Ok(ValidationEnvelope {
        token_type: token_type.to_lowercase(),
        patient_id,
        is_used: payload.get("is_used").and_then(Value::as_bool).unwrap_or(false),
        payload: payload.clone(),
    })
}

/// The payload of a single-object answer: `data` when present, else the body.
pub fn unwrap_record(body: &Value) -> Result<Value, BackendError> {
    check_success_flag(body)?;
    match body.get("data") {
        Some(Value::Null) | None => Ok(body.clone()),
        Some(data) => Ok(data.clone()),
    }
}

/// The item list of a collection answer.
pub fn unwrap_collection(body: &Value) -> Result<Vec<Value>, BackendError> {
    check_success_flag(body)?;

    // `data: null` is how some handlers say "no rows"
    if body.get("data") == Some(&Value::Null) {
        return Ok(Vec::new());
    }

    COLLECTION_PATHS
        .iter()
        .filter_map(|path| lookup(body, path))
        .find_map(|v| v.as_array().cloned())
        .ok_or_else(|| BackendError::MalformedResponse("response has no item list".to_string()))
}
