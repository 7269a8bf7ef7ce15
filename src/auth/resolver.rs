//! Credential resolution: one tap or scan in, one [`AuthResult`] out.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::credential::{card_uid_from_tag, mask, parse_qr, QrContent, RawCredential};
use super::result::{AuthResult, InvalidReason, LegacyQrRef, QrTokenKind};
use crate::api::envelope::{
    field_string, normalize_login, normalize_validation, unwrap_record, ValidationEnvelope,
};
use crate::api::metrics::record_auth_outcome;
use crate::api::{BackendError, HospitalBackend};
use crate::session::SessionStore;

/// Validation types that mean the token was consumed
const USED_TOKEN_TYPES: &[&str] = &["token_used", "used"];

pub struct CredentialResolver {
    backend: Arc<dyn HospitalBackend>,
    sessions: Arc<SessionStore>,
    timeout: Duration,
}

impl CredentialResolver {
    pub fn new(backend: Arc<dyn HospitalBackend>, sessions: Arc<SessionStore>, timeout: Duration) -> Self {
        Self {
            backend,
            sessions,
            timeout,
        }
    }

    /// Resolve a credential. Never fails: every error becomes a tagged result.
    pub async fn resolve(&self, credential: &RawCredential) -> AuthResult {
        let result = match credential {
            RawCredential::Tag(tag) => self.resolve_card(tag).await,
            RawCredential::Code(scanned) => self.resolve_code(scanned).await,
        };

        record_auth_outcome(result.kind());
        info!(
            credential = credential.kind(),
            outcome = result.kind(),
            "Credential resolved"
        );
        result
    }

    /// Bound a backend call by the configured timeout
    async fn call<F>(&self, request: F) -> Result<Value, BackendError>
    where
        F: Future<Output = Result<Value, BackendError>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    async fn resolve_card(&self, tag: &Value) -> AuthResult {
        let uid = match card_uid_from_tag(tag) {
            Ok(uid) => uid,
            Err(reason) => return AuthResult::invalid(reason),
        };
        debug!(card = %mask(&uid), "Authenticating card");

        let body = match self.call(self.backend.authenticate_card(&uid)).await {
            Ok(body) => body,
            Err(e) => return from_backend_error(e),
        };

        match normalize_login(&body) {
            Ok(login) => AuthResult::Authenticated {
                token: login.token,
                user: login.user,
            },
            Err(e) => from_backend_error(e),
        }
    }

    async fn resolve_code(&self, scanned: &str) -> AuthResult {
        match parse_qr(scanned) {
            Ok(QrContent::Legacy(reference)) => self.resolve_legacy(reference).await,
            Ok(QrContent::Token(token)) => self.resolve_token(&token).await,
            Err(reason) => AuthResult::invalid(reason),
        }
    }

    async fn resolve_legacy(&self, reference: LegacyQrRef) -> AuthResult {
        debug!(id = %reference.id, field = %reference.field, "Fetching legacy record");
        let record = self
            .call(self.backend.fetch_legacy_record(&reference))
            .await
            .and_then(|body| unwrap_record(&body));

        match record {
            Ok(record) => AuthResult::LegacyRecord { reference, record },
            Err(e) => from_backend_error(e),
        }
    }

    async fn resolve_token(&self, token: &str) -> AuthResult {
        debug!(token = %mask(token), "Validating QR token");
        let bearer = self.sessions.bearer_token().await;

        let body = match self
            .call(self.backend.validate_qr_token(token, bearer.as_deref()))
            .await
        {
            Ok(body) => body,
            Err(e) => return from_backend_error(e),
        };

        let validation = match normalize_validation(&body) {
            Ok(validation) => validation,
            Err(e) => return from_backend_error(e),
        };

        if validation.is_used || USED_TOKEN_TYPES.contains(&validation.token_type.as_str()) {
            return AuthResult::TokenUsed;
        }

        match QrTokenKind::parse(&validation.token_type) {
            Some(QrTokenKind::PatientAssignment) => {
                let device_mac = match self.sessions.device_mac().await {
                    Ok(mac) => mac,
                    Err(e) => {
                        warn!(error = %e, "Could not read device binding");
                        None
                    }
                };
                match device_mac {
                    Some(mac) => self.assign(&mac, token, bearer.as_deref(), validation).await,
                    None => {
                        debug!("No device bound, skipping patient assignment");
                        AuthResult::TokenValidated {
                            token_kind: QrTokenKind::PatientAssignment,
                            patient_id: validation.patient_id,
                            payload: validation.payload,
                        }
                    }
                }
            }
            Some(kind) => AuthResult::TokenValidated {
                token_kind: kind,
                patient_id: validation.patient_id,
                payload: validation.payload,
            },
            None => AuthResult::invalid(InvalidReason::UnsupportedTokenType {
                token_type: validation.token_type,
            }),
        }
    }

    async fn assign(
        &self,
        device_mac: &str,
        token: &str,
        bearer: Option<&str>,
        validation: ValidationEnvelope,
    ) -> AuthResult {
        let assigned = self
            .call(self.backend.assign_patient_to_device(device_mac, token, bearer))
            .await
            .and_then(|body| unwrap_record(&body));

        match assigned {
            Ok(answer) => {
                let patient_id = validation
                    .patient_id
                    .or_else(|| field_string(&answer, &["patient_id", "patientId", "PatientID"]));
                match patient_id {
                    Some(patient_id) => {
                        info!(device_mac, patient_id = %patient_id, "Patient assigned to device");
                        AuthResult::AssignmentSucceeded {
                            patient_id,
                            payload: validation.payload,
                        }
                    }
                    None => AuthResult::TokenValidated {
                        token_kind: QrTokenKind::PatientAssignment,
                        patient_id: None,
                        payload: validation.payload,
                    },
                }
            }
            Err(BackendError::TokenAlreadyUsed) => AuthResult::TokenUsed,
            Err(e) => {
                warn!(device_mac, error = %e, "Patient assignment failed");
                AuthResult::AssignmentFailed {
                    patient_id: validation.patient_id,
                    reason: e.to_string(),
                    payload: validation.payload,
                }
            }
        }
    }
}

/// Fold a backend failure into a result: used-token signal, transport-level
/// trouble, a refusal of the credential, or an answer we could not read.
fn from_backend_error(e: BackendError) -> AuthResult {
    if matches!(e, BackendError::TokenAlreadyUsed) {
        return AuthResult::TokenUsed;
    }
    if e.is_retryable() {
        return AuthResult::NetworkError {
            detail: e.to_string(),
        };
    }
    if e.is_rejection() {
        let reason = match e {
            BackendError::Status { status, message } => InvalidReason::Rejected {
                status: Some(status),
                message,
            },
            BackendError::Rejected(message) => InvalidReason::Rejected {
                status: None,
                message: Some(message),
            },
            BackendError::InvalidRequest(detail) => InvalidReason::UnrecognizedCode { detail },
            other => InvalidReason::Rejected {
                status: other.status(),
                message: None,
            },
        };
        return AuthResult::invalid(reason);
    }
    let detail = match e {
        BackendError::MalformedResponse(detail) => detail,
        other => other.to_string(),
    };
    AuthResult::invalid(InvalidReason::MalformedResponse { detail })
}
