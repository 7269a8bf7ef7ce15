//! Maps a resolved credential to the next screen.
//!
//! [`Navigator::decide`] is pure and total: every `AuthResult` gets exactly
//! one decision, and staying on the scan screen is always expressed with a
//! notice so the user sees why nothing happened.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::auth::access::{landing_for, Landing};
use crate::auth::result::{AuthResult, LegacyQrRef, QrTokenKind};
use crate::auth::user::UserRecord;
use crate::config::GateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    /// Stay on the scan screen
    Scan,
    PatientSelfView,
    StaffLanding,
    PatientDetail,
    RecordDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Choices offered on the staff landing screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffAction {
    ViewDevicePatient,
    AddPatient,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NavParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_kind: Option<QrTokenKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<LegacyQrRef>,
    /// Backend payload handed to the next screen untouched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub staff_actions: Vec<StaffAction>,
}

/// Automatic re-resolution of the same credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPlan {
    #[serde(with = "duration_ms")]
    pub delay: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationDecision {
    pub target: Screen,
    pub params: NavParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPlan>,
}

impl NavigationDecision {
    fn go(target: Screen, params: NavParams) -> Self {
        Self {
            target,
            params,
            notice: None,
            retry: None,
        }
    }

    fn stay(notice: Notice) -> Self {
        Self {
            target: Screen::Scan,
            params: NavParams::default(),
            notice: Some(notice),
            retry: None,
        }
    }

    /// The scan screen stays up, so the gate has to re-arm
    pub fn stays(&self) -> bool {
        self.target == Screen::Scan
    }
}

#[derive(Debug, Clone)]
pub struct Navigator {
    retry: RetryPlan,
}

impl Navigator {
    pub fn new(gate: &GateConfig) -> Self {
        Self {
            retry: RetryPlan {
                delay: gate.network_retry_delay(),
                max_attempts: gate.max_network_retries,
            },
        }
    }

    pub fn decide(&self, result: &AuthResult) -> NavigationDecision {
        match result {
            AuthResult::Authenticated { user, .. } => match landing_for(&user.role) {
                Landing::PatientSelfView => NavigationDecision::go(
                    Screen::PatientSelfView,
                    NavParams {
                        patient_id: user.own_patient_id().map(str::to_string),
                        user: Some(user.clone()),
                        ..Default::default()
                    },
                ),
                Landing::StaffLanding => NavigationDecision::go(
                    Screen::StaffLanding,
                    NavParams {
                        user: Some(user.clone()),
                        staff_actions: vec![StaffAction::ViewDevicePatient, StaffAction::AddPatient],
                        ..Default::default()
                    },
                ),
                Landing::Denied => NavigationDecision::stay(Notice::error(format!(
                    "Access denied for role '{}'",
                    user.role
                ))),
            },

            AuthResult::TokenUsed => {
                NavigationDecision::stay(Notice::warning("This code has already been used"))
            }

            AuthResult::Invalid { reason } => {
                NavigationDecision::stay(Notice::warning(format!("Invalid card or code: {}", reason)))
            }

            AuthResult::NetworkError { detail } => {
                let mut decision = NavigationDecision::stay(Notice::error(format!(
                    "Cannot reach the hospital system: {}",
                    detail
                )));
                if self.retry.max_attempts > 0 {
                    decision.retry = Some(self.retry);
                }
                decision
            }

            AuthResult::TokenValidated {
                token_kind,
                patient_id: Some(patient_id),
                payload,
            } => NavigationDecision::go(
                Screen::PatientDetail,
                NavParams {
                    patient_id: Some(patient_id.clone()),
                    token_kind: Some(token_kind.clone()),
                    payload: Some(payload.clone()),
                    ..Default::default()
                },
            ),

            AuthResult::TokenValidated {
                patient_id: None, ..
            } => NavigationDecision::stay(Notice::warning("This code is not linked to a patient")),

            AuthResult::AssignmentSucceeded {
                patient_id,
                payload,
            } => NavigationDecision::go(
                Screen::PatientDetail,
                NavParams {
                    patient_id: Some(patient_id.clone()),
                    token_kind: Some(QrTokenKind::PatientAssignment),
                    payload: Some(payload.clone()),
                    ..Default::default()
                },
            ),

            AuthResult::AssignmentFailed {
                patient_id,
                reason,
                payload,
            } => {
                let mut decision = NavigationDecision::stay(Notice::warning(format!(
                    "Patient could not be assigned to this device: {}",
                    reason
                )));
                decision.params = NavParams {
                    patient_id: patient_id.clone(),
                    token_kind: Some(QrTokenKind::PatientAssignment),
                    payload: Some(payload.clone()),
                    ..Default::default()
                };
                decision
            }

            AuthResult::LegacyRecord { reference, record } => NavigationDecision::go(
                Screen::RecordDetail,
                NavParams {
                    patient_id: Some(reference.id.clone()),
                    reference: Some(reference.clone()),
                    payload: Some(record.clone()),
                    ..Default::default()
                },
            ),
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
