//! Authenticated record lists (appointments, diagnoses, ...) for one patient.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::envelope::{scalar_string, unwrap_collection};
use crate::api::{BackendError, HospitalBackend};
use crate::auth::access::{can_read_patient, readable_resources};
use crate::session::{SessionError, SessionStore};

/// Record collections exposed by the backend
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Appointments,
    Diagnoses,
    Prescriptions,
    MedicalTests,
    MedicalHistory,
    SurgeryHistory,
    Allergies,
    VitalSigns,
}

impl Resource {
    pub const ALL: [Resource; 8] = [
        Resource::Appointments,
        Resource::Diagnoses,
        Resource::Prescriptions,
        Resource::MedicalTests,
        Resource::MedicalHistory,
        Resource::SurgeryHistory,
        Resource::Allergies,
        Resource::VitalSigns,
    ];

    /// Path segment under the API base
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Appointments => "appointments",
            Resource::Diagnoses => "diagnoses",
            Resource::Prescriptions => "prescriptions",
            Resource::MedicalTests => "medical-tests",
            Resource::MedicalHistory => "medical-history",
            Resource::SurgeryHistory => "surgery-history",
            Resource::Allergies => "allergies",
            Resource::VitalSigns => "vital-signs",
        }
    }
}

/// Keys a record may use for its patient foreign key
const PATIENT_KEYS: &[&str] = &["patient_id", "hasta_kodu", "PatientID", "patientId"];

/// Whether a record belongs to `patient_id`, comparing "17" and 17 alike.
/// Records without a recognizable patient key are excluded.
pub fn belongs_to_patient(item: &Value, patient_id: &str) -> bool {
    let direct = PATIENT_KEYS
        .iter()
        .filter_map(|key| item.get(*key))
        .filter_map(scalar_string)
        .any(|id| id == patient_id);
    if direct {
        return true;
    }
    item.get("patient")
        .and_then(|p| p.get("id"))
        .and_then(scalar_string)
        .map(|id| id == patient_id)
        .unwrap_or(false)
}

#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("No active session; scan a card first")]
    NoSession,

    #[error("Role '{role}' may not read {resource} for patient {patient_id}")]
    Forbidden {
        role: String,
        resource: &'static str,
        patient_id: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// One resource in an overview
#[derive(Debug, Clone, Serialize)]
pub struct ResourceOutcome {
    pub resource: Resource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatientOverview {
    pub patient_id: String,
    pub resources: Vec<ResourceOutcome>,
}

pub struct RecordsClient {
    backend: Arc<dyn HospitalBackend>,
    sessions: Arc<SessionStore>,
}

impl RecordsClient {
    pub fn new(backend: Arc<dyn HospitalBackend>, sessions: Arc<SessionStore>) -> Self {
        Self { backend, sessions }
    }

    pub async fn fetch_for_patient(
        &self,
        resource: Resource,
        patient_id: &str,
    ) -> Result<Vec<Value>, RecordsError> {
        let session = self.sessions.load().await?.ok_or(RecordsError::NoSession)?;

        if !can_read_patient(&session.user, resource, patient_id) {
            return Err(RecordsError::Forbidden {
                role: session.user.role.to_string(),
                resource: resource.path(),
                patient_id: patient_id.to_string(),
            });
        }

        let body = self
            .backend
            .list_resource(resource, Some(patient_id), &session.token)
            .await?;
        let items = unwrap_collection(&body)?;
        let total = items.len();

        let filtered: Vec<Value> = items
            .into_iter()
            .filter(|item| belongs_to_patient(item, patient_id))
            .collect();

        debug!(
            resource = resource.path(),
            total,
            kept = filtered.len(),
            "Fetched patient records"
        );
        Ok(filtered)
    }

    /// Every resource the session's role may read, fetched concurrently.
    /// Failures are reported per resource.
    pub async fn overview(&self, patient_id: &str) -> Result<PatientOverview, RecordsError> {
        let session = self.sessions.load().await?.ok_or(RecordsError::NoSession)?;

        let resources: Vec<Resource> = readable_resources(&session.user.role)
            .into_iter()
            .filter(|r| can_read_patient(&session.user, *r, patient_id))
            .collect();

        if resources.is_empty() {
            return Err(RecordsError::Forbidden {
                role: session.user.role.to_string(),
                resource: "records",
                patient_id: patient_id.to_string(),
            });
        }

        let fetches = resources.iter().map(|resource| async move {
            let result = self.fetch_for_patient(*resource, patient_id).await;
            match result {
                Ok(items) => ResourceOutcome {
                    resource: *resource,
                    items: Some(items),
                    error: None,
                },
                Err(e) => {
                    warn!(resource = resource.path(), error = %e, "Failed to fetch records");
                    ResourceOutcome {
                        resource: *resource,
                        items: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        Ok(PatientOverview {
            patient_id: patient_id.to_string(),
            resources: join_all(fetches).await,
        })
    }
}
