//! Access to the hospital backend.
//!
//! [`HospitalBackend`] is the seam the resolver and the records client talk
//! through. Methods return the decoded JSON body; shape normalization lives
//! in [`envelope`] so a fake backend only has to produce JSON.

mod client;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod validation;

pub use client::HttpBackend;
pub use error::BackendError;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::result::LegacyQrRef;
use crate::records::Resource;

#[async_trait]
pub trait HospitalBackend: Send + Sync {
    /// `POST /nfc-cards/authenticate`
    async fn authenticate_card(&self, card_uid: &str) -> Result<Value, BackendError>;

    /// `GET /qr-tokens/{token}/validate`
    async fn validate_qr_token(&self, token: &str, bearer: Option<&str>) -> Result<Value, BackendError>;

    /// `POST /devices/{mac}/scan-patient-qr`
    async fn assign_patient_to_device(
        &self,
        device_mac: &str,
        token: &str,
        bearer: Option<&str>,
    ) -> Result<Value, BackendError>;

    /// `GET /users/{id}/patientinfo/{field}/{itemId}`
    async fn fetch_legacy_record(&self, reference: &LegacyQrRef) -> Result<Value, BackendError>;

    /// `GET /{resource}?patient_id=`
    async fn list_resource(
        &self,
        resource: Resource,
        patient_id: Option<&str>,
        bearer: &str,
    ) -> Result<Value, BackendError>;
}
