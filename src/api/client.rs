//! reqwest implementation of [`HospitalBackend`].

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Url};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

use super::error::BackendError;
use super::metrics::record_backend_request;
use super::HospitalBackend;
use crate::auth::result::LegacyQrRef;
use crate::config::BackendConfig;
use crate::records::Resource;

const USER_AGENT: &str = concat!("medscreen/", env!("CARGO_PKG_VERSION"));

/// Endpoints whose error answers may report a consumed QR token
const TOKEN_ENDPOINTS: &[&str] = &["qr_validate", "device_assign"];

/// HTTP client for the hospital API.
///
/// Path parameters (tokens, MACs, legacy ids) are appended as encoded path
/// segments, never formatted into the URL string.
pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| BackendError::InvalidRequest(format!("invalid base URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::InvalidRequest(format!(
                "base URL cannot carry a path: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { base, client })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidRequest("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request and decode the JSON body of a 2xx answer.
    async fn send(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
        bearer: Option<&str>,
    ) -> Result<Value, BackendError> {
        let request = match bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let start = Instant::now();
        let response = match request.header(ACCEPT, "application/json").send().await {
            Ok(response) => response,
            Err(e) => {
                let err = BackendError::from(e);
                let outcome = if matches!(err, BackendError::Timeout) {
                    "timeout"
                } else {
                    "transport"
                };
                record_backend_request(endpoint, outcome.to_string(), start.elapsed());
                warn!(endpoint, error = %err, "Backend request failed");
                return Err(err);
            }
        };

        let status = response.status();
        let body = response.text().await?;
        record_backend_request(endpoint, status.as_u16().to_string(), start.elapsed());

        if !status.is_success() {
            debug!(endpoint, status = status.as_u16(), "Backend answered with an error status");
            return Err(if TOKEN_ENDPOINTS.contains(&endpoint) {
                BackendError::from_token_status(status, &body)
            } else {
                BackendError::from_status(status, &body)
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body)
            .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON from {}: {}", endpoint, e)))
    }
}

#[async_trait]
impl HospitalBackend for HttpBackend {
    async fn authenticate_card(&self, card_uid: &str) -> Result<Value, BackendError> {
        let url = self.endpoint(&["nfc-cards", "authenticate"])?;
        let request = self.client.post(url).json(&json!({ "card_uid": card_uid }));
        self.send("nfc_authenticate", request, None).await
    }

    async fn validate_qr_token(&self, token: &str, bearer: Option<&str>) -> Result<Value, BackendError> {
        let url = self.endpoint(&["qr-tokens", token, "validate"])?;
        self.send("qr_validate", self.client.get(url), bearer).await
    }

    async fn assign_patient_to_device(
        &self,
        device_mac: &str,
        token: &str,
        bearer: Option<&str>,
    ) -> Result<Value, BackendError> {
        let url = self.endpoint(&["devices", device_mac, "scan-patient-qr"])?;
        let request = self.client.post(url).json(&json!({ "token": token }));
        self.send("device_assign", request, bearer).await
    }

    async fn fetch_legacy_record(&self, reference: &LegacyQrRef) -> Result<Value, BackendError> {
        let url = self.endpoint(&[
            "users",
            &reference.id,
            "patientinfo",
            &reference.field,
            &reference.item_id,
        ])?;
        self.send("legacy_record", self.client.get(url), None).await
    }

    async fn list_resource(
        &self,
        resource: Resource,
        patient_id: Option<&str>,
        bearer: &str,
    ) -> Result<Value, BackendError> {
        let mut url = self.endpoint(&[resource.path()])?;
        if let Some(patient_id) = patient_id {
            url.query_pairs_mut().append_pair("patient_id", patient_id);
        }
        self.send("list_resource", self.client.get(url), Some(bearer)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn authenticate(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if body["card_uid"] == "04A1B2C3" {
            (
                StatusCode::OK,
                Json(json!({"success": true, "data": {"token": "t1", "user": {"id": "P1", "role": "patient"}}})),
            )
        } else if body["card_uid"] == "0409C0DE" {
            (
                StatusCode::CONFLICT,
                Json(json!({"success": false, "message": "session token conflict"})),
            )
        } else {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"success": false, "message": "card not registered"})),
            )
        }
    }

    async fn validate(Path(token): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        match token.as_str() {
            "USED" => (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": "Validation failed", "error": "token has already been used"})),
            ),
            "a b" => (StatusCode::OK, Json(json!({"data": {"type": "prescription_info", "echo": token.clone()}}))),
            _ => (
                StatusCode::OK,
                Json(json!({"success": true, "data": {"type": "patient_assignment", "patient_id": 7, "bearer": bearer}})),
            ),
        }
    }

    async fn assign(Path(mac): Path<String>, Json(body): Json<Value>) -> Json<Value> {
        Json(json!({"success": true, "data": {"mac": mac, "token": body["token"]}}))
    }

    async fn legacy(Path((id, field, item)): Path<(String, String, String)>) -> Json<Value> {
        Json(json!({"data": {"id": id, "field": field, "item": item}}))
    }

    async fn appointments(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        Json(json!({"data": [{"id": 1, "patient_id": query.get("patient_id")}]}))
    }

    async fn slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Json(json!({"data": []}))
    }

    async fn spawn_backend() -> SocketAddr {
        let app = Router::new()
            .route("/api/v1/nfc-cards/authenticate", post(authenticate))
            .route("/api/v1/qr-tokens/:token/validate", get(validate))
            .route("/api/v1/devices/:mac/scan-patient-qr", post(assign))
            .route("/api/v1/users/:id/patientinfo/:field/:item", get(legacy))
            .route("/api/v1/appointments", get(appointments))
            .route("/api/v1/diagnoses", get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }))
            .route("/api/v1/allergies", get(slow))
            .route("/api/v1/vital-signs", get(|| async { "<html>oops</html>" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn backend_for(addr: SocketAddr, timeout_secs: u64) -> HttpBackend {
        HttpBackend::new(&BackendConfig {
            base_url: format!("http://{}/api/v1", addr),
            timeout_secs,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_card() {
        let backend = backend_for(spawn_backend().await, 5);

        let body = backend.authenticate_card("04A1B2C3").await.unwrap();
        assert_eq!(body["data"]["token"], "t1");

        let err = backend.authenticate_card("DEADBEEF").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_card_conflict_is_not_a_used_token() {
        let backend = backend_for(spawn_backend().await, 5);
        let err = backend.authenticate_card("0409C0DE").await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_validate_sends_bearer_and_detects_used_token() {
        let backend = backend_for(spawn_backend().await, 5);

        let body = backend.validate_qr_token("OK1", Some("t1")).await.unwrap();
        assert_eq!(body["data"]["bearer"], "Bearer t1");

        let err = backend.validate_qr_token("USED", None).await.unwrap_err();
        assert!(matches!(err, BackendError::TokenAlreadyUsed));
    }

    #[tokio::test]
    async fn test_path_segments_are_encoded() {
        let backend = backend_for(spawn_backend().await, 5);
        let body = backend.validate_qr_token("a b", None).await.unwrap();
        assert_eq!(body["data"]["echo"], "a b");
    }

    #[tokio::test]
    async fn test_assign_and_legacy() {
        let backend = backend_for(spawn_backend().await, 5);

        let body = backend
            .assign_patient_to_device("AA:BB:CC:DD:EE:FF", "OK1", Some("t1"))
            .await
            .unwrap();
        assert_eq!(body["data"]["mac"], "AA:BB:CC:DD:EE:FF");
        assert_eq!(body["data"]["token"], "OK1");

        let reference = LegacyQrRef {
            id: "H0001".to_string(),
            field: "tetkik".to_string(),
            item_id: "5".to_string(),
        };
        let body = backend.fetch_legacy_record(&reference).await.unwrap();
        assert_eq!(body["data"], json!({"id": "H0001", "field": "tetkik", "item": "5"}));
    }

    #[tokio::test]
    async fn test_list_resource_passes_patient_filter() {
        let backend = backend_for(spawn_backend().await, 5);
        let body = backend
            .list_resource(Resource::Appointments, Some("P1"), "t1")
            .await
            .unwrap();
        assert_eq!(body["data"][0]["patient_id"], "P1");
    }

    #[tokio::test]
    async fn test_server_error_and_non_json() {
        let backend = backend_for(spawn_backend().await, 5);

        let err = backend.list_resource(Resource::Diagnoses, None, "t1").await.unwrap_err();
        assert_eq!(err.status(), Some(502));
        assert!(err.is_retryable());

        let err = backend.list_resource(Resource::VitalSigns, None, "t1").await.unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let backend = backend_for(spawn_backend().await, 1);
        let err = backend.list_resource(Resource::Allergies, None, "t1").await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = backend_for(addr, 2);
        let err = backend.authenticate_card("04A1B2C3").await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_transport_error_omits_request_url() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = backend_for(addr, 2);
        let err = backend
            .validate_qr_token("SECRETTOKEN123", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        assert!(!err.to_string().contains("SECRETTOKEN123"));
        assert!(!err.to_string().contains("qr-tokens"));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let config = BackendConfig {
            base_url: "mailto:admin@example.org".to_string(),
            timeout_secs: 1,
        };
        assert!(HttpBackend::new(&config).is_err());
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let backend = HttpBackend::new(&BackendConfig {
            base_url: "http://his.local/api/v1/".to_string(),
            timeout_secs: 1,
        })
        .unwrap();
        let url = backend.endpoint(&["qr-tokens", "X/Y", "validate"]).unwrap();
        assert_eq!(url.as_str(), "http://his.local/api/v1/qr-tokens/X%2FY/validate");
    }
}
