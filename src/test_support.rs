//! Scripted in-process backend shared by unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::api::{BackendError, HospitalBackend};
use crate::auth::result::LegacyQrRef;
use crate::records::Resource;

/// Canned answer for one endpoint
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16, Value),
    Transport,
    /// Never answers
    Hang,
}

impl Reply {
    /// `token_call` marks the validate and assign endpoints, the only ones
    /// whose errors can report a consumed token.
    async fn resolve(self, token_call: bool) -> Result<Value, BackendError> {
        match self {
            Reply::Json(body) => Ok(body),
            Reply::Status(code, body) => {
                let status = StatusCode::from_u16(code).unwrap();
                let body = body.to_string();
                Err(if token_call {
                    BackendError::from_token_status(status, &body)
                } else {
                    BackendError::from_status(status, &body)
                })
            }
            Reply::Transport => Err(BackendError::Transport("connection refused".to_string())),
            Reply::Hang => futures::future::pending().await,
        }
    }
}

/// Recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Login(String),
    Validate {
        token: String,
        bearer: Option<String>,
    },
    Assign {
        mac: String,
        token: String,
    },
    Legacy(LegacyQrRef),
    List {
        resource: Resource,
        patient_id: Option<String>,
        bearer: String,
    },
}

pub struct ScriptedBackend {
    login: Mutex<Reply>,
    validate: Mutex<Reply>,
    assign: Mutex<Reply>,
    legacy: Mutex<Reply>,
    list: Mutex<Reply>,
    list_overrides: Mutex<HashMap<Resource, Reply>>,
    /// Applied to every call before answering
    delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    /// Every endpoint answers 404 until scripted
    pub fn new() -> Self {
        let not_found = Reply::Status(404, json!({"success": false, "message": "not found"}));
        Self {
            login: Mutex::new(not_found.clone()),
            validate: Mutex::new(not_found.clone()),
            assign: Mutex::new(not_found.clone()),
            legacy: Mutex::new(not_found.clone()),
            list: Mutex::new(not_found),
            list_overrides: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_login(&self, reply: Reply) {
        *self.login.lock() = reply;
    }

    pub fn set_validate(&self, reply: Reply) {
        *self.validate.lock() = reply;
    }

    pub fn set_assign(&self, reply: Reply) {
        *self.assign.lock() = reply;
    }

    pub fn set_legacy(&self, reply: Reply) {
        *self.legacy.lock() = reply;
    }

    pub fn set_list(&self, reply: Reply) {
        *self.list.lock() = reply;
    }

    pub fn set_list_for(&self, resource: Resource, reply: Reply) {
        self.list_overrides.lock().insert(resource, reply);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn login_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Login(_)))
            .count()
    }

    pub fn validate_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Validate { .. }))
            .count()
    }

    async fn answer(&self, call: Call, reply: Reply) -> Result<Value, BackendError> {
        let token_call = matches!(call, Call::Validate { .. } | Call::Assign { .. });
        self.calls.lock().push(call);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply.resolve(token_call).await
    }
}

#[async_trait]
impl HospitalBackend for ScriptedBackend {
    async fn authenticate_card(&self, card_uid: &str) -> Result<Value, BackendError> {
        let reply = self.login.lock().clone();
        self.answer(Call::Login(card_uid.to_string()), reply).await
    }

    async fn validate_qr_token(&self, token: &str, bearer: Option<&str>) -> Result<Value, BackendError> {
        let reply = self.validate.lock().clone();
        let call = Call::Validate {
            token: token.to_string(),
            bearer: bearer.map(str::to_string),
        };
        self.answer(call, reply).await
    }

    async fn assign_patient_to_device(
        &self,
        device_mac: &str,
        token: &str,
        _bearer: Option<&str>,
    ) -> Result<Value, BackendError> {
        let reply = self.assign.lock().clone();
        let call = Call::Assign {
            mac: device_mac.to_string(),
            token: token.to_string(),
        };
        self.answer(call, reply).await
    }

    async fn fetch_legacy_record(&self, reference: &LegacyQrRef) -> Result<Value, BackendError> {
        let reply = self.legacy.lock().clone();
        self.answer(Call::Legacy(reference.clone()), reply).await
    }

    async fn list_resource(
        &self,
        resource: Resource,
        patient_id: Option<&str>,
        bearer: &str,
    ) -> Result<Value, BackendError> {
        let reply = self
            .list_overrides
            .lock()
            .get(&resource)
            .cloned()
            .unwrap_or_else(|| self.list.lock().clone());
        let call = Call::List {
            resource,
            patient_id: patient_id.map(str::to_string),
            bearer: bearer.to_string(),
        };
        self.answer(call, reply).await
    }
}
