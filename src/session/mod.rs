//! Durable session for the authenticated kiosk user.
//!
//! The session lives under fixed keys in a [`KeyValueStore`]. Saving writes
//! all keys in one batch and a new login fully replaces the previous one.
//! The device binding shares the store but is not part of the session, so
//! logging out leaves the kiosk bound.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::validation::validate_device_mac;
use crate::auth::user::UserRecord;

/// Persistence keys
pub mod keys {
    pub const USER_TOKEN: &str = "userToken";
    pub const USER_INFO: &str = "userInfo";
    pub const DEVICE_MAC: &str = "device_mac";
    pub const PERSONEL_KOD: &str = "personel_kod";
    pub const ISSUED_AT: &str = "sessionIssuedAt";

    /// Keys that make up the user session (everything but the device binding)
    pub const SESSION: &[&str] = &[USER_TOKEN, USER_INFO, PERSONEL_KOD, ISSUED_AT];
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Stored session is corrupt: {0}")]
    Corrupt(String),

    #[error("Invalid device MAC: {0}")]
    InvalidDeviceMac(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Storage(e.to_string())
    }
}

/// Minimal string key-value persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SessionError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;

    async fn remove(&self, key: &str) -> Result<(), SessionError>;

    /// Write `set` and delete `remove` as one batch. Stores that can should
    /// apply it atomically.
    async fn apply_batch(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), SessionError> {
        for (key, value) in set {
            self.set(key, value).await?;
        }
        for key in remove {
            self.remove(key).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    pub user: UserRecord,
    pub issued_at: DateTime<Utc>,
    /// From the token's `exp` claim when the token is a JWT
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct ExpClaim {
    exp: Option<i64>,
}

/// Read `exp` from a JWT without verifying it. The kiosk has no key; the
/// backend stays the authority on validity.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<ExpClaim>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    data.claims
        .exp
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    /// Device MAC from configuration, used when nothing is bound
    configured_mac: Option<String>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, configured_mac: Option<String>) -> Self {
        Self { kv, configured_mac }
    }

    /// Store a new session, replacing whatever was there.
    pub async fn save(&self, token: &str, user: &UserRecord) -> Result<Session, SessionError> {
        let session = Session {
            token: token.to_string(),
            user: user.clone(),
            issued_at: Utc::now(),
            expires_at: token_expiry(token),
        };

        let user_json = serde_json::to_string(user)
            .map_err(|e| SessionError::Corrupt(format!("failed to encode user: {}", e)))?;

        let mut entries = vec![
            (keys::USER_TOKEN, session.token.clone()),
            (keys::USER_INFO, user_json),
            (keys::ISSUED_AT, session.issued_at.to_rfc3339()),
        ];
        let mut stale = Vec::new();
        match &user.staff_code {
            Some(code) => entries.push((keys::PERSONEL_KOD, code.clone())),
            None => stale.push(keys::PERSONEL_KOD),
        }
        self.kv.apply_batch(&entries, &stale).await?;

        info!(
            user_id = %user.id,
            role = %user.role,
            expires_at = ?session.expires_at,
            "Session saved"
        );
        Ok(session)
    }

    /// The current session. Missing or expired sessions are `None`.
    pub async fn load(&self) -> Result<Option<Session>, SessionError> {
        let Some(token) = self.kv.get(keys::USER_TOKEN).await? else {
            return Ok(None);
        };

        let user_json = self
            .kv
            .get(keys::USER_INFO)
            .await?
            .ok_or_else(|| SessionError::Corrupt("token stored without user".to_string()))?;
        let user: UserRecord = serde_json::from_str(&user_json)
            .map_err(|e| SessionError::Corrupt(format!("unreadable user: {}", e)))?;

        let issued_at = match self.kv.get(keys::ISSUED_AT).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| SessionError::Corrupt(format!("unreadable issue time: {}", e)))?
                .with_timezone(&Utc),
            None => return Err(SessionError::Corrupt("session has no issue time".to_string())),
        };

        let session = Session {
            expires_at: token_expiry(&token),
            token,
            user,
            issued_at,
        };

        if session.is_expired_at(Utc::now()) {
            debug!(user_id = %session.user.id, "Stored session has expired");
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Log out. The device binding is kept.
    pub async fn clear(&self) -> Result<(), SessionError> {
        self.kv.apply_batch(&[], keys::SESSION).await?;
        info!("Session cleared");
        Ok(())
    }

    /// Bearer token for authenticated calls, if a usable session exists
    pub async fn bearer_token(&self) -> Option<String> {
        match self.load().await {
            Ok(session) => session.map(|s| s.token),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable session");
                None
            }
        }
    }

    /// The bound device MAC, else the configured one
    pub async fn device_mac(&self) -> Result<Option<String>, SessionError> {
        match self.kv.get(keys::DEVICE_MAC).await? {
            Some(mac) => Ok(Some(mac)),
            None => Ok(self.configured_mac.clone()),
        }
    }

    /// The MAC stored by [`bind_device`](Self::bind_device), ignoring configuration
    pub async fn bound_device_mac(&self) -> Result<Option<String>, SessionError> {
        self.kv.get(keys::DEVICE_MAC).await
    }

    pub async fn bind_device(&self, mac: &str) -> Result<(), SessionError> {
        let mac = mac.trim().to_uppercase().replace('-', ":");
        validate_device_mac(&mac).map_err(SessionError::InvalidDeviceMac)?;
        self.kv.set(keys::DEVICE_MAC, &mac).await?;
        info!(device_mac = %mac, "Device bound");
        Ok(())
    }

    pub async fn unbind_device(&self) -> Result<(), SessionError> {
        self.kv.remove(keys::DEVICE_MAC).await?;
        info!("Device binding removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user::Role;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryStore::new()), None)
    }

    fn user(id: &str, role: Role, staff_code: Option<&str>) -> UserRecord {
        UserRecord {
            id: id.to_string(),
            role,
            display_name: format!("User {}", id),
            national_id: None,
            patient_id: None,
            staff_code: staff_code.map(str::to_string),
            raw: json!({"id": id}),
        }
    }

    fn jwt(exp: i64) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &json!({"user_id": "P1", "exp": exp}),
            &EncodingKey::from_secret(b"server-secret"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = store();
        assert!(store.load().await.unwrap().is_none());

        store.save("t1", &user("P1", Role::Patient, None)).await.unwrap();
        let session = store.load().await.unwrap().unwrap();
        assert_eq!(session.token, "t1");
        assert_eq!(session.user.id, "P1");
        assert_eq!(session.user.role, Role::Patient);
        assert_eq!(session.expires_at, None);
        assert_eq!(store.bearer_token().await.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_session() {
        let store = store();
        store.save("t1", &user("D1", Role::Doctor, Some("D1"))).await.unwrap();
        store.save("t2", &user("P2", Role::Patient, None)).await.unwrap();

        let session = store.load().await.unwrap().unwrap();
        assert_eq!(session.token, "t2");
        assert_eq!(session.user.id, "P2");
        assert_eq!(store.kv.get(keys::PERSONEL_KOD).await.unwrap(), None);
    }

    /// Accepts only whole batches, so any write outside one fails the save.
    #[derive(Default)]
    struct BatchOnlyStore {
        batches: parking_lot::Mutex<Vec<(Vec<String>, Vec<String>)>>,
    }

    #[async_trait]
    impl KeyValueStore for BatchOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, SessionError> {
            Ok(None)
        }

        async fn set(&self, key: &str, _value: &str) -> Result<(), SessionError> {
            Err(SessionError::Storage(format!("unbatched write of {}", key)))
        }

        async fn remove(&self, key: &str) -> Result<(), SessionError> {
            Err(SessionError::Storage(format!("unbatched removal of {}", key)))
        }

        async fn apply_batch(&self, set: &[(&str, String)], remove: &[&str]) -> Result<(), SessionError> {
            self.batches.lock().push((
                set.iter().map(|(key, _)| key.to_string()).collect(),
                remove.iter().map(|key| key.to_string()).collect(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_save_writes_one_batch() {
        let kv = Arc::new(BatchOnlyStore::default());
        let store = SessionStore::new(kv.clone(), None);

        store.save("t1", &user("D1", Role::Doctor, Some("D1"))).await.unwrap();
        store.save("t2", &user("P2", Role::Patient, None)).await.unwrap();

        let batches = kv.batches.lock().clone();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].0.contains(&keys::PERSONEL_KOD.to_string()));
        assert!(batches[0].1.is_empty());
        assert!(!batches[1].0.contains(&keys::PERSONEL_KOD.to_string()));
        assert!(batches[1].0.contains(&keys::USER_TOKEN.to_string()));
        assert_eq!(batches[1].1, vec![keys::PERSONEL_KOD.to_string()]);
    }

    #[tokio::test]
    async fn test_clear_keeps_device_binding() {
        let store = store();
        store.bind_device("aa-bb-cc-dd-ee-ff").await.unwrap();
        store.save("t1", &user("N1", Role::Nurse, Some("N1"))).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(
            store.device_mac().await.unwrap().as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
    }

    #[tokio::test]
    async fn test_device_mac_falls_back_to_config() {
        let store = SessionStore::new(
            Arc::new(MemoryStore::new()),
            Some("11:22:33:44:55:66".to_string()),
        );
        assert_eq!(store.device_mac().await.unwrap().as_deref(), Some("11:22:33:44:55:66"));
        assert_eq!(store.bound_device_mac().await.unwrap(), None);

        store.bind_device("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert_eq!(store.device_mac().await.unwrap().as_deref(), Some("AA:BB:CC:DD:EE:FF"));

        store.unbind_device().await.unwrap();
        assert_eq!(store.device_mac().await.unwrap().as_deref(), Some("11:22:33:44:55:66"));

        assert!(matches!(
            store.bind_device("not-a-mac").await,
            Err(SessionError::InvalidDeviceMac(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_jwt_loads_as_absent() {
        let store = store();
        let expired = jwt(Utc::now().timestamp() - 60);
        let session = store.save(&expired, &user("P1", Role::Patient, None)).await.unwrap();
        assert!(session.expires_at.is_some());
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.bearer_token().await, None);

        let valid = jwt(Utc::now().timestamp() + 24 * 3600);
        store.save(&valid, &user("P1", Role::Patient, None)).await.unwrap();
        let session = store.load().await.unwrap().unwrap();
        assert!(session.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_corrupt_user_info() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(keys::USER_TOKEN, "t1").await.unwrap();
        kv.set(keys::USER_INFO, "{not json").await.unwrap();
        let store = SessionStore::new(kv, None);

        assert!(matches!(store.load().await, Err(SessionError::Corrupt(_))));
        assert_eq!(store.bearer_token().await, None);
    }

    #[test]
    fn test_token_expiry() {
        assert_eq!(token_expiry("t1"), None);
        assert_eq!(token_expiry("a.b.c"), None);
        let exp = Utc::now().timestamp() + 100;
        assert_eq!(token_expiry(&jwt(exp)).unwrap().timestamp(), exp);
    }
}
