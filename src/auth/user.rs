//! The user or personnel record returned by a successful card login.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::api::envelope::field_string;

/// Role as reported by the backend.
///
/// Personnel records use Turkish duty codes (HEKIM, HEMSIRE, DIGER); those
/// are folded into the same roles as the newer `user.role` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Patient,
    Doctor,
    Nurse,
    Admin,
    Receptionist,
    /// Personnel record without a more specific duty
    Staff,
    Other(String),
}

impl Role {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "patient" | "hasta" => Role::Patient,
            "doctor" | "hekim" => Role::Doctor,
            "nurse" | "hemsire" | "hemşire" => Role::Nurse,
            "admin" | "administrator" => Role::Admin,
            "receptionist" | "sekreter" => Role::Receptionist,
            "staff" | "personel" | "diger" | "diğer" => Role::Staff,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::Admin => "admin",
            Role::Receptionist => "receptionist",
            Role::Staff => "staff",
            Role::Other(s) => s,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(
            self,
            Role::Doctor | Role::Nurse | Role::Admin | Role::Receptionist | Role::Staff
        )
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which envelope key the record was found under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSource {
    User,
    Personnel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
    /// Patient linked to the record, when the backend sends one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_code: Option<String>,
    /// The backend object as received. Opaque to this crate.
    #[serde(default)]
    pub raw: Value,
}

const ID_KEYS: &[&str] = &["id", "ID", "user_id", "personel_kodu", "kod"];
const ROLE_KEYS: &[&str] = &["role", "Role", "rol", "personel_gorev_kodu", "gorev"];
const NAME_KEYS: &[&str] = &["display_name", "full_name", "name", "Name"];
const NATIONAL_ID_KEYS: &[&str] = &["tc_number", "tc_kimlik_numarasi", "TCNumber", "tc", "national_id"];
const PATIENT_ID_KEYS: &[&str] = &["patient_id", "device_patient_id", "hasta_kodu", "PatientID", "patientId"];
const STAFF_CODE_KEYS: &[&str] = &["personel_kodu", "staff_code", "kod"];

impl UserRecord {
    /// Build a record from the backend object.
    ///
    /// Records without an id are refused, as are `user` objects without a
    /// role. A personnel object without a duty code is generic staff.
    pub fn from_value(value: &Value, source: UserSource) -> Result<Self, String> {
        if !value.is_object() {
            return Err("user record is not an object".to_string());
        }

        let id = field_string(value, ID_KEYS).ok_or("user record has no id")?;

        let role = match (field_string(value, ROLE_KEYS), source) {
            (Some(role), _) => Role::parse(&role),
            (None, UserSource::Personnel) => Role::Staff,
            (None, UserSource::User) => return Err("user record has no role".to_string()),
        };

        let display_name = field_string(value, NAME_KEYS)
            .or_else(|| join_names(value, "first_name", "last_name"))
            .or_else(|| join_names(value, "ad", "soyadi"))
            .unwrap_or_else(|| id.clone());

        let staff_code = match source {
            UserSource::Personnel => field_string(value, STAFF_CODE_KEYS),
            UserSource::User => field_string(value, &["personel_kodu", "staff_code"]),
        };

        Ok(Self {
            id,
            role,
            display_name,
            national_id: field_string(value, NATIONAL_ID_KEYS),
            patient_id: field_string(value, PATIENT_ID_KEYS),
            staff_code,
            raw: value.clone(),
        })
    }

    /// The patient whose records this user views by default: the linked
    /// patient, or the user itself for patient accounts.
    pub fn own_patient_id(&self) -> Option<&str> {
        match (&self.patient_id, &self.role) {
            (Some(id), _) => Some(id),
            (None, Role::Patient) => Some(&self.id),
            _ => None,
        }
    }
}

fn join_names(value: &Value, first: &str, last: &str) -> Option<String> {
    let first = field_string(value, &[first]);
    let last = field_string(value, &[last]);
    match (first, last) {
        (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
        (Some(f), None) => Some(f),
        (None, Some(l)) => Some(l),
        (None, None) => None,
    }
}
