//! Role gating.
//!
//! Read rules follow the backend's role middleware so the kiosk never offers
//! a screen the backend would answer with 403. Patients are limited to their
//! own records.

use super::user::{Role, UserRecord};
use crate::records::Resource;

/// Where an authenticated user lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    PatientSelfView,
    StaffLanding,
    Denied,
}

/// Staff roles land on the staff screen only when they can read something
/// from it.
pub fn landing_for(role: &Role) -> Landing {
    match role {
        Role::Patient => Landing::PatientSelfView,
        r if r.is_staff() && !readable_resources(r).is_empty() => Landing::StaffLanding,
        _ => Landing::Denied,
    }
}

/// Whether `role` may list `resource` at all
pub fn can_read(role: &Role, resource: Resource) -> bool {
    match role {
        Role::Patient | Role::Admin | Role::Doctor | Role::Nurse => true,
        Role::Receptionist => resource == Resource::Appointments,
        Role::Staff | Role::Other(_) => false,
    }
}

/// Whether `user` may read `resource` for `patient_id`
pub fn can_read_patient(user: &UserRecord, resource: Resource, patient_id: &str) -> bool {
    if !can_read(&user.role, resource) {
        return false;
    }
    match user.role {
        Role::Patient => user.own_patient_id() == Some(patient_id),
        _ => true,
    }
}

/// Resources `role` may read, in display order
pub fn readable_resources(role: &Role) -> Vec<Resource> {
    Resource::ALL
        .iter()
        .copied()
        .filter(|r| can_read(role, *r))
        .collect()
}
