//! Turning a scanned card or code into an authentication outcome.

pub mod access;
pub mod credential;
pub mod resolver;
pub mod result;
pub mod user;

pub use credential::RawCredential;
pub use resolver::CredentialResolver;
pub use result::{AuthResult, InvalidReason};
pub use user::{Role, UserRecord};
