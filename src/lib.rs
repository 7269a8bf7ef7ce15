pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod gate;
pub mod navigation;
pub mod reader;
pub mod records;
pub mod session;

#[cfg(test)]
mod test_support;

pub use db::DbPool;

use anyhow::{Context, Result};
use config::Config;
use std::sync::Arc;

use crate::api::{HospitalBackend, HttpBackend};
use crate::auth::CredentialResolver;
use crate::db::ScanLog;
use crate::records::RecordsClient;
use crate::session::{SessionStore, SqliteStore};

/// Everything the kiosk and the CLI commands share
pub struct KioskState {
    pub config: Config,
    pub db: DbPool,
    pub backend: Arc<dyn HospitalBackend>,
    pub sessions: Arc<SessionStore>,
    pub resolver: Arc<CredentialResolver>,
    pub scan_log: ScanLog,
}

impl KioskState {
    /// Open the local database and build the HTTP backend from `config`.
    pub async fn init(config: Config) -> Result<Self> {
        let db = db::init(&config.device.data_dir).await?;
        let backend: Arc<dyn HospitalBackend> = Arc::new(
            HttpBackend::new(&config.backend).context("Failed to create backend client")?,
        );
        Ok(Self::new(config, db, backend))
    }

    pub fn new(config: Config, db: DbPool, backend: Arc<dyn HospitalBackend>) -> Self {
        let sessions = Arc::new(SessionStore::new(
            Arc::new(SqliteStore::new(db.clone())),
            config.device.mac.clone(),
        ));
        let resolver = Arc::new(CredentialResolver::new(
            backend.clone(),
            sessions.clone(),
            config.backend.timeout(),
        ));
        let scan_log = ScanLog::new(db.clone());
        Self {
            config,
            db,
            backend,
            sessions,
            resolver,
            scan_log,
        }
    }

    pub fn records(&self) -> RecordsClient {
        RecordsClient::new(self.backend.clone(), self.sessions.clone())
    }
}
