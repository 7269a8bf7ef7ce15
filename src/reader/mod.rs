//! NFC/QR reader adapters.
//!
//! A reader delivers raw credentials to exactly one subscriber, the sink
//! passed to [`CredentialReader::start`]. Starting again replaces the
//! previous subscriber instead of adding a second one.

mod bus;
mod loopback;
mod wedge;

pub use bus::TagBus;
pub use loopback::LoopbackReader;
pub use wedge::{classify_line, WedgeReader};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::credential::RawCredential;
use crate::config::{ReaderConfig, ReaderKind};

/// Where a started reader delivers credentials
pub type CredentialSink = mpsc::Sender<RawCredential>;

#[derive(Debug, Error)]
pub enum ReaderError {
    /// Reader missing, unplugged or not ready. Worth retrying later.
    #[error("Reader hardware unavailable: {0}")]
    HardwareUnavailable(String),
}

#[async_trait]
pub trait CredentialReader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin delivering credentials to `sink`. Idempotent: a previous
    /// subscriber is detached before `sink` is attached.
    async fn start(&self, sink: CredentialSink) -> Result<(), ReaderError>;

    /// Stop delivering. Calling it while stopped is a no-op.
    async fn stop(&self);

    fn is_active(&self) -> bool;
}

/// Reader used when nothing is configured
pub struct NoopReader;

#[async_trait]
impl CredentialReader for NoopReader {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn start(&self, _sink: CredentialSink) -> Result<(), ReaderError> {
        Err(ReaderError::HardwareUnavailable(
            "no reader configured".to_string(),
        ))
    }

    async fn stop(&self) {}

    fn is_active(&self) -> bool {
        false
    }
}

pub fn detect_reader(config: &ReaderConfig) -> Arc<dyn CredentialReader> {
    match config.kind {
        ReaderKind::Stdin => {
            tracing::info!(mode = ?config.mode, "Using keyboard-wedge reader on stdin");
            Arc::new(WedgeReader::stdin(config.mode))
        }
        ReaderKind::Device => match &config.device_path {
            Some(path) => {
                tracing::info!(path = %path.display(), mode = ?config.mode, "Using reader device");
                Arc::new(WedgeReader::device(path.clone(), config.mode))
            }
            None => {
                tracing::warn!("reader.kind = \"device\" without reader.device_path. Scanning is disabled.");
                Arc::new(NoopReader)
            }
        },
        ReaderKind::Loopback => Arc::new(LoopbackReader::new()),
        ReaderKind::None => {
            tracing::warn!("No reader configured. Scanning is disabled.");
            Arc::new(NoopReader)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_noop_reader_reports_missing_hardware() {
        let (tx, _rx) = mpsc::channel(1);
        let reader = NoopReader;
        assert!(matches!(
            reader.start(tx).await,
            Err(ReaderError::HardwareUnavailable(_))
        ));
        assert!(!reader.is_active());
        reader.stop().await;
    }

    #[test]
    fn test_detect_reader() {
        let mut config = ReaderConfig::default();
        assert_eq!(detect_reader(&config).name(), "stdin");

        config.kind = ReaderKind::Device;
        assert_eq!(detect_reader(&config).name(), "none");

        config.device_path = Some(PathBuf::from("/dev/ttyACM0"));
        assert_eq!(detect_reader(&config).name(), "device");

        config.kind = ReaderKind::Loopback;
        assert_eq!(detect_reader(&config).name(), "loopback");

        config.kind = ReaderKind::None;
        assert_eq!(detect_reader(&config).name(), "none");
    }
}
