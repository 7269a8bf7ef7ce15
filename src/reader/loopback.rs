use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{CredentialReader, CredentialSink, ReaderError, TagBus};
use crate::auth::credential::RawCredential;

/// In-process reader. Credentials are injected with [`present`](Self::present).
pub struct LoopbackReader {
    bus: TagBus,
    available: AtomicBool,
}

impl LoopbackReader {
    pub fn new() -> Self {
        Self {
            bus: TagBus::new(16),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate a tap or scan. Returns false when no screen is listening.
    pub fn present(&self, credential: RawCredential) -> bool {
        self.bus.publish(credential)
    }

    /// Simulate the hardware disappearing or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for LoopbackReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialReader for LoopbackReader {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn start(&self, sink: CredentialSink) -> Result<(), ReaderError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(ReaderError::HardwareUnavailable(
                "loopback reader switched off".to_string(),
            ));
        }
        self.bus.attach(sink);
        Ok(())
    }

    async fn stop(&self) {
        self.bus.detach();
    }

    fn is_active(&self) -> bool {
        self.bus.is_attached()
    }
}
