use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::CredentialSink;
use crate::auth::credential::RawCredential;

/// Fan-in point between a hardware pump and the single screen subscriber.
///
/// The pump publishes whether or not anyone listens. `attach` tears down the
/// previous forwarder before subscribing the new one, and each forwarder
/// checks it is still the current one before delivering.
pub struct TagBus {
    tx: broadcast::Sender<RawCredential>,
    listener: Mutex<Option<JoinHandle<()>>>,
    current: Arc<AtomicU64>,
}

impl TagBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            listener: Mutex::new(None),
            current: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish a credential. Returns false when no subscriber is attached.
    pub fn publish(&self, credential: RawCredential) -> bool {
        self.tx.send(credential).is_ok()
    }

    /// Make `sink` the only subscriber.
    pub fn attach(&self, sink: CredentialSink) {
        let mut listener = self.listener.lock();
        if let Some(previous) = listener.take() {
            previous.abort();
            debug!("Replaced previous reader subscriber");
        }

        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.current.clone();
        let mut rx = self.tx.subscribe();

        *listener = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(credential) => {
                        if current.load(Ordering::SeqCst) != id {
                            break;
                        }
                        if sink.send(credential).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Reader subscriber lagged, credentials dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    pub fn detach(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.listener.lock().take() {
            previous.abort();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}
