//! The scan screen: reader → gate → resolver → session → navigator.
//!
//! A [`ScanScreen`] is driven by `focus`/`blur` and reports everything it
//! does as [`ScreenEvent`]s. Each focus owns a cancellation token. Blur
//! cancels it, which stops in-flight resolutions, retries and re-arm timers
//! of that focus.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::metrics::{record_reader_failure, record_scan_dropped};
use crate::auth::credential::RawCredential;
use crate::auth::resolver::CredentialResolver;
use crate::auth::result::AuthResult;
use crate::config::Config;
use crate::db::ScanLog;
use crate::gate::{GatePermit, GateSnapshot, ScanGate};
use crate::navigation::{NavigationDecision, Navigator};
use crate::reader::{CredentialReader, CredentialSink, ReaderError};
use crate::session::SessionStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScreenEvent {
    Focused {
        gate: GateSnapshot,
    },
    Blurred,
    ReaderReady,
    /// Persistent notice while the reader is missing
    ReaderUnavailable {
        detail: String,
        retry_in_ms: u64,
    },
    Processing {
        credential: &'static str,
    },
    Retrying {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    Resolved {
        outcome: &'static str,
        decision: NavigationDecision,
    },
    /// Scanning accepted again after a failure cooldown
    Rearmed {
        gate: GateSnapshot,
    },
    LoggedOut,
}

pub struct ScanScreen {
    reader: Arc<dyn CredentialReader>,
    resolver: Arc<CredentialResolver>,
    sessions: Arc<SessionStore>,
    navigator: Navigator,
    gate: ScanGate,
    scan_log: Option<ScanLog>,
    events: mpsc::Sender<ScreenEvent>,
    hardware_retry: Duration,
    focus: Mutex<Option<CancellationToken>>,
    /// Serializes reader start/stop across focus, blur and hardware retries
    lifecycle: tokio::sync::Mutex<()>,
}

impl ScanScreen {
    pub fn new(
        reader: Arc<dyn CredentialReader>,
        resolver: Arc<CredentialResolver>,
        sessions: Arc<SessionStore>,
        scan_log: Option<ScanLog>,
        config: &Config,
    ) -> (Arc<Self>, mpsc::Receiver<ScreenEvent>) {
        let (events, rx) = mpsc::channel(64);
        let screen = Arc::new(Self {
            reader,
            resolver,
            sessions,
            navigator: Navigator::new(&config.gate),
            gate: ScanGate::new(config.gate.error_cooldown()),
            scan_log,
            events,
            hardware_retry: config.reader.hardware_retry_delay(),
            focus: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        });
        (screen, rx)
    }

    pub fn gate(&self) -> &ScanGate {
        &self.gate
    }

    async fn emit(&self, event: ScreenEvent) {
        // A missing listener is not an error for the flow itself
        let _ = self.events.send(event).await;
    }

    /// Screen gained focus: open the gate and start the reader.
    ///
    /// Returns the gate generation of this focus.
    pub async fn focus(self: &Arc<Self>) -> u64 {
        let token = CancellationToken::new();
        if let Some(previous) = self.focus.lock().replace(token.clone()) {
            previous.cancel();
        }

        let generation = self.gate.focus();
        tracing::info!(generation, "Scan screen focused");
        self.emit(ScreenEvent::Focused {
            gate: self.gate.snapshot(),
        })
        .await;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(self.clone().pump(rx, token.clone()));

        let started = {
            let _lifecycle = self.lifecycle.lock().await;
            self.reader.start(tx.clone()).await
        };
        match started {
            Ok(()) => self.emit(ScreenEvent::ReaderReady).await,
            Err(e) => {
                self.reader_unavailable(&e).await;
                tokio::spawn(self.clone().retry_reader(tx, token));
            }
        }

        generation
    }

    /// Screen lost focus: close the gate, stop the reader and cancel
    /// everything started under the last focus.
    pub async fn blur(&self) {
        if let Some(token) = self.focus.lock().take() {
            token.cancel();
        }
        self.gate.blur();
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.reader.stop().await;
        }
        tracing::info!("Scan screen blurred");
        self.emit(ScreenEvent::Blurred).await;
    }

    /// Explicit logout from the screen
    pub async fn logout(&self) {
        if let Err(e) = self.sessions.clear().await {
            tracing::warn!(error = %e, "Failed to clear session");
        }
        self.emit(ScreenEvent::LoggedOut).await;
    }

    async fn reader_unavailable(&self, e: &ReaderError) {
        let ReaderError::HardwareUnavailable(detail) = e;
        record_reader_failure();
        tracing::warn!(
            reader = self.reader.name(),
            error = %e,
            retry_in_secs = self.hardware_retry.as_secs(),
            "Reader unavailable"
        );
        self.emit(ScreenEvent::ReaderUnavailable {
            detail: detail.clone(),
            retry_in_ms: self.hardware_retry.as_millis() as u64,
        })
        .await;
    }

    async fn retry_reader(self: Arc<Self>, sink: CredentialSink, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.hardware_retry) => {}
            }

            let started = {
                let _lifecycle = self.lifecycle.lock().await;
                if token.is_cancelled() {
                    return;
                }
                self.reader.start(sink.clone()).await
            };

            match started {
                Ok(()) => {
                    tracing::info!(reader = self.reader.name(), "Reader became available");
                    self.emit(ScreenEvent::ReaderReady).await;
                    return;
                }
                Err(e) => self.reader_unavailable(&e).await,
            }
        }
    }

    /// Receive discovered credentials for one focus
    async fn pump(self: Arc<Self>, mut rx: mpsc::Receiver<RawCredential>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                credential = rx.recv() => match credential {
                    Some(credential) => self.on_discover(credential, &token).await,
                    None => break,
                },
            }
        }
        tracing::debug!("Scan pump stopped");
    }

    async fn on_discover(self: &Arc<Self>, credential: RawCredential, token: &CancellationToken) {
        match self.gate.try_begin() {
            Ok(permit) => {
                self.emit(ScreenEvent::Processing {
                    credential: credential.kind(),
                })
                .await;
                tokio::spawn(self.clone().handle(credential, permit, token.clone()));
            }
            Err(rejection) => {
                record_scan_dropped(rejection.as_str());
                tracing::debug!(
                    credential = credential.kind(),
                    reason = rejection.as_str(),
                    "Scan dropped"
                );
            }
        }
    }

    /// Resolve one credential, retrying transport failures, then navigate
    /// and re-arm.
    async fn handle(self: Arc<Self>, credential: RawCredential, permit: GatePermit, token: CancellationToken) {
        let mut attempt = 0;
        let (result, decision) = loop {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = self.resolver.resolve(&credential) => result,
            };
            let decision = self.navigator.decide(&result);

            if let Some(plan) = decision.retry {
                if result.is_retryable() && attempt < plan.max_attempts {
                    attempt += 1;
                    tracing::info!(
                        attempt,
                        max_attempts = plan.max_attempts,
                        "Backend unreachable, retrying"
                    );
                    self.emit(ScreenEvent::Retrying {
                        attempt,
                        max_attempts: plan.max_attempts,
                        delay_ms: plan.delay.as_millis() as u64,
                    })
                    .await;
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(plan.delay) => continue,
                    }
                }
            }
            break (result, decision);
        };

        if !self.gate.is_current(permit.generation()) {
            tracing::debug!(outcome = result.kind(), "Ignoring resolution from a previous focus");
            return;
        }

        if let AuthResult::Authenticated { token: bearer, user } = &result {
            if let Err(e) = self.sessions.save(bearer, user).await {
                tracing::error!(error = %e, "Failed to persist session");
            }
        }

        if let Some(log) = &self.scan_log {
            let detail = decision.notice.as_ref().map(|n| n.message.as_str());
            if let Err(e) = log.record(credential.kind(), result.kind(), detail).await {
                tracing::warn!(error = %e, "Failed to record scan outcome");
            }
        }

        let rearm_later = if decision.stays() {
            self.gate.fail(permit)
        } else {
            self.gate.succeed(permit);
            false
        };
        self.emit(ScreenEvent::Resolved {
            outcome: result.kind(),
            decision,
        })
        .await;

        if rearm_later {
            tokio::spawn(self.clone().announce_rearm(token));
        }
    }

    async fn announce_rearm(self: Arc<Self>, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(self.gate.cooldown()) => {
                if !token.is_cancelled() {
                    self.emit(ScreenEvent::Rearmed {
                        gate: self.gate.snapshot(),
                    })
                    .await;
                }
            }
        }
    }
}
