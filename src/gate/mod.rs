//! Debounce and re-arm gate for the scan screen.
//!
//! ```text
//!  Closed --focus--> Idle --try_begin--> Processing --succeed--> Idle
//!                                         |
//!                                         +--fail--> Cooldown --(cooldown elapsed)--> Idle
//!  any --focus--> Idle (new generation)     any --blur--> Closed (new generation)
//! ```
//!
//! Completions carry the [`GatePermit`] they were started with. A permit
//! from an older generation is ignored, so a resolution that finishes after
//! the screen was blurred and re-focused cannot re-arm the new screen.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    Processing,
    Cooldown,
    Closed,
}

/// Why a discovered credential was not let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Processing,
    Cooldown,
    Closed,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Processing => "processing",
            Rejection::Cooldown => "cooldown",
            Rejection::Closed => "closed",
        }
    }
}

/// Proof that the holder owns the single in-flight slot
#[derive(Debug)]
pub struct GatePermit {
    generation: u64,
}

impl GatePermit {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub is_scanning: bool,
    pub is_processing: bool,
    /// Time left before scanning re-arms, while cooling down
    pub cooldown_remaining_ms: Option<u64>,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Idle,
    Processing,
    Cooldown { until: Instant },
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    generation: u64,
}

impl Inner {
    /// Cooldown ends lazily on the next look at the state
    fn settle(&mut self, now: Instant) {
        if let Phase::Cooldown { until } = self.phase {
            if now >= until {
                self.phase = Phase::Idle;
            }
        }
    }
}

#[derive(Debug)]
pub struct ScanGate {
    inner: Mutex<Inner>,
    cooldown: Duration,
}

impl ScanGate {
    /// A new gate starts closed; the screen opens it on focus.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                generation: 0,
            }),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Open for scanning. Returns the new generation.
    pub fn focus(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.phase = Phase::Idle;
        inner.generation
    }

    pub fn blur(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.phase = Phase::Closed;
    }

    /// Claim the in-flight slot for a newly discovered credential.
    pub fn try_begin(&self) -> Result<GatePermit, Rejection> {
        let mut inner = self.inner.lock();
        inner.settle(Instant::now());
        match inner.phase {
            Phase::Idle => {
                inner.phase = Phase::Processing;
                Ok(GatePermit {
                    generation: inner.generation,
                })
            }
            Phase::Processing => Err(Rejection::Processing),
            Phase::Cooldown { .. } => Err(Rejection::Cooldown),
            Phase::Closed => Err(Rejection::Closed),
        }
    }

    /// Resolution led away from the scan screen: re-arm immediately.
    /// Returns false when the permit is stale.
    pub fn succeed(&self, permit: GatePermit) -> bool {
        self.complete(permit, Phase::Idle)
    }

    /// Resolution failed: re-arm after the cooldown.
    /// Returns false when the permit is stale.
    pub fn fail(&self, permit: GatePermit) -> bool {
        let until = Instant::now() + self.cooldown;
        self.complete(permit, Phase::Cooldown { until })
    }

    fn complete(&self, permit: GatePermit, next: Phase) -> bool {
        let mut inner = self.inner.lock();
        if permit.generation != inner.generation || !matches!(inner.phase, Phase::Processing) {
            return false;
        }
        inner.phase = next;
        true
    }

    pub fn state(&self) -> GateState {
        let mut inner = self.inner.lock();
        inner.settle(Instant::now());
        match inner.phase {
            Phase::Closed => GateState::Closed,
            Phase::Idle => GateState::Idle,
            Phase::Processing => GateState::Processing,
            Phase::Cooldown { .. } => GateState::Cooldown,
        }
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.settle(now);
        let cooldown_remaining_ms = match inner.phase {
            Phase::Cooldown { until } => Some(until.saturating_duration_since(now).as_millis() as u64),
            _ => None,
        };
        GateSnapshot {
            is_scanning: !matches!(inner.phase, Phase::Closed),
            is_processing: matches!(inner.phase, Phase::Processing),
            cooldown_remaining_ms,
            generation: inner.generation,
        }
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().generation == generation
    }
}
