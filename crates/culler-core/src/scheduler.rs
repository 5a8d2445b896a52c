//! Run context and cancellable suspension points.
//!
//! Every wait in the harvester and executor goes through [`RunContext::sleep`],
//! which races the timer against the run's [`CancellationToken`]. A stop
//! therefore aborts any active wait immediately with [`AppError::Cancelled`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Mutable per-run counters threaded through every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Consecutive per-entity failures since the last success or cooldown.
    pub consecutive_errors: u32,
    /// Consecutive sweep+lookup cycles that actioned nothing.
    pub empty_cycles: u32,
    /// Actions confirmed during this run.
    pub actions: u64,
}

/// Explicit run context: cancellation token, pacing jitter and counters.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    jitter: Duration,
    pub counters: RunCounters,
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            jitter: Duration::ZERO,
            counters: RunCounters::default(),
        }
    }

    /// Add random jitter (uniform [0, jitter]) to every paced sleep.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `Err(Cancelled)` once the stop signal has been raised.
    pub fn check(&self) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Paced wait: `base` plus jitter, aborted early on cancellation.
    pub async fn sleep(&self, base: Duration) -> Result<(), AppError> {
        self.sleep_exact(base + self.effective_jitter()).await
    }

    /// Wait exactly `duration`, aborted early on cancellation.
    pub async fn sleep_exact(&self, duration: Duration) -> Result<(), AppError> {
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(()),
            () = self.cancel.cancelled() => Err(AppError::Cancelled),
        }
    }

    fn effective_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

// Uses a simple xorshift seeded from the current time; good enough for
// pacing jitter, not crypto.
fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
