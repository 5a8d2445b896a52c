//! Progress snapshots, observer events and the persisted diagnostic log.
//!
//! Everything here is best-effort. A snapshot is derived from the task
//! state and is never authoritative; failures to persist it or to reach
//! the observer are logged and swallowed.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::{keys, read_key, write_key};
use crate::traits::{ObserverChannel, PersistentStore};

/// Capacity of the persisted diagnostic ring buffer.
pub const DIAGNOSTIC_LOG_CAPACITY: usize = 100;

/// Lifecycle status shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Harvesting,
    Confirming,
    Running,
    PausedRateLimit,
    Completed,
    Stopped,
    Errored,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Harvesting => "harvesting",
            RunStatus::Confirming => "confirming",
            RunStatus::Running => "running",
            RunStatus::PausedRateLimit => "paused_rate_limit",
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Stopped | RunStatus::Errored
        )
    }

    /// Operator-facing description. An errored run is never reported as
    /// failed: the persisted task state allows a restart to resume it.
    pub fn describe(&self) -> &'static str {
        match self {
            RunStatus::Idle => "Idle",
            RunStatus::Harvesting => "Collecting accounts",
            RunStatus::Confirming => "Waiting for confirmation",
            RunStatus::Running => "Running",
            RunStatus::PausedRateLimit => "Rate limited, cooling down",
            RunStatus::Completed => "Completed",
            RunStatus::Stopped => "Stopped",
            RunStatus::Errored => "Paused, can be restarted",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived, ephemeral view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Entities known to the run (harvested or targeted).
    pub found: usize,
    /// Target size of the batch.
    pub total: usize,
    /// Entities actioned so far.
    pub unfollowed: usize,
    pub status: RunStatus,
    #[serde(rename = "rateLimited")]
    pub rate_limited: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    pub fn new(status: RunStatus, found: usize, total: usize, unfollowed: usize) -> Self {
        Self {
            found,
            total,
            unfollowed,
            status,
            rate_limited: status == RunStatus::PausedRateLimit,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn idle() -> Self {
        Self::new(RunStatus::Idle, 0, 0, 0)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn message(&self) -> &'static str {
        self.status.describe()
    }
}

/// Events pushed to the operator-facing observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObserverEvent {
    Progress(ProgressSnapshot),
    HarvestProgress { found: usize, target: usize },
    HarvestComplete { found: usize, excluded: usize },
    RateLimited { cooldown_secs: u64 },
    Completed { unfollowed: usize },
    Stopped { unfollowed: usize },
    Errored { message: String },
}

/// Persists snapshots and forwards events to the observer, swallowing
/// every failure.
#[derive(Debug, Clone)]
pub struct ProgressReporter<S, O> {
    store: S,
    observer: O,
}

impl<S, O> ProgressReporter<S, O>
where
    S: PersistentStore,
    O: ObserverChannel,
{
    pub fn new(store: S, observer: O) -> Self {
        Self { store, observer }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Persists `snapshot` under `progressSnapshot` and emits it.
    pub async fn publish(&self, snapshot: ProgressSnapshot) {
        if let Err(e) = write_key(&self.store, keys::PROGRESS_SNAPSHOT, &snapshot).await {
            tracing::warn!(error = %e, "Failed to persist progress snapshot");
        }
        self.notify(ObserverEvent::Progress(snapshot)).await;
    }

    /// Fire-and-forget observer send.
    pub async fn notify(&self, event: ObserverEvent) {
        match self.observer.send(&event).await {
            Ok(()) => {}
            Err(AppError::HostDisconnected(msg)) => {
                tracing::debug!(%msg, "Observer not connected");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Observer send failed");
            }
        }
    }

    /// Last persisted snapshot, or an idle one.
    pub async fn latest(&self) -> Result<ProgressSnapshot, AppError> {
        Ok(read_key(&self.store, keys::PROGRESS_SNAPSHOT)
            .await?
            .unwrap_or_else(ProgressSnapshot::idle))
    }
}

// ---------------------------------------------------------------------------
// Diagnostic log
// ---------------------------------------------------------------------------

/// One persisted diagnostic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub timestamp: DateTime<Utc>,
    /// An entity id, or `Main`/`Global`.
    pub scope: String,
    pub message: String,
}

/// Ring buffer of the last [`DIAGNOSTIC_LOG_CAPACITY`] entries, persisted
/// under `diagnosticLog`.
#[derive(Debug, Clone)]
pub struct DiagnosticLog<S> {
    store: S,
    capacity: usize,
}

impl<S: PersistentStore> DiagnosticLog<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            capacity: DIAGNOSTIC_LOG_CAPACITY,
        }
    }

    /// Appends an entry, dropping the oldest beyond capacity. Never fails.
    pub async fn append(&self, scope: &str, message: impl Into<String>) {
        let entry = DiagnosticEntry {
            timestamp: Utc::now(),
            scope: scope.to_string(),
            message: message.into(),
        };
        if let Err(e) = self.try_append(entry).await {
            tracing::debug!(error = %e, "Failed to write diagnostic log");
        }
    }

    async fn try_append(&self, entry: DiagnosticEntry) -> Result<(), AppError> {
        let mut entries: VecDeque<DiagnosticEntry> = read_key(&self.store, keys::DIAGNOSTIC_LOG)
            .await?
            .unwrap_or_default();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        write_key(&self.store, keys::DIAGNOSTIC_LOG, &entries).await
    }

    /// Entries oldest first.
    pub async fn entries(&self) -> Result<Vec<DiagnosticEntry>, AppError> {
        Ok(read_key(&self.store, keys::DIAGNOSTIC_LOG)
            .await?
            .unwrap_or_default())
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.store.remove(&[keys::DIAGNOSTIC_LOG]).await
    }
}
