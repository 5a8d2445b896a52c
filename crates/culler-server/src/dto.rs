use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use culler_core::models::{Entity, ExclusionSet, HarvestResult};
use culler_core::progress::{DiagnosticEntry, ProgressSnapshot};

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AccountResponse {
    pub id: String,
    pub label: String,
    pub discovered_at: DateTime<Utc>,
}

impl From<Entity> for AccountResponse {
    fn from(e: Entity) -> Self {
        Self {
            id: e.id,
            label: e.label,
            discovered_at: e.discovered_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct AccountInput {
    /// Account handle, with or without the leading `@`
    pub id: String,
    /// Display name (defaults to the handle)
    pub label: Option<String>,
}

impl From<AccountInput> for Entity {
    fn from(input: AccountInput) -> Self {
        let id = input.id.trim().trim_start_matches('@').to_string();
        let label = input.label.unwrap_or_else(|| id.clone());
        Entity::new(id, label)
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct StartHarvestRequest {
    /// Accounts to collect (defaults to CULLER_TARGET_COUNT)
    pub target: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct StartExecutionRequest {
    /// Accounts to unfollow. Omit to continue the saved batch, or set
    /// `from_harvest` to use the last harvest.
    pub accounts: Option<Vec<AccountInput>>,
    /// Use the action list of the last harvest
    #[serde(default)]
    pub from_harvest: bool,
    /// Discard any saved batch and start over from the list
    #[serde(default)]
    pub reseed: bool,
    /// Operator approval of the batch (ignored when auto-confirm is on)
    pub confirmed: bool,
    /// Skip confirmation in future runs
    #[serde(default)]
    pub remember: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunStartedResponse {
    pub run: &'static str,
    pub status: &'static str,
}

impl RunStartedResponse {
    pub fn started(run: &'static str) -> Self {
        Self {
            run,
            status: "started",
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StopResponse {
    /// False if no run was active
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Harvest
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HarvestResponse {
    pub id: Uuid,
    /// Accounts to unfollow, with current retentions applied
    pub accounts: Vec<AccountResponse>,
    pub found: usize,
    pub retained: usize,
    pub partial: bool,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl HarvestResponse {
    pub fn new(result: HarvestResult, exclusions: &ExclusionSet) -> Self {
        let accounts = result
            .action_list(exclusions)
            .into_iter()
            .map(AccountResponse::from)
            .collect();
        Self {
            id: result.id,
            accounts,
            found: result.non_excluded_count,
            retained: result.excluded_count,
            partial: result.partial,
            fingerprint: result.fingerprint,
            created_at: result.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProgressResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub found: usize,
    pub total: usize,
    pub unfollowed: usize,
    pub rate_limited: bool,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    /// Kind of the run currently active in this process
    pub active_run: Option<&'static str>,
}

impl ProgressResponse {
    pub fn new(snapshot: ProgressSnapshot, active_run: Option<&'static str>) -> Self {
        Self {
            status: snapshot.status.as_str(),
            message: snapshot.message(),
            found: snapshot.found,
            total: snapshot.total,
            unfollowed: snapshot.unfollowed,
            rate_limited: snapshot.rate_limited,
            timestamp: snapshot.timestamp,
            error: snapshot.error,
            active_run,
        }
    }
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ExclusionListResponse {
    pub ids: Vec<String>,
    pub total: usize,
}

impl From<ExclusionSet> for ExclusionListResponse {
    fn from(set: ExclusionSet) -> Self {
        let ids: Vec<String> = set.iter().map(str::to_string).collect();
        Self {
            total: ids.len(),
            ids,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RetainRequest {
    pub retained: bool,
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LogsQuery {
    /// Most recent entries to return (default 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LogEntryResponse {
    pub timestamp: DateTime<Utc>,
    pub scope: String,
    pub message: String,
}

impl From<DiagnosticEntry> for LogEntryResponse {
    fn from(e: DiagnosticEntry) -> Self {
        Self {
            timestamp: e.timestamp,
            scope: e.scope,
            message: e.message,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LogListResponse {
    pub entries: Vec<LogEntryResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
