pub mod config;
pub mod confirm;
pub mod controller;
pub mod error;
pub mod executor;
pub mod harvest;
pub mod models;
pub mod progress;
pub mod rate_limit;
pub mod scheduler;
pub mod store;
pub mod task_state;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::{CullerConfig, ExecutorConfig, HarvestConfig, PacingConfig, Selectors};
pub use confirm::{AutoConfirm, Confirmation, ConfirmationMode, Decision, Interactive, OperatorPrompt};
pub use controller::{Controller, RunGuard, RunKind};
pub use error::AppError;
pub use executor::{BatchExecutor, ExecutionOutcome, ExecutionRequest, ExecutorState};
pub use harvest::Harvester;
pub use models::{CompletedEntity, Entity, ExclusionSet, HarvestResult};
pub use progress::{DiagnosticEntry, ObserverEvent, ProgressSnapshot, RunStatus};
pub use store::{JsonFileStore, MemoryStore};
pub use task_state::{TaskState, TaskStateStore};
pub use traits::{
    ActionTrigger, CellHandle, CellParser, Control, ControlScope, DetachedHost, NullObserver,
    ObserverChannel, PersistentStore, Record, RenderedListHost,
};
