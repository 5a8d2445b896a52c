//! Operator command surface shared by the CLI and the HTTP server.
//!
//! Generic over every external collaborator via traits, so the same
//! commands run against the browser host, the fakes in tests, or any
//! store. At most one run (harvest, execution or scroll-to-bottom) is
//! active at a time; `stop` cancels it.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::config::CullerConfig;
use crate::confirm::Confirmation;
use crate::error::AppError;
use crate::executor::{BatchExecutor, ExecutionOutcome, ExecutionRequest, TracingExecutorReporter};
use crate::harvest::{Harvester, TracingHarvestReporter};
use crate::models::{Entity, ExclusionSet, HarvestResult};
use crate::progress::{DiagnosticEntry, DiagnosticLog, ProgressReporter, ProgressSnapshot};
use crate::scheduler::RunContext;
use crate::store::{keys, read_key, write_key};
use crate::traits::{ActionTrigger, CellParser, ObserverChannel, PersistentStore, RenderedListHost};

/// What the active run is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Harvest,
    Execution,
    ScrollToBottom,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Harvest => "harvest",
            RunKind::Execution => "execution",
            RunKind::ScrollToBottom => "scroll-to-bottom",
        }
    }
}

#[derive(Debug)]
struct ActiveRun {
    kind: RunKind,
    cancel: CancellationToken,
}

type Slot = Arc<Mutex<Option<ActiveRun>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActiveRun>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive claim on the run slot. Releases it on drop.
#[derive(Debug)]
pub struct RunGuard {
    slot: Slot,
    kind: RunKind,
    cancel: CancellationToken,
}

impl RunGuard {
    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.slot).take();
    }
}

/// Keys cleared by [`Controller::reset`]. The exclusion set survives.
const RESET_KEYS: &[&str] = &[
    keys::TASK_STATE,
    keys::HARVEST_RESULT,
    keys::PROGRESS_SNAPSHOT,
    keys::TARGET_LIST,
    keys::HEARTBEAT,
    keys::AUTO_CONFIRM,
    keys::DIAGNOSTIC_LOG,
];

/// Command surface over one host, parser, trigger, store and observer.
#[derive(Clone)]
pub struct Controller<H, P, A, S, O> {
    host: H,
    parser: P,
    trigger: A,
    store: S,
    observer: O,
    config: CullerConfig,
    active: Slot,
}

impl<H, P, A, S, O> Controller<H, P, A, S, O>
where
    H: RenderedListHost,
    P: CellParser,
    A: ActionTrigger,
    S: PersistentStore,
    O: ObserverChannel,
{
    pub fn new(host: H, parser: P, trigger: A, store: S, observer: O, config: CullerConfig) -> Self {
        Self {
            host,
            parser,
            trigger,
            store,
            observer,
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &CullerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claims the run slot, or fails with `Conflict` if a run is active.
    pub fn begin(&self, kind: RunKind) -> Result<RunGuard, AppError> {
        let mut slot = lock(&self.active);
        if let Some(active) = slot.as_ref() {
            return Err(AppError::Conflict(format!(
                "A {} is already running",
                active.kind.as_str()
            )));
        }
        let cancel = CancellationToken::new();
        *slot = Some(ActiveRun {
            kind,
            cancel: cancel.clone(),
        });
        Ok(RunGuard {
            slot: self.active.clone(),
            kind,
            cancel,
        })
    }

    /// The kind of the active run, if any.
    pub fn active(&self) -> Option<RunKind> {
        lock(&self.active).as_ref().map(|a| a.kind)
    }

    /// Cancels the active run. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(active) => {
                tracing::info!(kind = active.kind.as_str(), "Stop requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// `start-harvest(targetCount)`; `None` uses the configured target.
    pub async fn start_harvest(&self, target: Option<usize>) -> Result<HarvestResult, AppError> {
        let guard = self.begin(RunKind::Harvest)?;
        self.harvest(&guard, target).await
    }

    /// Harvest under an already claimed guard.
    pub async fn harvest(
        &self,
        guard: &RunGuard,
        target: Option<usize>,
    ) -> Result<HarvestResult, AppError> {
        let target = target.unwrap_or(self.config.target_count);
        if target == 0 {
            return Err(AppError::ConfigError("target count must be at least 1".into()));
        }
        let exclusions = self.exclusions().await?;
        let ctx = self.run_context(guard);

        let result = self
            .harvester()
            .harvest(
                target,
                &exclusions,
                &ctx,
                &self.progress(),
                &TracingHarvestReporter,
            )
            .await;

        match &result {
            Ok(r) => {
                self.log()
                    .append(
                        "Global",
                        format!(
                            "Harvested {} accounts ({} retained)",
                            r.non_excluded_count, r.excluded_count
                        ),
                    )
                    .await
            }
            Err(e) => self.log().append("Global", format!("Harvest failed: {e}")).await,
        }
        result
    }

    /// `start-execution(entityList | resume)`.
    pub async fn start_execution<C: Confirmation>(
        &self,
        request: ExecutionRequest,
        confirmation: &C,
    ) -> Result<ExecutionOutcome, AppError> {
        let guard = self.begin(RunKind::Execution)?;
        self.execute(&guard, request, confirmation).await
    }

    /// Execution under an already claimed guard.
    pub async fn execute<C: Confirmation>(
        &self,
        guard: &RunGuard,
        request: ExecutionRequest,
        confirmation: &C,
    ) -> Result<ExecutionOutcome, AppError> {
        let mut ctx = self.run_context(guard);
        self.executor()
            .run(request, confirmation, &mut ctx, &TracingExecutorReporter)
            .await
    }

    /// Scrolls the list to its bottom. Returns the final extent.
    pub async fn scroll_to_bottom(&self) -> Result<f64, AppError> {
        let guard = self.begin(RunKind::ScrollToBottom)?;
        self.scroll(&guard).await
    }

    /// Scroll-to-bottom under an already claimed guard.
    pub async fn scroll(&self, guard: &RunGuard) -> Result<f64, AppError> {
        let ctx = self.run_context(guard);
        self.host
            .wait_for(&self.config.selectors.cell, self.config.harvest.render_timeout)
            .await?;
        self.harvester()
            .descend(&ctx, &TracingHarvestReporter)
            .await
    }

    /// `get-progress()`.
    pub async fn progress_snapshot(&self) -> Result<ProgressSnapshot, AppError> {
        self.progress().latest().await
    }

    /// `mark-retained(id, bool)`. Returns the updated exclusion set.
    pub async fn mark_retained(&self, id: &str, retained: bool) -> Result<ExclusionSet, AppError> {
        let id = id.trim().trim_start_matches('@');
        if id.is_empty() {
            return Err(AppError::ConfigError("entity id must not be empty".into()));
        }
        let mut exclusions = self.exclusions().await?;
        if exclusions.mark_retained(id, retained) {
            write_key(&self.store, keys::EXCLUSION_SET, &exclusions).await?;
            let message = if retained { "Retained" } else { "No longer retained" };
            self.log().append(id, message).await;
        }
        Ok(exclusions)
    }

    pub async fn exclusions(&self) -> Result<ExclusionSet, AppError> {
        Ok(read_key(&self.store, keys::EXCLUSION_SET)
            .await?
            .unwrap_or_default())
    }

    /// Last persisted harvest result (possibly partial).
    pub async fn harvest_result(&self) -> Result<Option<HarvestResult>, AppError> {
        read_key(&self.store, keys::HARVEST_RESULT).await
    }

    /// The action list of the last harvest with current exclusions applied.
    pub async fn action_list(&self) -> Result<Option<Vec<Entity>>, AppError> {
        let Some(result) = self.harvest_result().await? else {
            return Ok(None);
        };
        let exclusions = self.exclusions().await?;
        Ok(Some(result.action_list(&exclusions)))
    }

    pub async fn logs(&self) -> Result<Vec<DiagnosticEntry>, AppError> {
        self.log().entries().await
    }

    /// Clears every persisted run record except the exclusion set.
    pub async fn reset(&self) -> Result<(), AppError> {
        if let Some(kind) = self.active() {
            return Err(AppError::Conflict(format!(
                "Cannot reset while a {} is running",
                kind.as_str()
            )));
        }
        self.store.remove(RESET_KEYS).await?;
        tracing::info!("Persisted run state cleared");
        Ok(())
    }

    fn run_context(&self, guard: &RunGuard) -> RunContext {
        RunContext::new(guard.token().clone()).with_jitter(self.config.pacing.jitter)
    }

    fn harvester(&self) -> Harvester<H, P> {
        Harvester::new(
            self.host.clone(),
            self.parser.clone(),
            self.config.selectors.clone(),
            self.config.harvest.clone(),
            self.config.pacing.clone(),
        )
    }

    fn executor(&self) -> BatchExecutor<H, P, A, S, O> {
        BatchExecutor::new(
            self.host.clone(),
            self.parser.clone(),
            self.trigger.clone(),
            self.store.clone(),
            self.observer.clone(),
            self.config.selectors.clone(),
            self.config.executor.clone(),
            self.config.pacing.clone(),
        )
    }

    fn progress(&self) -> ProgressReporter<S, O> {
        ProgressReporter::new(self.store.clone(), self.observer.clone())
    }

    fn log(&self) -> DiagnosticLog<S> {
        DiagnosticLog::new(self.store.clone())
    }
}
