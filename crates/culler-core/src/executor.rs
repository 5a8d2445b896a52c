//! Batch Action Executor.
//!
//! ```text
//! INIT -> (CONFIRM) -> RUNNING <-> PAUSED_RATE_LIMIT -> COMPLETED | STOPPED | ERRORED
//! ```
//!
//! Each RUNNING cycle sweeps the rendered cells for pending ids, then looks
//! up the head of the FIFO with bounded, accelerating scroll passes. A head
//! that cannot be found is requeued at the tail, never dropped. An entity
//! leaves `pending` only by being completed, and is completed only after
//! its confirmation control was activated.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{ExecutorConfig, PacingConfig, ScrollPass, Selectors};
use crate::confirm::Confirmation;
use crate::error::AppError;
use crate::models::{Entity, ExclusionSet, HarvestResult};
use crate::progress::{DiagnosticLog, ObserverEvent, ProgressReporter, ProgressSnapshot, RunStatus};
use crate::rate_limit::RateLimitController;
use crate::scheduler::RunContext;
use crate::store::{keys, read_key, write_key};
use crate::task_state::{ResumeSource, TaskState, TaskStateStore};
use crate::traits::{
    ActionTrigger, CellHandle, CellParser, ObserverChannel, PersistentStore, RenderedListHost,
};

const MAIN_SCOPE: &str = "Main";

/// Executor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Init,
    Confirm,
    Running,
    PausedRateLimit,
    Completed,
    Stopped,
    Errored,
}

impl ExecutorState {
    pub fn status(&self) -> RunStatus {
        match self {
            ExecutorState::Init => RunStatus::Idle,
            ExecutorState::Confirm => RunStatus::Confirming,
            ExecutorState::Running => RunStatus::Running,
            ExecutorState::PausedRateLimit => RunStatus::PausedRateLimit,
            ExecutorState::Completed => RunStatus::Completed,
            ExecutorState::Stopped => RunStatus::Stopped,
            ExecutorState::Errored => RunStatus::Errored,
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// What a run starts from.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Entities to action. `None` resumes the persisted task only.
    pub entities: Option<Vec<Entity>>,
    /// Drop any saved task and record `entities` as the new target list.
    pub reseed: bool,
}

impl ExecutionRequest {
    pub fn resume() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: Vec<Entity>) -> Self {
        Self {
            entities: Some(entities),
            reseed: false,
        }
    }

    pub fn reseeded(entities: Vec<Entity>) -> Self {
        Self {
            entities: Some(entities),
            reseed: true,
        }
    }
}

/// Terminal state of a run and its final counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub state: ExecutorState,
    pub completed: usize,
    pub pending: usize,
    pub error: Option<String>,
}

/// Liveness record persisted under `heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub at: DateTime<Utc>,
    pub pending: usize,
    pub completed: usize,
}

/// Events emitted by the executor for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ExecutorEvent<'a> {
    Transition {
        from: ExecutorState,
        to: ExecutorState,
    },
    Started {
        pending: usize,
        source: ResumeSource,
    },
    Resumed {
        pending: usize,
        completed: usize,
    },
    Confirmed {
        accepted: bool,
        remember: bool,
    },
    WarmedUp {
        actioned: usize,
    },
    Swept {
        visible: usize,
        actioned: usize,
    },
    Actioned {
        id: &'a str,
        completed: usize,
        pending: usize,
    },
    ActionFailed {
        id: &'a str,
        reason: &'a str,
    },
    LookupMissed {
        id: &'a str,
        attempt: u32,
    },
    Requeued {
        id: &'a str,
    },
    Withdrawn {
        id: &'a str,
    },
    StallJump {
        distance: f64,
    },
    RateLimited {
        cooldown: Duration,
    },
    CooldownEnded,
    Completed {
        completed: usize,
    },
    Stopped {
        completed: usize,
        pending: usize,
    },
    Errored {
        error: &'a str,
    },
}

/// Trait for receiving executor events (decoupled logging).
pub trait ExecutorReporter: Send + Sync {
    fn report(&self, event: ExecutorEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExecutorReporter;

impl ExecutorReporter for TracingExecutorReporter {
    fn report(&self, event: ExecutorEvent<'_>) {
        match event {
            ExecutorEvent::Transition { from, to } => {
                tracing::debug!(%from, %to, "Executor state change");
            }
            ExecutorEvent::Started { pending, source } => {
                tracing::info!(%pending, ?source, "Execution started");
            }
            ExecutorEvent::Resumed { pending, completed } => {
                tracing::info!(%pending, %completed, "Resuming saved task");
            }
            ExecutorEvent::Confirmed { accepted, remember } => {
                tracing::info!(%accepted, %remember, "Operator decision");
            }
            ExecutorEvent::WarmedUp { actioned } => {
                tracing::info!(%actioned, "Warm-up sweep done");
            }
            ExecutorEvent::Swept { visible, actioned } => {
                tracing::debug!(%visible, %actioned, "Sweep");
            }
            ExecutorEvent::Actioned {
                id,
                completed,
                pending,
            } => {
                tracing::info!(%id, %completed, %pending, "Entity actioned");
            }
            ExecutorEvent::ActionFailed { id, reason } => {
                tracing::warn!(%id, %reason, "Action failed");
            }
            ExecutorEvent::LookupMissed { id, attempt } => {
                tracing::debug!(%id, %attempt, "Entity not found");
            }
            ExecutorEvent::Requeued { id } => {
                tracing::info!(%id, "Entity requeued");
            }
            ExecutorEvent::Withdrawn { id } => {
                tracing::info!(%id, "Entity retained, withdrawn from batch");
            }
            ExecutorEvent::StallJump { distance } => {
                tracing::info!(%distance, "No progress, jumping ahead");
            }
            ExecutorEvent::RateLimited { cooldown } => {
                tracing::warn!(cooldown_secs = cooldown.as_secs(), "Rate limited, pausing");
            }
            ExecutorEvent::CooldownEnded => {
                tracing::info!("Cooldown over, resuming");
            }
            ExecutorEvent::Completed { completed } => {
                tracing::info!(%completed, "Execution completed");
            }
            ExecutorEvent::Stopped { completed, pending } => {
                tracing::info!(%completed, %pending, "Execution stopped");
            }
            ExecutorEvent::Errored { error } => {
                tracing::error!(%error, "Execution halted, can be restarted");
            }
        }
    }
}

/// Per-run mutable state.
struct Batch {
    task: TaskState,
    exclusions: ExclusionSet,
    state: ExecutorState,
    /// Where the next cursor sweep starts.
    cursor: f64,
    last_heartbeat: Option<Instant>,
}

/// Result of a bounded scroll pass.
#[derive(Debug, Clone, Copy, Default)]
struct PassOutcome {
    actioned: usize,
    at_end: bool,
}

/// Consumes pending entities one action at a time.
pub struct BatchExecutor<H, P, A, S, O> {
    host: H,
    parser: P,
    trigger: A,
    store: S,
    tasks: TaskStateStore<S>,
    progress: ProgressReporter<S, O>,
    log: DiagnosticLog<S>,
    rate_limit: RateLimitController,
    selectors: Selectors,
    config: ExecutorConfig,
    pacing: PacingConfig,
}

impl<H, P, A, S, O> BatchExecutor<H, P, A, S, O>
where
    H: RenderedListHost,
    P: CellParser,
    A: ActionTrigger,
    S: PersistentStore,
    O: ObserverChannel,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: H,
        parser: P,
        trigger: A,
        store: S,
        observer: O,
        selectors: Selectors,
        config: ExecutorConfig,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            host,
            parser,
            trigger,
            tasks: TaskStateStore::new(store.clone()),
            progress: ProgressReporter::new(store.clone(), observer),
            log: DiagnosticLog::new(store.clone()),
            rate_limit: RateLimitController::new(config.cooldown),
            store,
            selectors,
            config,
            pacing,
        }
    }

    /// Runs a batch to a terminal state.
    ///
    /// Returns `Err` only for failures before the batch starts running
    /// (store unreadable, nothing to resume). Once running, every ending
    /// is an [`ExecutionOutcome`]; an errored run keeps its task state and
    /// resumes on the next start.
    pub async fn run<C, R>(
        &self,
        request: ExecutionRequest,
        confirmation: &C,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<ExecutionOutcome, AppError>
    where
        C: Confirmation,
        R: ExecutorReporter,
    {
        let exclusions: ExclusionSet = read_key(&self.store, keys::EXCLUSION_SET)
            .await?
            .unwrap_or_default();

        if request.reseed {
            if let Some(list) = &request.entities {
                self.tasks.reseed(list).await?;
                self.log
                    .append(MAIN_SCOPE, format!("Reseeded with {} entities", list.len()))
                    .await;
            }
        }

        let plan = self.tasks.resume(request.entities, &exclusions).await?;
        let mut batch = Batch {
            task: plan.state,
            exclusions,
            state: ExecutorState::Init,
            cursor: 0.0,
            last_heartbeat: None,
        };

        if plan.source == ResumeSource::Resumed {
            reporter.report(ExecutorEvent::Resumed {
                pending: batch.task.pending.len(),
                completed: batch.task.completed.len(),
            });
            self.log
                .append(
                    MAIN_SCOPE,
                    format!(
                        "Resuming: {} pending, {} completed",
                        batch.task.pending.len(),
                        batch.task.completed.len()
                    ),
                )
                .await;
        } else {
            reporter.report(ExecutorEvent::Started {
                pending: batch.task.pending.len(),
                source: plan.source,
            });
            if !batch.task.is_finished() {
                if let Some(outcome) = self
                    .confirm(&mut batch, confirmation, ctx, reporter)
                    .await?
                {
                    return Ok(outcome);
                }
            }
        }

        self.enter(&mut batch, ExecutorState::Running, reporter);
        match self.drive(&mut batch, ctx, reporter).await {
            Ok(()) => self.complete(&mut batch, reporter).await,
            Err(AppError::Cancelled) => Ok(self.stop(&mut batch, true, reporter).await),
            Err(e) => Ok(self.halt(&mut batch, &e, reporter).await),
        }
    }

    /// CONFIRM. Returns an outcome if the run ends here.
    async fn confirm<C, R>(
        &self,
        batch: &mut Batch,
        confirmation: &C,
        ctx: &RunContext,
        reporter: &R,
    ) -> Result<Option<ExecutionOutcome>, AppError>
    where
        C: Confirmation,
        R: ExecutorReporter,
    {
        self.enter(batch, ExecutorState::Confirm, reporter);
        self.progress
            .publish(self.snapshot(batch, RunStatus::Confirming))
            .await;

        let decision = tokio::select! {
            decision = confirmation.confirm(&batch.task.pending) => decision?,
            () = ctx.token().cancelled() => {
                // Never accepted: nothing to persist.
                return Ok(Some(self.stop(batch, false, reporter).await));
            }
        };
        reporter.report(ExecutorEvent::Confirmed {
            accepted: decision.accepted,
            remember: decision.remember,
        });

        if !decision.accepted {
            self.tasks.clear().await?;
            self.log.append(MAIN_SCOPE, "Batch rejected by operator").await;
            return Ok(Some(self.stop(batch, false, reporter).await));
        }
        if decision.remember {
            write_key(&self.store, keys::AUTO_CONFIRM, &true).await?;
        }
        self.tasks.save(&batch.task).await?;
        Ok(None)
    }

    /// RUNNING loop. Returns `Ok` once pending is empty.
    async fn drive<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        self.refresh_exclusions(batch, reporter).await?;
        if batch.task.is_finished() {
            return Ok(());
        }

        self.host
            .wait_for(&self.selectors.cell, self.config.render_timeout)
            .await?;
        self.progress
            .publish(self.snapshot(batch, RunStatus::Running))
            .await;

        if batch.task.pending.len() > self.config.warmup_threshold {
            match self.warm_up(batch, ctx, reporter).await {
                Ok(()) => {}
                Err(AppError::RateLimitExceeded) => self.cool_down(batch, ctx, reporter).await?,
                Err(e) => return Err(e),
            }
        }

        loop {
            ctx.check()?;
            self.refresh_exclusions(batch, reporter).await?;
            if batch.task.is_finished() {
                return Ok(());
            }
            self.heartbeat(batch).await;

            if ctx.counters.consecutive_errors >= self.config.max_consecutive_errors {
                return Err(AppError::HostError(format!(
                    "{} consecutive failures",
                    ctx.counters.consecutive_errors
                )));
            }

            if self.rate_limit.detect(&self.host).await? {
                self.cool_down(batch, ctx, reporter).await?;
                continue;
            }

            match self.cycle(batch, ctx, reporter).await {
                Ok(actioned) if actioned > 0 => {
                    ctx.counters.empty_cycles = 0;
                    ctx.sleep(self.pacing.action_delay).await?;
                }
                Ok(_) => {
                    ctx.counters.empty_cycles += 1;
                    if ctx.counters.empty_cycles >= self.config.stall_threshold {
                        ctx.counters.empty_cycles = 0;
                        self.long_jump(batch, ctx, reporter).await?;
                    }
                }
                Err(AppError::RateLimitExceeded) => self.cool_down(batch, ctx, reporter).await?,
                Err(e) if e.is_retryable() => {
                    ctx.counters.consecutive_errors += 1;
                    self.log.append(MAIN_SCOPE, e.to_string()).await;
                    ctx.sleep(self.pacing.scroll_delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sweep, then head lookup with retries, then requeue on miss.
    /// Returns the number of entities actioned.
    async fn cycle<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<usize, AppError> {
        let swept = self.sweep(batch, ctx, reporter).await?;
        if swept > 0 {
            return Ok(swept);
        }

        let Some(head) = batch.task.head().cloned() else {
            return Ok(0);
        };

        for attempt in 0..=self.config.lookup_retries {
            if attempt > 0 {
                ctx.sleep(self.pacing.action_delay).await?;
            }
            match self.lookup(&head, batch, ctx, reporter).await {
                Ok(actioned) => return Ok(actioned),
                Err(AppError::LookupMiss(_)) => {}
                Err(e) if e.is_retryable() => {
                    ctx.counters.consecutive_errors += 1;
                    self.log.append(&head.id, e.to_string()).await;
                }
                Err(e) => return Err(e),
            }
            reporter.report(ExecutorEvent::LookupMissed {
                id: &head.id,
                attempt: attempt + 1,
            });
        }

        if batch.task.requeue(&head.id) {
            self.tasks.save(&batch.task).await?;
            reporter.report(ExecutorEvent::Requeued { id: &head.id });
            self.log
                .append(&head.id, "Not found, requeued at the tail")
                .await;
        }
        Ok(0)
    }

    /// One lookup attempt: current view, fast rounds, then the cursor sweep.
    /// Any pending entity found on the way is actioned.
    async fn lookup<R: ExecutorReporter>(
        &self,
        target: &Entity,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<usize, AppError> {
        let actioned = self.sweep(batch, ctx, reporter).await?;
        if actioned > 0 {
            return Ok(actioned);
        }

        for _ in 0..self.config.fast_rounds {
            let pass = self
                .scroll_pass(&self.config.fast_pass, self.pacing.fast_delay, batch, ctx, reporter)
                .await?;
            if pass.actioned > 0 {
                return Ok(pass.actioned);
            }
            if pass.at_end {
                break;
            }
        }

        let actioned = self.cursor_sweep(batch, ctx, reporter).await?;
        if actioned > 0 {
            return Ok(actioned);
        }
        Err(AppError::LookupMiss(target.id.clone()))
    }

    /// Fixed-step forward pass, sweeping every `check_every` steps.
    async fn scroll_pass<R: ExecutorReporter>(
        &self,
        pass: &ScrollPass,
        delay: Duration,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<PassOutcome, AppError> {
        let distance = self.host.viewport_height().await? * pass.viewports;
        let mut last_extent = self.host.current_extent().await?;
        let mut unchanged = 0;

        for step in 1..=pass.max_steps {
            ctx.check()?;
            let before = self.host.current_position().await?;
            self.host.scroll_by(distance).await?;
            ctx.sleep(delay).await?;

            let extent = self.host.current_extent().await?;
            if (extent - last_extent).abs() < 1.0 {
                unchanged += 1;
            } else {
                unchanged = 0;
                last_extent = extent;
            }
            let at_end = (self.host.current_position().await? - before).abs() < 1.0;

            if step % pass.check_every.max(1) == 0 || at_end {
                let actioned = self.sweep(batch, ctx, reporter).await?;
                if actioned > 0 {
                    return Ok(PassOutcome {
                        actioned,
                        at_end: false,
                    });
                }
            }
            if at_end || unchanged >= pass.unchanged_limit {
                return Ok(PassOutcome {
                    actioned: 0,
                    at_end,
                });
            }
        }
        Ok(PassOutcome::default())
    }

    /// Overlapping steps from the saved cursor, sweeping as configured.
    /// Wraps the cursor to the top at the end of the list, so successive
    /// attempts cover every rendered entity.
    async fn cursor_sweep<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<usize, AppError> {
        let pass = self.config.regular_pass;
        let distance = self.host.viewport_height().await? * pass.viewports;

        self.host.scroll_to(batch.cursor).await?;
        ctx.sleep(self.pacing.search_delay).await?;
        let actioned = self.sweep(batch, ctx, reporter).await?;
        if actioned > 0 {
            return Ok(actioned);
        }

        for step in 1..=pass.max_steps {
            ctx.check()?;
            let before = self.host.current_position().await?;
            self.host.scroll_by(distance).await?;
            ctx.sleep(self.pacing.search_delay).await?;
            let position = self.host.current_position().await?;

            let at_end = (position - before).abs() < 1.0;
            batch.cursor = if at_end { 0.0 } else { position };

            if step % pass.check_every.max(1) == 0 || at_end {
                let actioned = self.sweep(batch, ctx, reporter).await?;
                if actioned > 0 {
                    return Ok(actioned);
                }
            }
            if at_end {
                break;
            }
        }
        Ok(0)
    }

    /// Initial accelerated sweep over a large batch.
    async fn warm_up<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        let start = ctx.counters.actions;
        self.sweep(batch, ctx, reporter).await?;

        for _ in 0..self.config.warmup_rounds {
            if (ctx.counters.actions - start) as usize > self.config.warmup_success_stop {
                break;
            }
            let pass = self
                .scroll_pass(
                    &self.config.warmup_pass,
                    self.pacing.fast_delay,
                    batch,
                    ctx,
                    reporter,
                )
                .await?;
            if pass.at_end {
                break;
            }
        }

        self.host.scroll_to(0.0).await?;
        reporter.report(ExecutorEvent::WarmedUp {
            actioned: (ctx.counters.actions - start) as usize,
        });
        Ok(())
    }

    /// Stall guard: one long-distance jump, wrapping to the top at the end.
    async fn long_jump<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        let distance = self.host.viewport_height().await? * self.config.long_jump_viewports;
        reporter.report(ExecutorEvent::StallJump { distance });
        self.log.append(MAIN_SCOPE, "No progress, jumping ahead").await;

        let before = self.host.current_position().await?;
        self.host.scroll_by(distance).await?;
        ctx.sleep(self.pacing.scroll_delay).await?;
        if (self.host.current_position().await? - before).abs() < 1.0 {
            self.host.scroll_to(0.0).await?;
            ctx.sleep(self.pacing.scroll_delay).await?;
        }

        self.sweep(batch, ctx, reporter).await?;
        Ok(())
    }

    /// Actions every rendered cell whose entity is pending.
    ///
    /// The enumeration only picks candidates. Each action re-reads the
    /// rendered cells, since activating a control scrolls the list.
    async fn sweep<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<usize, AppError> {
        let cells = self.host.enumerate(&self.selectors.cell).await?;
        let mut seen = HashSet::new();
        let candidates: Vec<String> = cells
            .iter()
            .filter_map(|cell| self.parser.parse(cell))
            .map(|entity| entity.id)
            .filter(|id| seen.insert(id.clone()))
            .filter(|id| !batch.exclusions.contains(id) && batch.task.is_pending(id))
            .collect();

        let mut actioned = 0;
        for id in &candidates {
            ctx.check()?;
            if self.rate_limit.detect(&self.host).await? {
                return Err(AppError::RateLimitExceeded);
            }
            if self.action(batch, id, ctx, reporter).await? {
                actioned += 1;
            }
        }

        reporter.report(ExecutorEvent::Swept {
            visible: cells.len(),
            actioned,
        });
        Ok(actioned)
    }

    /// The cell currently rendering `id`, parsed from a fresh enumeration.
    async fn rendered_cell(&self, id: &str) -> Result<Option<CellHandle>, AppError> {
        let cells = self.host.enumerate(&self.selectors.cell).await?;
        Ok(cells
            .into_iter()
            .find(|cell| self.parser.parse(cell).is_some_and(|e| e.id == id)))
    }

    /// Actions one entity. Per-entity failures are isolated: they count
    /// toward the error streak and return `Ok(false)`. Only the rate-limit
    /// signal, cancellation and store failures propagate.
    async fn action<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        id: &str,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<bool, AppError> {
        let Some(cell) = self.rendered_cell(id).await? else {
            // Scrolled out by an earlier action; a later pass finds it.
            return Ok(false);
        };
        let failure = match self.activate(&cell, id).await {
            Ok(true) => None,
            Ok(false) => Some("no action control or confirmation prompt".to_string()),
            Err(e) if RateLimitController::is_signal(&e) || e.is_cancellation() => return Err(e),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            ctx.counters.consecutive_errors += 1;
            reporter.report(ExecutorEvent::ActionFailed {
                id,
                reason: &reason,
            });
            self.log.append(id, reason).await;
            return Ok(false);
        }

        batch.task.complete(id);
        self.tasks.save(&batch.task).await?;
        ctx.counters.actions += 1;
        ctx.counters.consecutive_errors = 0;

        self.trim_preview(id).await;
        self.progress
            .publish(self.snapshot(batch, RunStatus::Running))
            .await;
        reporter.report(ExecutorEvent::Actioned {
            id,
            completed: batch.task.completed.len(),
            pending: batch.task.pending.len(),
        });
        self.log.append(id, "Actioned").await;
        Ok(true)
    }

    /// Locate, activate, wait for the prompt, confirm. Not interruptible
    /// by a stop once the trigger is activated; bounded by the prompt
    /// timeout. `Ok(true)` only if the confirm control was activated.
    async fn activate(&self, cell: &CellHandle, id: &str) -> Result<bool, AppError> {
        let Some(control) = self.trigger.locate(cell) else {
            return Ok(false);
        };
        let control = control.bound_to(id);
        self.trigger.activate(&control).await?;
        tokio::time::sleep(self.pacing.action_delay).await;

        let Some(confirm) = self
            .trigger
            .confirmation_prompt(self.config.confirm_timeout)
            .await?
        else {
            return Ok(false);
        };
        self.trigger.activate(&confirm).await?;
        tokio::time::sleep(self.pacing.confirm_delay).await;
        Ok(true)
    }

    async fn cool_down<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        ctx: &mut RunContext,
        reporter: &R,
    ) -> Result<(), AppError> {
        self.enter(batch, ExecutorState::PausedRateLimit, reporter);
        reporter.report(ExecutorEvent::RateLimited {
            cooldown: self.rate_limit.cooldown(),
        });
        self.log
            .append(MAIN_SCOPE, "Rate limit detected, cooling down")
            .await;

        let snapshot = self.snapshot(batch, RunStatus::Running);
        self.rate_limit.pause(ctx, &self.progress, &snapshot).await?;

        self.enter(batch, ExecutorState::Running, reporter);
        reporter.report(ExecutorEvent::CooldownEnded);
        Ok(())
    }

    /// Withdraws pending entities retained since the run started.
    async fn refresh_exclusions<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        reporter: &R,
    ) -> Result<(), AppError> {
        batch.exclusions = read_key(&self.store, keys::EXCLUSION_SET)
            .await?
            .unwrap_or_default();
        let withdrawn = batch.task.withdraw_excluded(&batch.exclusions);
        if withdrawn.is_empty() {
            return Ok(());
        }
        self.tasks.save(&batch.task).await?;
        for entity in &withdrawn {
            reporter.report(ExecutorEvent::Withdrawn { id: &entity.id });
            self.log
                .append(&entity.id, "Retained, withdrawn from batch")
                .await;
        }
        Ok(())
    }

    /// Persists a heartbeat at most every `heartbeat_interval`.
    async fn heartbeat(&self, batch: &mut Batch) {
        let now = Instant::now();
        if batch
            .last_heartbeat
            .is_some_and(|at| now.duration_since(at) < self.config.heartbeat_interval)
        {
            return;
        }
        batch.last_heartbeat = Some(now);
        let beat = Heartbeat {
            at: Utc::now(),
            pending: batch.task.pending.len(),
            completed: batch.task.completed.len(),
        };
        if let Err(e) = write_key(&self.store, keys::HEARTBEAT, &beat).await {
            tracing::debug!(error = %e, "Failed to write heartbeat");
        }
    }

    /// Drops an actioned entity from the persisted harvest preview.
    async fn trim_preview(&self, id: &str) {
        let result: Result<(), AppError> = async {
            let Some(mut preview) =
                read_key::<_, HarvestResult>(&self.store, keys::HARVEST_RESULT).await?
            else {
                return Ok(());
            };
            if preview.remove(id) {
                write_key(&self.store, keys::HARVEST_RESULT, &preview).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, %id, "Failed to update harvest preview");
        }
    }

    /// COMPLETED: final snapshot, clear the task, notify.
    async fn complete<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        reporter: &R,
    ) -> Result<ExecutionOutcome, AppError> {
        self.enter(batch, ExecutorState::Completed, reporter);
        self.progress
            .publish(self.snapshot(batch, RunStatus::Completed))
            .await;
        self.tasks.clear().await?;

        let completed = batch.task.completed.len();
        self.progress
            .notify(ObserverEvent::Completed {
                unfollowed: completed,
            })
            .await;
        reporter.report(ExecutorEvent::Completed { completed });
        self.log
            .append(MAIN_SCOPE, format!("Completed, {completed} actioned"))
            .await;
        Ok(self.outcome(batch, None))
    }

    /// STOPPED: persist pending/completed as-is if the run was accepted.
    async fn stop<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        persist: bool,
        reporter: &R,
    ) -> ExecutionOutcome {
        self.enter(batch, ExecutorState::Stopped, reporter);
        if persist {
            if let Err(e) = self.tasks.save(&batch.task).await {
                tracing::error!(error = %e, "Failed to persist task state on stop");
            }
        }
        self.progress
            .publish(self.snapshot(batch, RunStatus::Stopped))
            .await;
        self.progress
            .notify(ObserverEvent::Stopped {
                unfollowed: batch.task.completed.len(),
            })
            .await;
        reporter.report(ExecutorEvent::Stopped {
            completed: batch.task.completed.len(),
            pending: batch.task.pending.len(),
        });
        self.log.append(MAIN_SCOPE, "Stopped by operator").await;
        self.outcome(batch, None)
    }

    /// ERRORED: task state kept for a later resume.
    async fn halt<R: ExecutorReporter>(
        &self,
        batch: &mut Batch,
        error: &AppError,
        reporter: &R,
    ) -> ExecutionOutcome {
        self.enter(batch, ExecutorState::Errored, reporter);
        let message = error.to_string();
        if let Err(e) = self.tasks.save(&batch.task).await {
            tracing::error!(error = %e, "Failed to persist task state after error");
        }
        self.progress
            .publish(self.snapshot(batch, RunStatus::Errored).with_error(&message))
            .await;
        self.progress
            .notify(ObserverEvent::Errored {
                message: message.clone(),
            })
            .await;
        reporter.report(ExecutorEvent::Errored { error: &message });
        self.log.append(MAIN_SCOPE, message.clone()).await;
        self.outcome(batch, Some(message))
    }

    fn enter<R: ExecutorReporter>(&self, batch: &mut Batch, to: ExecutorState, reporter: &R) {
        let from = std::mem::replace(&mut batch.state, to);
        reporter.report(ExecutorEvent::Transition { from, to });
    }

    fn snapshot(&self, batch: &Batch, status: RunStatus) -> ProgressSnapshot {
        ProgressSnapshot::new(
            status,
            batch.task.total_target,
            batch.task.total_target,
            batch.task.completed.len(),
        )
    }

    fn outcome(&self, batch: &Batch, error: Option<String>) -> ExecutionOutcome {
        ExecutionOutcome {
            state: batch.state,
            completed: batch.task.completed.len(),
            pending: batch.task.pending.len(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{AutoConfirm, Decision, Interactive};
    use crate::store::MemoryStore;
    use crate::testutil::{FakeList, FakeParser, MockReporter, RecordingObserver, ScriptedOperator};
    use tokio_util::sync::CancellationToken;

    type TestExecutor = BatchExecutor<FakeList, FakeParser, FakeList, MemoryStore, RecordingObserver>;

    fn executor(list: &FakeList, store: &MemoryStore, observer: &RecordingObserver) -> TestExecutor {
        BatchExecutor::new(
            list.clone(),
            FakeParser,
            list.clone(),
            store.clone(),
            observer.clone(),
            Selectors::default(),
            ExecutorConfig::default(),
            PacingConfig::immediate(),
        )
    }

    fn rows(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("user{i:03}")).collect()
    }

    fn targets(ids: &[&str]) -> Vec<Entity> {
        ids.iter().map(|id| Entity::new(*id, *id)).collect()
    }

    async fn saved(store: &MemoryStore) -> Option<TaskState> {
        TaskStateStore::new(store.clone()).load().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn completes_batch_and_clears_state() {
        let all = rows(60);
        let list = FakeList::new(&all);
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();
        let picked: Vec<&str> = all.iter().step_by(4).map(String::as_str).collect();
        assert_eq!(picked.len(), 15);

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&picked)),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Completed);
        assert_eq!(outcome.completed, 15);
        assert_eq!(outcome.pending, 0);
        assert!(saved(&store).await.is_none());

        let confirmed = list.confirmed_ids();
        assert_eq!(confirmed.len(), 15);
        assert_eq!(confirmed.iter().collect::<HashSet<_>>().len(), 15);
        assert!(confirmed.iter().all(|id| picked.contains(&id.as_str())));

        assert!(
            observer
                .events()
                .iter()
                .any(|e| matches!(e, ObserverEvent::Completed { unfollowed: 15 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resumes_without_reactioning() {
        let all = rows(40);
        let list = FakeList::new(&all);
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();
        let batch = targets(&["user002", "user005", "user012", "user025", "user033"]);

        let token = CancellationToken::new();
        list.cancel_after(2, token.clone());
        let mut ctx = RunContext::new(token);
        let first = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(batch.clone()),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();
        assert_eq!(first.state, ExecutorState::Stopped);

        let persisted = saved(&store).await.unwrap();
        assert_eq!(persisted.pending.len(), 3);
        assert_eq!(persisted.completed.len(), 2);
        let done_first: Vec<String> = list.confirmed_ids();

        // Fresh executor, same store: only persisted state survives.
        let reporter = MockReporter::new();
        let mut ctx = RunContext::new(CancellationToken::new());
        let second = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&["ignored"])),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();
        assert_eq!(second.state, ExecutorState::Completed);
        assert_eq!(second.completed, 5);
        assert!(reporter.contains("Resumed"));

        let confirmed = list.confirmed_ids();
        assert_eq!(confirmed.len(), 5);
        assert_eq!(confirmed[..2], done_first[..]);
        assert!(!confirmed.contains(&"ignored".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_pauses_without_actions() {
        let all = rows(30);
        let list = FakeList::new(&all);
        list.rate_limit_after(2, Duration::from_secs(60));
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&[
                    "user001", "user002", "user003", "user004", "user005",
                ])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state, ExecutorState::Completed);

        let times = list.confirmed_at();
        assert_eq!(times.len(), 5);
        let signal = times[1];
        assert!(
            times[2..]
                .iter()
                .all(|t| t.duration_since(signal) >= Duration::from_secs(300))
        );

        let paused: Vec<_> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Progress(s) if s.status == RunStatus::PausedRateLimit => {
                    Some(s.unfollowed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(paused, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_stops_and_clears() {
        let list = FakeList::new(&rows(10));
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();
        let operator = ScriptedOperator::new(vec![Decision::reject()]);

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&["user001"])),
                &Interactive::new(operator.clone()),
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Stopped);
        assert_eq!(operator.asked(), 1);
        assert!(saved(&store).await.is_none());
        assert!(list.confirmed_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remember_persists_auto_confirm() {
        let list = FakeList::new(&rows(10));
        let store = MemoryStore::new();
        let operator = ScriptedOperator::new(vec![Decision::accept_and_remember()]);

        let mut ctx = RunContext::new(CancellationToken::new());
        executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["user001"])),
                &Interactive::new(operator),
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        let flag: Option<bool> = read_key(&store, keys::AUTO_CONFIRM).await.unwrap();
        assert_eq!(flag, Some(true));
    }

    /// Stops the run the first time an event of the named kind is reported.
    struct StopOn {
        kind: &'static str,
        token: CancellationToken,
        inner: MockReporter,
    }

    impl StopOn {
        fn new(kind: &'static str, token: &CancellationToken) -> Self {
            Self {
                kind,
                token: token.clone(),
                inner: MockReporter::new(),
            }
        }
    }

    impl ExecutorReporter for StopOn {
        fn report(&self, event: ExecutorEvent<'_>) {
            if format!("{event:?}").starts_with(self.kind) {
                self.token.cancel();
            }
            self.inner.report(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unfindable_head_is_requeued_not_dropped() {
        let list = FakeList::new(&rows(60));
        let store = MemoryStore::new();
        let token = CancellationToken::new();
        let reporter = StopOn::new("Requeued", &token);

        let mut ctx = RunContext::new(token);
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["ghost", "user030", "user050"])),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Stopped);
        assert_eq!(outcome.completed, 2);
        assert!(reporter.inner.contains("LookupMissed"));

        let persisted = saved(&store).await.unwrap();
        assert_eq!(persisted.pending.len(), 1);
        assert_eq!(persisted.pending[0].id, "ghost");
        assert_eq!(persisted.total_target, 3);

        let mut confirmed = list.confirmed_ids();
        confirmed.sort();
        assert_eq!(confirmed, vec!["user030", "user050"]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_prompt_fails_without_mutation() {
        let list = FakeList::new(&rows(10));
        list.drop_prompts(1);
        let store = MemoryStore::new();
        let reporter = MockReporter::new();

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["user001", "user002"])),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Completed);
        assert_eq!(list.confirmed_ids().len(), 2);
        assert_eq!(list.activations(), 3);
        assert!(reporter.contains("ActionFailed"));
    }

    #[tokio::test(start_paused = true)]
    async fn host_failure_errors_but_stays_resumable() {
        let list = FakeList::new(&rows(10));
        list.fail_enumerations(1);
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&["user001", "user002"])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state, ExecutorState::Errored);
        assert!(outcome.error.is_some());

        let snapshot = ProgressReporter::new(store.clone(), observer.clone())
            .latest()
            .await
            .unwrap();
        assert_eq!(snapshot.status, RunStatus::Errored);
        assert_eq!(snapshot.message(), "Paused, can be restarted");
        assert_eq!(saved(&store).await.unwrap().pending.len(), 2);

        let mut ctx = RunContext::new(CancellationToken::new());
        let resumed = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::resume(),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();
        assert_eq!(resumed.state, ExecutorState::Completed);
        assert_eq!(resumed.completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retained_entities_are_withdrawn() {
        let list = FakeList::new(&rows(10));
        let store = MemoryStore::new();
        let exclusions: ExclusionSet = ["user002"].into_iter().collect();
        write_key(&store, keys::EXCLUSION_SET, &exclusions)
            .await
            .unwrap();

        let mut state = TaskState::new(targets(&["user001", "user002", "user003"]));
        state.complete("user001");
        TaskStateStore::new(store.clone()).save(&state).await.unwrap();

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::resume(),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Completed);
        assert_eq!(outcome.completed, 2);
        assert!(!list.confirmed_ids().contains(&"user002".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_trims_harvest_preview() {
        let list = FakeList::new(&rows(10));
        let store = MemoryStore::new();
        let preview = HarvestResult::assemble(
            targets(&["user001", "user002"]),
            &ExclusionSet::new(),
            100,
            false,
        );
        write_key(&store, keys::HARVEST_RESULT, &preview)
            .await
            .unwrap();

        let mut ctx = RunContext::new(CancellationToken::new());
        executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["user001"])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        let preview: HarvestResult = read_key(&store, keys::HARVEST_RESULT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(preview.entities.len(), 1);
        assert_eq!(preview.entities[0].id, "user002");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rereads_cells_after_each_action() {
        let list = FakeList::new(&rows(40));
        list.scroll_to(1000.0).await.unwrap();
        let store = MemoryStore::new();

        // Both rendered at the start; the first click scrolls the second
        // one's original cell index onto a different row.
        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["user010", "user015"])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Completed);
        let mut confirmed = list.confirmed_ids();
        confirmed.sort();
        assert_eq!(confirmed, vec!["user010", "user015"]);
        assert_eq!(list.activations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mutual_follow_in_batch_is_actioned() {
        let list = FakeList::new(&rows(10));
        list.mark_mutual(&["user003"]);
        let store = MemoryStore::new();

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["user003", "user004"])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Completed);
        assert_eq!(outcome.completed, 2);
        assert!(list.confirmed_ids().contains(&"user003".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_cycles_trigger_long_jump() {
        let list = FakeList::new(&rows(30));
        let store = MemoryStore::new();
        let token = CancellationToken::new();
        let reporter = StopOn::new("StallJump", &token);

        let mut ctx = RunContext::new(token);
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["ghost"])),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Stopped);
        assert!(reporter.inner.contains("StallJump { distance: 4800.0 }"));
        // Three empty cycles, each with the initial lookup and two retries.
        let misses = reporter
            .inner
            .events()
            .iter()
            .filter(|e| e.starts_with("LookupMissed"))
            .count();
        assert_eq!(misses, 9);
        assert_eq!(saved(&store).await.unwrap().pending.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn large_batch_warms_up_first() {
        let all = rows(80);
        let picked: Vec<&str> = all.iter().step_by(6).map(String::as_str).collect();
        assert_eq!(picked.len(), 14);

        let list = FakeList::new(&all);
        let reporter = MockReporter::new();
        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &MemoryStore::new(), &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&picked)),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();
        assert_eq!(outcome.state, ExecutorState::Completed);
        assert_eq!(outcome.completed, 14);
        assert!(reporter.contains("WarmedUp"));
        assert!(!reporter.contains("WarmedUp { actioned: 0 }"));

        let small = FakeList::new(&all);
        let reporter = MockReporter::new();
        let mut ctx = RunContext::new(CancellationToken::new());
        executor(&small, &MemoryStore::new(), &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&picked[..3])),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();
        assert!(!reporter.contains("WarmedUp"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_streak_halts_as_errored() {
        let list = FakeList::new(&rows(10));
        list.drop_prompts(1000);
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();

        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&["user001", "user002"])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Errored);
        assert!(
            outcome
                .error
                .as_deref()
                .is_some_and(|e| e.contains("consecutive failures"))
        );
        assert!(list.activations() >= 10);
        assert!(list.confirmed_ids().is_empty());
        assert_eq!(saved(&store).await.unwrap().pending.len(), 2);
        assert!(
            observer
                .events()
                .iter()
                .any(|e| matches!(e, ObserverEvent::Errored { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_cooldown_persists_state() {
        let list = FakeList::new(&rows(20));
        list.rate_limit_after(1, Duration::from_secs(60));
        let store = MemoryStore::new();
        let observer = RecordingObserver::new();
        let token = CancellationToken::new();
        let reporter = StopOn::new("RateLimited", &token);

        let start = Instant::now();
        let mut ctx = RunContext::new(token);
        let outcome = executor(&list, &store, &observer)
            .run(
                ExecutionRequest::with_entities(targets(&["user001", "user002", "user003"])),
                &AutoConfirm,
                &mut ctx,
                &reporter,
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, ExecutorState::Stopped);
        assert!(start.elapsed() < Duration::from_secs(300));

        let persisted = saved(&store).await.unwrap();
        assert_eq!(persisted.completed.len(), 1);
        assert_eq!(persisted.pending.len(), 2);

        let snapshot = ProgressReporter::new(store.clone(), observer)
            .latest()
            .await
            .unwrap();
        assert_eq!(snapshot.status, RunStatus::Stopped);
        assert_eq!(snapshot.unfollowed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_is_throttled() {
        let list = FakeList::new(&rows(40));
        list.rate_limit_after(1, Duration::from_secs(60));
        let store = MemoryStore::new();

        // user001 at t=0, cooldown, user002 at t=300, then user030 after a
        // lookup at the same instant.
        let mut ctx = RunContext::new(CancellationToken::new());
        let outcome = executor(&list, &store, &RecordingObserver::new())
            .run(
                ExecutionRequest::with_entities(targets(&["user001", "user002", "user030"])),
                &AutoConfirm,
                &mut ctx,
                &MockReporter::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.state, ExecutorState::Completed);

        // Written after the cooldown, skipped before the lookup.
        let beat: Heartbeat = read_key(&store, keys::HEARTBEAT).await.unwrap().unwrap();
        assert_eq!(beat.pending, 2);
        assert_eq!(beat.completed, 1);
    }
}
