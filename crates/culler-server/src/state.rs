use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast;

use culler_core::error::AppError;
use culler_core::models::{Entity, ExclusionSet, HarvestResult};
use culler_core::progress::{DiagnosticEntry, ObserverEvent, ProgressSnapshot};
use culler_core::traits::{ActionTrigger, CellParser, ObserverChannel, PersistentStore, RenderedListHost};
use culler_core::{ConfirmationMode, Controller, Decision, ExecutionRequest, OperatorPrompt, RunKind};

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub operator: Arc<dyn Operator>,
    /// API key required as `Authorization: Bearer <key>` on `/v1` routes.
    pub api_key: String,
    /// Observer events, fanned out to `/v1/events` subscribers.
    pub events: broadcast::Sender<ObserverEvent>,
}

/// The command surface the routes drive, with the controller's
/// collaborators erased.
///
/// Starting a run claims the run slot before returning, so a second start
/// fails with `Conflict`, and then continues in the background.
pub trait Operator: Send + Sync {
    fn active(&self) -> Option<RunKind>;

    fn stop(&self) -> bool;

    fn start_harvest(&self, target: Option<usize>) -> Result<(), AppError>;

    /// `decision` answers the confirmation unless auto-confirm is on.
    fn start_execution(
        &self,
        request: ExecutionRequest,
        decision: Decision,
    ) -> BoxFuture<'_, Result<(), AppError>>;

    fn start_scroll_to_bottom(&self) -> Result<(), AppError>;

    fn progress(&self) -> BoxFuture<'_, Result<ProgressSnapshot, AppError>>;

    fn harvest_result(&self) -> BoxFuture<'_, Result<Option<HarvestResult>, AppError>>;

    fn action_list(&self) -> BoxFuture<'_, Result<Option<Vec<Entity>>, AppError>>;

    fn exclusions(&self) -> BoxFuture<'_, Result<ExclusionSet, AppError>>;

    fn mark_retained<'a>(
        &'a self,
        id: &'a str,
        retained: bool,
    ) -> BoxFuture<'a, Result<ExclusionSet, AppError>>;

    fn logs(&self) -> BoxFuture<'_, Result<Vec<DiagnosticEntry>, AppError>>;

    fn reset(&self) -> BoxFuture<'_, Result<(), AppError>>;
}

/// The decision carried by an execution request.
#[derive(Debug, Clone, Copy)]
pub struct RequestDecision(pub Decision);

impl OperatorPrompt for RequestDecision {
    async fn ask(&self, pending: &[Entity]) -> Result<Decision, AppError> {
        tracing::info!(pending = pending.len(), accepted = self.0.accepted, "Confirmation from request");
        Ok(self.0)
    }
}

impl<H, P, A, S, O> Operator for Controller<H, P, A, S, O>
where
    H: RenderedListHost + 'static,
    P: CellParser + 'static,
    A: ActionTrigger + 'static,
    S: PersistentStore + 'static,
    O: ObserverChannel + 'static,
{
    fn active(&self) -> Option<RunKind> {
        Controller::active(self)
    }

    fn stop(&self) -> bool {
        Controller::stop(self)
    }

    fn start_harvest(&self, target: Option<usize>) -> Result<(), AppError> {
        let guard = self.begin(RunKind::Harvest)?;
        let this = self.clone();
        tokio::spawn(async move {
            match this.harvest(&guard, target).await {
                Ok(result) => tracing::info!(
                    found = result.non_excluded_count,
                    partial = result.partial,
                    "Background harvest finished"
                ),
                Err(e) => tracing::error!(error = %e, "Background harvest failed"),
            }
        });
        Ok(())
    }

    fn start_execution(
        &self,
        request: ExecutionRequest,
        decision: Decision,
    ) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async move {
            let guard = self.begin(RunKind::Execution)?;
            let confirmation =
                ConfirmationMode::from_store(self.store(), RequestDecision(decision)).await?;
            let this = self.clone();
            tokio::spawn(async move {
                match this.execute(&guard, request, &confirmation).await {
                    Ok(outcome) => tracing::info!(
                        state = %outcome.state,
                        completed = outcome.completed,
                        pending = outcome.pending,
                        "Background execution finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Background execution failed"),
                }
            });
            Ok(())
        })
    }

    fn start_scroll_to_bottom(&self) -> Result<(), AppError> {
        let guard = self.begin(RunKind::ScrollToBottom)?;
        let this = self.clone();
        tokio::spawn(async move {
            match this.scroll(&guard).await {
                Ok(extent) => tracing::info!(extent, "Reached the end of the list"),
                Err(e) => tracing::error!(error = %e, "Scroll to bottom failed"),
            }
        });
        Ok(())
    }

    fn progress(&self) -> BoxFuture<'_, Result<ProgressSnapshot, AppError>> {
        Box::pin(self.progress_snapshot())
    }

    fn harvest_result(&self) -> BoxFuture<'_, Result<Option<HarvestResult>, AppError>> {
        Box::pin(Controller::harvest_result(self))
    }

    fn action_list(&self) -> BoxFuture<'_, Result<Option<Vec<Entity>>, AppError>> {
        Box::pin(Controller::action_list(self))
    }

    fn exclusions(&self) -> BoxFuture<'_, Result<ExclusionSet, AppError>> {
        Box::pin(Controller::exclusions(self))
    }

    fn mark_retained<'a>(
        &'a self,
        id: &'a str,
        retained: bool,
    ) -> BoxFuture<'a, Result<ExclusionSet, AppError>> {
        Box::pin(Controller::mark_retained(self, id, retained))
    }

    fn logs(&self) -> BoxFuture<'_, Result<Vec<DiagnosticEntry>, AppError>> {
        Box::pin(Controller::logs(self))
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(Controller::reset(self))
    }
}
