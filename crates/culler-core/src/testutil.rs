//! Test utilities: fake host and mock implementations of the core traits.
//!
//! Handwritten fakes for dependency injection in unit tests.
//! All fakes use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::confirm::{Decision, OperatorPrompt};
use crate::error::AppError;
use crate::executor::{ExecutorEvent, ExecutorReporter};
use crate::harvest::{HarvestEvent, HarvestReporter};
use crate::models::Entity;
use crate::progress::ObserverEvent;
use crate::traits::{
    ActionTrigger, CellHandle, CellParser, Control, ControlScope, ObserverChannel,
    RenderedListHost,
};

// ---------------------------------------------------------------------------
// FakeList
// ---------------------------------------------------------------------------

const ROW_HEIGHT: f64 = 100.0;
const VIEWPORT: f64 = 800.0;
const LOAD_BATCH: usize = 20;
const TRIGGER_SELECTOR: &str = r#"[data-testid$="-unfollow"]"#;
const CONFIRM_SELECTOR: &str = r#"[data-testid="confirmationSheetConfirm"]"#;

#[derive(Debug)]
struct Row {
    id: String,
    following: bool,
    mutual: bool,
}

#[derive(Debug)]
struct ListState {
    rows: Vec<Row>,
    loaded: usize,
    position: f64,
    scroll_log: Vec<f64>,
    open_prompt: Option<usize>,
    drop_prompts: usize,
    fail_enumerations: usize,
    activations: usize,
    confirmed: Vec<(String, Instant)>,
    rate_limit_after: Option<(usize, Duration)>,
    throttled_until: Option<Instant>,
    cancel_after: Option<(usize, CancellationToken)>,
    frozen: Option<Range<usize>>,
}

impl ListState {
    fn extent(&self) -> f64 {
        self.loaded as f64 * ROW_HEIGHT
    }

    fn max_position(&self) -> f64 {
        (self.extent() - VIEWPORT).max(0.0)
    }

    fn scroll_to(&mut self, position: f64) {
        self.position = position.clamp(0.0, self.max_position());
        // Nearing the rendered end loads the next batch.
        if self.position + VIEWPORT >= self.extent() - ROW_HEIGHT {
            self.loaded = (self.loaded + LOAD_BATCH).min(self.rows.len());
        }
        self.scroll_log.push(self.position);
    }

    /// Absolute indices of the rows rendered at the current offset.
    fn rendered_rows(&self) -> Range<usize> {
        if let Some(rows) = &self.frozen {
            return rows.clone();
        }
        let first = (self.position / ROW_HEIGHT).floor() as usize;
        let last = ((self.position + VIEWPORT) / ROW_HEIGHT).ceil() as usize;
        first..last.min(self.loaded)
    }

    /// Rendered cells, indexed from the first rendered row like a DOM query.
    fn visible(&self) -> Vec<CellHandle> {
        self.rendered_rows()
            .enumerate()
            .map(|(index, i)| {
                let row = &self.rows[i];
                let state = if row.following {
                    "following"
                } else {
                    "unfollowed"
                };
                let mut markup = format!("{}|{}|{state}", row.id, row.id.to_uppercase());
                if row.mutual {
                    markup.push_str("|mutual");
                }
                CellHandle::new(index, markup)
            })
            .collect()
    }

    /// Scrolls row `i` to the middle of the viewport.
    fn center(&mut self, i: usize) {
        let target = i as f64 * ROW_HEIGHT + ROW_HEIGHT / 2.0 - VIEWPORT / 2.0;
        self.scroll_to(target);
    }

    fn throttled(&self) -> bool {
        self.throttled_until.is_some_and(|t| Instant::now() < t)
    }

    fn confirm(&mut self, index: usize) {
        self.rows[index].following = false;
        self.confirmed
            .push((self.rows[index].id.clone(), Instant::now()));
        let count = self.confirmed.len();

        if let Some((after, cooldown)) = self.rate_limit_after {
            if count == after {
                self.throttled_until = Some(Instant::now() + cooldown);
            }
        }
        if let Some((after, token)) = &self.cancel_after {
            if count == *after {
                token.cancel();
            }
        }
    }
}

/// In-memory lazily-rendered list: fixed-height rows, a fixed viewport and
/// batch loading near the rendered end. Implements both
/// [`RenderedListHost`] and [`ActionTrigger`].
///
/// Cell handles are indexed from the first rendered row, and cell markup
/// is `id|label|following` (or `unfollowed` once actioned), with a
/// trailing `|mutual` for accounts that follow back. Activating a
/// cell control resolves that index against the rows rendered at that
/// moment and scrolls the row to the middle of the viewport, the way a
/// browser does before a click. Controls bound to an entity are resolved
/// by index all the same.
#[derive(Debug, Clone)]
pub struct FakeList {
    state: Arc<Mutex<ListState>>,
}

impl FakeList {
    pub fn new(ids: &[String]) -> Self {
        let rows: Vec<Row> = ids
            .iter()
            .map(|id| Row {
                id: id.clone(),
                following: true,
                mutual: false,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(ListState {
                loaded: rows.len().min(LOAD_BATCH),
                rows,
                position: 0.0,
                scroll_log: Vec::new(),
                open_prompt: None,
                drop_prompts: 0,
                fail_enumerations: 0,
                activations: 0,
                confirmed: Vec::new(),
                rate_limit_after: None,
                throttled_until: None,
                cancel_after: None,
                frozen: None,
            })),
        }
    }

    /// Marks the given accounts as following back.
    pub fn mark_mutual(&self, ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        for row in state.rows.iter_mut() {
            if ids.contains(&row.id.as_str()) {
                row.mutual = true;
            }
        }
    }

    /// Keeps rendering the rows visible now, wherever the list scrolls.
    pub fn freeze_rendering(&self) {
        let mut state = self.state.lock().unwrap();
        state.frozen = Some(state.rendered_rows());
    }

    /// After the `n`th confirmation, signal throttling for `duration`.
    pub fn rate_limit_after(&self, n: usize, duration: Duration) {
        self.state.lock().unwrap().rate_limit_after = Some((n, duration));
    }

    /// After the `n`th confirmation, cancel `token`.
    pub fn cancel_after(&self, n: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((n, token));
    }

    /// The next `n` trigger activations open no confirmation prompt.
    pub fn drop_prompts(&self, n: usize) {
        self.state.lock().unwrap().drop_prompts = n;
    }

    /// The next `n` enumerations fail with a host error.
    pub fn fail_enumerations(&self, n: usize) {
        self.state.lock().unwrap().fail_enumerations = n;
    }

    pub fn position(&self) -> f64 {
        self.state.lock().unwrap().position
    }

    /// Scroll offset after every scroll, in order.
    pub fn scroll_log(&self) -> Vec<f64> {
        self.state.lock().unwrap().scroll_log.clone()
    }

    /// Ids whose confirm control was activated, in order.
    pub fn confirmed_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.confirmed.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn confirmed_at(&self) -> Vec<Instant> {
        let state = self.state.lock().unwrap();
        state.confirmed.iter().map(|(_, at)| *at).collect()
    }

    pub fn activations(&self) -> usize {
        self.state.lock().unwrap().activations
    }
}

impl RenderedListHost for FakeList {
    async fn enumerate(&self, _selector: &str) -> Result<Vec<CellHandle>, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_enumerations > 0 {
            state.fail_enumerations -= 1;
            return Err(AppError::HostError("script evaluation failed".into()));
        }
        Ok(state.visible())
    }

    async fn scroll_by(&self, delta: f64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let target = state.position + delta;
        state.scroll_to(target);
        Ok(())
    }

    async fn scroll_to(&self, position: f64) -> Result<(), AppError> {
        self.state.lock().unwrap().scroll_to(position);
        Ok(())
    }

    async fn current_extent(&self) -> Result<f64, AppError> {
        Ok(self.state.lock().unwrap().extent())
    }

    async fn current_position(&self) -> Result<f64, AppError> {
        Ok(self.state.lock().unwrap().position)
    }

    async fn viewport_height(&self) -> Result<f64, AppError> {
        Ok(VIEWPORT)
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<CellHandle, AppError> {
        let first = self.state.lock().unwrap().visible().into_iter().next();
        match first {
            Some(cell) => Ok(cell),
            None => {
                tokio::time::sleep(timeout).await;
                Err(AppError::HostTimeout {
                    selector: selector.to_string(),
                    millis: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn throttled(&self) -> Result<bool, AppError> {
        Ok(self.state.lock().unwrap().throttled())
    }
}

impl ActionTrigger for FakeList {
    fn locate(&self, cell: &CellHandle) -> Option<Control> {
        (cell.markup.split('|').nth(2) == Some("following"))
            .then(|| Control::in_cell(cell.index, TRIGGER_SELECTOR))
    }

    async fn activate(&self, control: &Control) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        match control.scope {
            ControlScope::Cell(index) => {
                if state.throttled() {
                    return Err(AppError::RateLimitExceeded);
                }
                let row = state.rendered_rows().nth(index).ok_or_else(|| {
                    AppError::HostError(format!("Control {} is no longer rendered", control.selector))
                })?;
                state.center(row);
                state.activations += 1;
                if state.drop_prompts > 0 {
                    state.drop_prompts -= 1;
                } else {
                    state.open_prompt = Some(row);
                }
                Ok(())
            }
            ControlScope::Document => {
                let index = state
                    .open_prompt
                    .take()
                    .ok_or_else(|| AppError::HostError("no confirmation prompt open".into()))?;
                state.confirm(index);
                Ok(())
            }
        }
    }

    async fn confirmation_prompt(&self, timeout: Duration) -> Result<Option<Control>, AppError> {
        if self.state.lock().unwrap().open_prompt.is_some() {
            return Ok(Some(Control::in_document(CONFIRM_SELECTOR)));
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// FakeParser
// ---------------------------------------------------------------------------

/// Parses `id|label|...` markup. Mutual follows are not harvest candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeParser;

impl CellParser for FakeParser {
    fn parse(&self, cell: &CellHandle) -> Option<Entity> {
        let mut parts = cell.markup.split('|');
        let id = parts.next().filter(|id| !id.is_empty())?;
        let label = parts.next().unwrap_or(id);
        Some(Entity::new(id, label))
    }

    fn is_candidate(&self, cell: &CellHandle) -> bool {
        !cell.markup.ends_with("|mutual")
    }
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Observer that records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ObserverEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ObserverChannel for RecordingObserver {
    async fn send(&self, event: &ObserverEvent) -> Result<(), AppError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Observer whose receiving end is gone.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingObserver;

impl ObserverChannel for FailingObserver {
    async fn send(&self, _event: &ObserverEvent) -> Result<(), AppError> {
        Err(AppError::HostDisconnected(
            "Receiving end does not exist".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// ScriptedOperator
// ---------------------------------------------------------------------------

/// Operator prompt that answers from a script, then with a fallback.
#[derive(Debug, Clone)]
pub struct ScriptedOperator {
    decisions: Arc<Mutex<VecDeque<Decision>>>,
    fallback: Decision,
    asked: Arc<Mutex<usize>>,
}

impl ScriptedOperator {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: Arc::new(Mutex::new(decisions.into())),
            fallback: Decision::accept(),
            asked: Arc::new(Mutex::new(0)),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Vec::new())
    }

    pub fn rejecting() -> Self {
        Self {
            fallback: Decision::reject(),
            ..Self::new(Vec::new())
        }
    }

    /// How many times the operator was asked.
    pub fn asked(&self) -> usize {
        *self.asked.lock().unwrap()
    }
}

impl OperatorPrompt for ScriptedOperator {
    async fn ask(&self, _pending: &[Entity]) -> Result<Decision, AppError> {
        *self.asked.lock().unwrap() += 1;
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records the debug form of every event.
#[derive(Debug, Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// True if any recorded event's debug form contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e.contains(needle))
    }
}

impl HarvestReporter for MockReporter {
    fn report(&self, event: HarvestEvent) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

impl ExecutorReporter for MockReporter {
    fn report(&self, event: ExecutorEvent<'_>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}
