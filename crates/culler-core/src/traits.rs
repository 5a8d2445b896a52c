use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::models::Entity;
use crate::progress::ObserverEvent;

/// A key/value record as read from or written to a [`PersistentStore`].
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A cell currently rendered by the host, captured as a markup snapshot.
///
/// `index` is the cell's position among the cells matched by the selector
/// at enumeration time; it is only meaningful until the host scrolls or
/// re-renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellHandle {
    pub index: usize,
    pub markup: String,
}

impl CellHandle {
    pub fn new(index: usize, markup: impl Into<String>) -> Self {
        Self {
            index,
            markup: markup.into(),
        }
    }
}

/// Where a [`Control`] lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlScope {
    /// Inside the rendered cell at this index.
    Cell(usize),
    /// Anywhere in the document (confirmation prompts, sheets).
    Document,
}

/// A clickable control located by an [`ActionTrigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub scope: ControlScope,
    pub selector: String,
    /// Id of the entity whose cell holds the control. A host that can
    /// find the cell by id must prefer that over the index, which goes
    /// stale as soon as the list scrolls.
    pub entity: Option<String>,
}

impl Control {
    pub fn in_cell(index: usize, selector: impl Into<String>) -> Self {
        Self {
            scope: ControlScope::Cell(index),
            selector: selector.into(),
            entity: None,
        }
    }

    pub fn in_document(selector: impl Into<String>) -> Self {
        Self {
            scope: ControlScope::Document,
            selector: selector.into(),
            entity: None,
        }
    }

    /// Binds the control to the entity parsed from its cell.
    pub fn bound_to(mut self, id: impl Into<String>) -> Self {
        self.entity = Some(id.into());
        self
    }
}

/// The lazily-rendered, infinitely-scrolling list exposed by the host.
///
/// Only currently rendered cells are visible; everything else must be
/// reached by scrolling and waiting for the host to render.
pub trait RenderedListHost: Send + Sync + Clone {
    /// Snapshot of the cells matching `selector` that are rendered right now.
    fn enumerate(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<CellHandle>, AppError>> + Send;

    fn scroll_by(&self, delta: f64) -> impl Future<Output = Result<(), AppError>> + Send;

    fn scroll_to(&self, position: f64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Total scrollable content height.
    fn current_extent(&self) -> impl Future<Output = Result<f64, AppError>> + Send;

    /// Current scroll offset from the top.
    fn current_position(&self) -> impl Future<Output = Result<f64, AppError>> + Send;

    fn viewport_height(&self) -> impl Future<Output = Result<f64, AppError>> + Send;

    /// Waits until a cell matching `selector` renders.
    ///
    /// Returns [`AppError::HostTimeout`] once `timeout` elapses.
    fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<CellHandle, AppError>> + Send;

    /// Returns true while the host is signalling throttling.
    fn throttled(&self) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Extracts an [`Entity`] from a rendered cell.
///
/// Pure function over cell content: no side effects, and a cell that does
/// not describe an entity yields `None`, never an error.
pub trait CellParser: Send + Sync + Clone {
    fn parse(&self, cell: &CellHandle) -> Option<Entity>;

    /// Whether a harvest may collect the entity in `cell`. Only the
    /// harvester asks; an entity already in a batch is recognised by
    /// [`parse`](Self::parse) alone.
    fn is_candidate(&self, _cell: &CellHandle) -> bool {
        true
    }
}

/// Locates and activates the destructive action on a cell.
pub trait ActionTrigger: Send + Sync + Clone {
    /// Finds the action-trigger control inside `cell`, if it has one.
    fn locate(&self, cell: &CellHandle) -> Option<Control>;

    fn activate(&self, control: &Control) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Waits up to `timeout` for the confirmation prompt and returns its
    /// confirm control, or `None` if no prompt rendered in time.
    fn confirmation_prompt(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Control>, AppError>> + Send;
}

/// Key/value persistence that survives reloads and restarts.
///
/// Single writer at a time from this process. `set` merges the given keys
/// into the stored record; each value is replaced whole.
pub trait PersistentStore: Send + Sync + Clone {
    /// Reads the given keys. Missing keys are absent from the returned record.
    fn get(&self, keys: &[&str]) -> impl Future<Output = Result<Record, AppError>> + Send;

    fn set(&self, record: Record) -> impl Future<Output = Result<(), AppError>> + Send;

    fn remove(&self, keys: &[&str]) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Best-effort, fire-and-forget event sink for an operator-facing observer.
///
/// The observer may not exist; callers swallow every error.
pub trait ObserverChannel: Send + Sync + Clone {
    fn send(&self, event: &ObserverEvent) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// An ObserverChannel for use when nobody is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl ObserverChannel for NullObserver {
    async fn send(&self, _event: &ObserverEvent) -> Result<(), AppError> {
        Ok(())
    }
}

/// An optional observer: `None` drops every event.
impl<O: ObserverChannel> ObserverChannel for Option<O> {
    async fn send(&self, event: &ObserverEvent) -> Result<(), AppError> {
        match self {
            Some(observer) => observer.send(event).await,
            None => Ok(()),
        }
    }
}

/// Host, parser and trigger for a process with no list attached.
///
/// Lets the state-only commands (progress, exclusions, logs, reset) run
/// without a browser. Every host call fails with `HostDisconnected`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedHost;

impl DetachedHost {
    fn detached<T>() -> Result<T, AppError> {
        Err(AppError::HostDisconnected("no list host attached".into()))
    }
}

impl RenderedListHost for DetachedHost {
    async fn enumerate(&self, _selector: &str) -> Result<Vec<CellHandle>, AppError> {
        Self::detached()
    }

    async fn scroll_by(&self, _delta: f64) -> Result<(), AppError> {
        Self::detached()
    }

    async fn scroll_to(&self, _position: f64) -> Result<(), AppError> {
        Self::detached()
    }

    async fn current_extent(&self) -> Result<f64, AppError> {
        Self::detached()
    }

    async fn current_position(&self) -> Result<f64, AppError> {
        Self::detached()
    }

    async fn viewport_height(&self) -> Result<f64, AppError> {
        Self::detached()
    }

    async fn wait_for(&self, _selector: &str, _timeout: Duration) -> Result<CellHandle, AppError> {
        Self::detached()
    }

    async fn throttled(&self) -> Result<bool, AppError> {
        Ok(false)
    }
}

impl CellParser for DetachedHost {
    fn parse(&self, _cell: &CellHandle) -> Option<Entity> {
        None
    }
}

impl ActionTrigger for DetachedHost {
    fn locate(&self, _cell: &CellHandle) -> Option<Control> {
        None
    }

    async fn activate(&self, _control: &Control) -> Result<(), AppError> {
        Self::detached()
    }

    async fn confirmation_prompt(&self, _timeout: Duration) -> Result<Option<Control>, AppError> {
        Self::detached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detached_host_reports_disconnect() {
        let err = DetachedHost.current_extent().await.unwrap_err();
        assert!(matches!(err, AppError::HostDisconnected(_)));
        assert!(!DetachedHost.throttled().await.unwrap());
        assert!(DetachedHost.locate(&CellHandle::new(0, "<div/>")).is_none());
    }

    #[tokio::test]
    async fn absent_observer_accepts_events() {
        let observer: Option<NullObserver> = None;
        observer
            .send(&ObserverEvent::Completed { unfollowed: 0 })
            .await
            .unwrap();
    }
}
