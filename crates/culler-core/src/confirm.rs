//! Operator confirmation before a fresh batch starts.
//!
//! Two variants, selected by the persisted `autoConfirmFlag`: an
//! interactive prompt delegated to an [`OperatorPrompt`], and auto-confirm.

use std::future::Future;

use crate::error::AppError;
use crate::models::Entity;
use crate::store::{keys, read_key};
use crate::traits::PersistentStore;

/// The operator's answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub accepted: bool,
    /// Skip the prompt in future runs (persists `autoConfirmFlag`).
    pub remember: bool,
}

impl Decision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            remember: false,
        }
    }

    pub fn accept_and_remember() -> Self {
        Self {
            accepted: true,
            remember: true,
        }
    }

    pub fn reject() -> Self {
        Self::default()
    }
}

/// Asks a human to approve the pending set (terminal prompt, HTTP client).
pub trait OperatorPrompt: Send + Sync {
    fn ask(&self, pending: &[Entity]) -> impl Future<Output = Result<Decision, AppError>> + Send;
}

/// Approves or rejects a pending set before the executor runs.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, pending: &[Entity])
    -> impl Future<Output = Result<Decision, AppError>> + Send;
}

/// Approves every batch without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirmation for AutoConfirm {
    async fn confirm(&self, _pending: &[Entity]) -> Result<Decision, AppError> {
        Ok(Decision::accept())
    }
}

/// Delegates the decision to an operator.
#[derive(Debug, Clone)]
pub struct Interactive<P> {
    prompt: P,
}

impl<P: OperatorPrompt> Interactive<P> {
    pub fn new(prompt: P) -> Self {
        Self { prompt }
    }
}

impl<P: OperatorPrompt> Confirmation for Interactive<P> {
    async fn confirm(&self, pending: &[Entity]) -> Result<Decision, AppError> {
        self.prompt.ask(pending).await
    }
}

/// The confirmation variant in effect for a run.
#[derive(Debug, Clone)]
pub enum ConfirmationMode<P> {
    Auto(AutoConfirm),
    Interactive(Interactive<P>),
}

impl<P: OperatorPrompt> ConfirmationMode<P> {
    /// Auto-confirm if `autoConfirmFlag` is set, otherwise ask `prompt`.
    pub async fn from_store<S: PersistentStore>(store: &S, prompt: P) -> Result<Self, AppError> {
        let auto: Option<bool> = read_key(store, keys::AUTO_CONFIRM).await?;
        Ok(if auto.unwrap_or(false) {
            ConfirmationMode::Auto(AutoConfirm)
        } else {
            ConfirmationMode::Interactive(Interactive::new(prompt))
        })
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, ConfirmationMode::Auto(_))
    }
}

impl<P: OperatorPrompt> Confirmation for ConfirmationMode<P> {
    async fn confirm(&self, pending: &[Entity]) -> Result<Decision, AppError> {
        match self {
            ConfirmationMode::Auto(auto) => auto.confirm(pending).await,
            ConfirmationMode::Interactive(interactive) => interactive.confirm(pending).await,
        }
    }
}
