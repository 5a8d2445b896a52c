//! Task State Store: the single source of truth for a batch.
//!
//! Every mutation computes the next full [`TaskState`] and persists it in
//! one write under `taskState`. A restart reconstructs the run from the
//! last persisted record alone.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{CompletedEntity, Entity, ExclusionSet};
use crate::progress::{ProgressSnapshot, RunStatus};
use crate::store::{keys, read_key, write_key};
use crate::traits::PersistentStore;

/// Pending and completed entities of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// FIFO of entities still to action.
    pub pending: Vec<Entity>,
    pub completed: Vec<CompletedEntity>,
    #[serde(rename = "totalTarget")]
    pub total_target: usize,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    /// Fresh state over `entities`, dropping duplicate ids.
    pub fn new(entities: Vec<Entity>) -> Self {
        let mut seen = HashSet::new();
        let pending: Vec<Entity> = entities
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        Self {
            total_target: pending.len(),
            pending,
            completed: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|e| e.id == id)
    }

    pub fn is_completed(&self, id: &str) -> bool {
        self.completed.iter().any(|c| c.entity.id == id)
    }

    pub fn head(&self) -> Option<&Entity> {
        self.pending.first()
    }

    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    /// Moves `id` from pending to completed. Returns the completed entry.
    pub fn complete(&mut self, id: &str) -> Option<&CompletedEntity> {
        let pos = self.pending.iter().position(|e| e.id == id)?;
        let entity = self.pending.remove(pos);
        self.completed.push(CompletedEntity {
            entity,
            completed_at: Utc::now(),
        });
        self.touch();
        self.completed.last()
    }

    /// Moves `id` to the tail of pending. Returns false if it is not pending.
    pub fn requeue(&mut self, id: &str) -> bool {
        let Some(pos) = self.pending.iter().position(|e| e.id == id) else {
            return false;
        };
        let entity = self.pending.remove(pos);
        self.pending.push(entity);
        self.touch();
        true
    }

    /// Withdraws pending entities the operator has since retained. The
    /// target shrinks with them, so the conservation law still holds.
    pub fn withdraw_excluded(&mut self, exclusions: &ExclusionSet) -> Vec<Entity> {
        let (withdrawn, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|e| exclusions.contains(&e.id));
        self.pending = kept;
        if !withdrawn.is_empty() {
            self.total_target -= withdrawn.len();
            self.touch();
        }
        withdrawn
    }

    /// Checks the conservation law and pending/completed disjointness.
    pub fn check(&self) -> Result<(), AppError> {
        let actual = self.pending.len() + self.completed.len();
        if self.total_target != actual {
            return Err(AppError::InvariantViolation(format!(
                "totalTarget {} != pending {} + completed {}",
                self.total_target,
                self.pending.len(),
                self.completed.len()
            )));
        }

        let pending: HashSet<&str> = self.pending.iter().map(|e| e.id.as_str()).collect();
        if pending.len() != self.pending.len() {
            return Err(AppError::InvariantViolation(
                "duplicate id in pending".into(),
            ));
        }
        if let Some(dup) = self
            .completed
            .iter()
            .find(|c| pending.contains(c.entity.id.as_str()))
        {
            return Err(AppError::InvariantViolation(format!(
                "{} is both pending and completed",
                dup.entity.id
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Which resume rule produced the state a run starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    /// A saved task with pending entities was found.
    Resumed,
    /// Only progress counters survived; pending rebuilt from the target list.
    Rehydrated,
    /// Started from the caller-supplied list.
    Fresh,
}

/// Outcome of [`TaskStateStore::resume`].
#[derive(Debug, Clone)]
pub struct ResumePlan {
    pub state: TaskState,
    pub source: ResumeSource,
}

/// Persists [`TaskState`] records through a [`PersistentStore`].
#[derive(Debug, Clone)]
pub struct TaskStateStore<S> {
    store: S,
}

impl<S: PersistentStore> TaskStateStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persists the whole record in one write. Refuses a record that
    /// breaks its invariants.
    pub async fn save(&self, state: &TaskState) -> Result<(), AppError> {
        state.check()?;
        write_key(&self.store, keys::TASK_STATE, state).await
    }

    pub async fn load(&self) -> Result<Option<TaskState>, AppError> {
        read_key(&self.store, keys::TASK_STATE).await
    }

    pub async fn clear(&self) -> Result<(), AppError> {
        self.store.remove(&[keys::TASK_STATE]).await
    }

    /// Explicit reseed: drops any saved task and records `entities` as the
    /// target list later runs may rehydrate from.
    pub async fn reseed(&self, entities: &[Entity]) -> Result<(), AppError> {
        self.store.remove(&[keys::TASK_STATE]).await?;
        write_key(&self.store, keys::TARGET_LIST, entities).await
    }

    pub async fn target_list(&self) -> Result<Option<Vec<Entity>>, AppError> {
        read_key(&self.store, keys::TARGET_LIST).await
    }

    /// Chooses the starting state of a run:
    ///
    /// 1. a saved task with non-empty pending wins over `supplied`;
    /// 2. with no saved task but surviving in-flight progress counters,
    ///    pending is rehydrated from the target list (`supplied`, else the
    ///    recorded `targetList`) with completed empty;
    /// 3. otherwise the run starts fresh from `supplied`.
    ///
    /// Excluded entities never enter a rehydrated or fresh pending set.
    pub async fn resume(
        &self,
        supplied: Option<Vec<Entity>>,
        exclusions: &ExclusionSet,
    ) -> Result<ResumePlan, AppError> {
        if let Some(saved) = self.load().await? {
            if !saved.pending.is_empty() {
                saved.check()?;
                return Ok(ResumePlan {
                    state: saved,
                    source: ResumeSource::Resumed,
                });
            }
        }

        let snapshot: Option<ProgressSnapshot> =
            read_key(&self.store, keys::PROGRESS_SNAPSHOT).await?;
        let in_flight = snapshot.is_some_and(|s| {
            matches!(
                s.status,
                RunStatus::Running | RunStatus::PausedRateLimit | RunStatus::Errored
            )
        });

        let filter = |list: Vec<Entity>| -> Vec<Entity> {
            list.into_iter()
                .filter(|e| !exclusions.contains(&e.id))
                .collect()
        };

        if in_flight {
            let list = match supplied.clone() {
                Some(list) => Some(list),
                None => self.target_list().await?,
            };
            if let Some(list) = list {
                return Ok(ResumePlan {
                    state: TaskState::new(filter(list)),
                    source: ResumeSource::Rehydrated,
                });
            }
        }

        match supplied {
            Some(list) => Ok(ResumePlan {
                state: TaskState::new(filter(list)),
                source: ResumeSource::Fresh,
            }),
            None => Err(AppError::Conflict(
                "No saved task to resume and no entities supplied".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn entities(ids: &[&str]) -> Vec<Entity> {
        ids.iter().map(|id| Entity::new(*id, *id)).collect()
    }

    #[test]
    fn complete_and_requeue_conserve() {
        let mut state = TaskState::new(entities(&["a", "b", "c"]));
        assert!(state.requeue("a"));
        assert_eq!(state.head().unwrap().id, "b");

        assert!(state.complete("c").is_some());
        assert!(state.complete("c").is_none());
        assert!(!state.requeue("c"));
        assert!(state.is_completed("c"));
        state.check().unwrap();
        assert_eq!(state.pending.len() + state.completed.len(), state.total_target);
    }

    #[test]
    fn new_dedups() {
        let state = TaskState::new(entities(&["a", "a", "b"]));
        assert_eq!(state.total_target, 2);
    }

    #[test]
    fn check_detects_broken_records() {
        let mut state = TaskState::new(entities(&["a", "b"]));
        state.total_target = 5;
        assert!(matches!(state.check(), Err(AppError::InvariantViolation(_))));

        let mut state = TaskState::new(entities(&["a", "b"]));
        state.complete("a");
        state.pending.push(Entity::new("a", "a"));
        state.total_target += 1;
        assert!(matches!(state.check(), Err(AppError::InvariantViolation(_))));
    }

    #[test]
    fn withdraw_excluded_shrinks_target() {
        let mut state = TaskState::new(entities(&["a", "b", "c"]));
        state.complete("a");
        let exclusions: ExclusionSet = ["b"].into_iter().collect();
        let withdrawn = state.withdraw_excluded(&exclusions);
        assert_eq!(withdrawn.len(), 1);
        assert_eq!(state.total_target, 2);
        state.check().unwrap();
    }

    #[tokio::test]
    async fn save_rejects_invalid_state() {
        let tasks = TaskStateStore::new(MemoryStore::new());
        let mut state = TaskState::new(entities(&["a"]));
        state.total_target = 3;
        assert!(tasks.save(&state).await.is_err());
        assert!(tasks.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_prefers_saved_pending() {
        let tasks = TaskStateStore::new(MemoryStore::new());
        let mut saved = TaskState::new(entities(&["a", "b", "c", "d", "e"]));
        saved.complete("a");
        saved.complete("b");
        tasks.save(&saved).await.unwrap();

        let plan = tasks
            .resume(Some(entities(&["x", "y"])), &ExclusionSet::new())
            .await
            .unwrap();
        assert_eq!(plan.source, ResumeSource::Resumed);
        assert_eq!(plan.state.pending.len(), 3);
        assert_eq!(plan.state.completed.len(), 2);
    }

    #[tokio::test]
    async fn resume_rehydrates_from_target_list() {
        let store = MemoryStore::new();
        let tasks = TaskStateStore::new(store.clone());
        tasks.reseed(&entities(&["a", "b"])).await.unwrap();
        write_key(
            &store,
            keys::PROGRESS_SNAPSHOT,
            &ProgressSnapshot::new(RunStatus::Running, 2, 2, 1),
        )
        .await
        .unwrap();

        let plan = tasks.resume(None, &ExclusionSet::new()).await.unwrap();
        assert_eq!(plan.source, ResumeSource::Rehydrated);
        assert_eq!(plan.state.pending.len(), 2);
        assert!(plan.state.completed.is_empty());
    }

    #[tokio::test]
    async fn resume_fresh_filters_exclusions() {
        let tasks = TaskStateStore::new(MemoryStore::new());
        let exclusions: ExclusionSet = ["b"].into_iter().collect();
        let plan = tasks
            .resume(Some(entities(&["a", "b", "c"])), &exclusions)
            .await
            .unwrap();
        assert_eq!(plan.source, ResumeSource::Fresh);
        assert!(!plan.state.is_pending("b"));
        assert_eq!(plan.state.total_target, 2);
    }

    #[tokio::test]
    async fn resume_with_nothing_is_a_conflict() {
        let tasks = TaskStateStore::new(MemoryStore::new());
        let err = tasks.resume(None, &ExclusionSet::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
