use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A discoverable item in the host's virtual list (an account record).
///
/// Identity is by `id` only: two entities with the same id are the same
/// entity even if their labels or discovery times differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Stable unique handle (e.g. the account's `@handle` without the `@`).
    pub id: String,
    /// Human-readable label (display name).
    pub label: String,
    #[serde(rename = "discoveredAt")]
    pub discovered_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            discovered_at: Utc::now(),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl std::hash::Hash for Entity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// An entity that went through the completed transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedEntity {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(rename = "completedAt")]
    pub completed_at: DateTime<Utc>,
}

/// User-curated ids that are never targeted by destructive actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ExclusionSet {
    ids: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Marks `id` as retained (excluded) or releases it. Returns true if the
    /// set changed.
    pub fn mark_retained(&mut self, id: &str, retained: bool) -> bool {
        if retained {
            self.ids.insert(id.to_string())
        } else {
            self.ids.remove(id)
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Output of a single harvest call.
///
/// `entities` holds at most `cap` non-excluded entities in discovery order,
/// followed by every excluded entity observed during the same harvest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestResult {
    pub id: Uuid,
    pub entities: Vec<Entity>,
    pub cap: usize,
    #[serde(rename = "nonExcludedCount")]
    pub non_excluded_count: usize,
    #[serde(rename = "excludedCount")]
    pub excluded_count: usize,
    /// True if the harvest was stopped before converging.
    pub partial: bool,
    /// SHA-256 of the sorted id set, for idempotence checks across calls.
    pub fingerprint: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl HarvestResult {
    /// Builds a result from entities in discovery order: first `cap`
    /// non-excluded entities, then every excluded entity. Duplicate ids are
    /// dropped, keeping the first occurrence.
    pub fn assemble(
        discovered: Vec<Entity>,
        exclusions: &ExclusionSet,
        cap: usize,
        partial: bool,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut excluded = Vec::new();

        for entity in discovered {
            if !seen.insert(entity.id.clone()) {
                continue;
            }
            if exclusions.contains(&entity.id) {
                excluded.push(entity);
            } else if kept.len() < cap {
                kept.push(entity);
            }
        }

        let non_excluded_count = kept.len();
        let excluded_count = excluded.len();
        kept.extend(excluded);

        let fingerprint = fingerprint(kept.iter().map(|e| e.id.as_str()));

        Self {
            id: Uuid::new_v4(),
            entities: kept,
            cap,
            non_excluded_count,
            excluded_count,
            partial,
            fingerprint,
            created_at: Utc::now(),
        }
    }

    /// The action list: non-excluded entities only, still capped.
    pub fn action_list(&self, exclusions: &ExclusionSet) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| !exclusions.contains(&e.id))
            .take(self.cap)
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> BTreeSet<&str> {
        self.entities.iter().map(|e| e.id.as_str()).collect()
    }

    /// Drops `id` from the result (used when it has been actioned).
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.entities.iter().position(|e| e.id == id) else {
            return false;
        };
        self.entities.remove(pos);
        if pos < self.non_excluded_count {
            self.non_excluded_count -= 1;
        } else {
            self.excluded_count = self.excluded_count.saturating_sub(1);
        }
        self.fingerprint = fingerprint(self.entities.iter().map(|e| e.id.as_str()));
        true
    }
}

/// Compute a SHA-256 over the sorted, de-duplicated ids, returned as 64-char hex.
pub fn fingerprint<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let sorted: BTreeSet<&str> = ids.into_iter().collect();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities(ids: &[&str]) -> Vec<Entity> {
        ids.iter().map(|id| Entity::new(*id, id.to_uppercase())).collect()
    }

    #[test]
    fn entity_identity_is_by_id() {
        let a = Entity::new("alice", "Alice");
        let b = Entity::new("alice", "Someone Else");
        assert_eq!(a, b);
        assert_ne!(a, Entity::new("bob", "Alice"));
    }

    #[test]
    fn assemble_orders_non_excluded_first_and_caps() {
        let exclusions: ExclusionSet = ["b", "d"].into_iter().collect();
        let result =
            HarvestResult::assemble(entities(&["a", "b", "c", "d", "e", "f"]), &exclusions, 3, false);

        let ids: Vec<_> = result.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "e", "b", "d"]);
        assert_eq!(result.non_excluded_count, 3);
        assert_eq!(result.excluded_count, 2);
    }

    #[test]
    fn assemble_drops_duplicates() {
        let result = HarvestResult::assemble(
            entities(&["a", "b", "a", "c", "b"]),
            &ExclusionSet::new(),
            100,
            false,
        );
        assert_eq!(result.entities.len(), 3);
    }

    #[test]
    fn action_list_never_contains_excluded() {
        let exclusions: ExclusionSet = ["b"].into_iter().collect();
        let mut result =
            HarvestResult::assemble(entities(&["a", "b", "c"]), &ExclusionSet::new(), 100, false);
        // Exclusion added after the harvest still wins.
        let list = result.action_list(&exclusions);
        assert!(list.iter().all(|e| e.id != "b"));
        assert_eq!(list.len(), 2);

        assert!(result.remove("a"));
        assert!(!result.remove("a"));
        assert_eq!(result.entities.len(), 2);
    }

    #[test]
    fn fingerprint_ignores_order() {
        assert_eq!(fingerprint(["a", "b", "c"]), fingerprint(["c", "a", "b"]));
        assert_ne!(fingerprint(["a", "b"]), fingerprint(["ab"]));
        assert_eq!(fingerprint(["a"]).len(), 64);
    }

    #[test]
    fn exclusion_set_mark_retained() {
        let mut set = ExclusionSet::new();
        assert!(set.mark_retained("alice", true));
        assert!(!set.mark_retained("alice", true));
        assert!(set.contains("alice"));
        assert!(set.mark_retained("alice", false));
        assert!(set.is_empty());
    }

    #[test]
    fn exclusion_set_serializes_as_array() {
        let set: ExclusionSet = ["b", "a"].into_iter().collect();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, serde_json::json!(["a", "b"]));
    }
}
