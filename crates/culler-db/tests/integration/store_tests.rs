use culler_core::models::{Entity, ExclusionSet};
use culler_core::progress::{ProgressSnapshot, RunStatus};
use culler_core::store::{keys, read_key, write_key};
use culler_core::task_state::{ResumeSource, TaskStateStore};
use culler_core::traits::{PersistentStore, Record};
use culler_db::{Database, PgStore};
use serde_json::json;

use crate::integration::common::setup_test_db;

fn record(pairs: &[(&str, serde_json::Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn entities(ids: &[&str]) -> Vec<Entity> {
    ids.iter().map(|id| Entity::new(*id, id.to_uppercase())).collect()
}

#[tokio::test]
async fn set_get_remove() {
    let (pool, _container) = setup_test_db().await;
    let store = PgStore::new(pool, "default");

    store
        .set(record(&[
            ("exclusionSet", json!(["alice"])),
            ("autoConfirmFlag", json!(true)),
        ]))
        .await
        .unwrap();

    let got = store
        .get(&["exclusionSet", "autoConfirmFlag", "missing"])
        .await
        .unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got["exclusionSet"], json!(["alice"]));
    assert_eq!(got["autoConfirmFlag"], json!(true));

    store.remove(&["autoConfirmFlag"]).await.unwrap();
    let got = store.get(&["exclusionSet", "autoConfirmFlag"]).await.unwrap();
    assert_eq!(got.len(), 1);
    assert!(got.contains_key("exclusionSet"));
}

#[tokio::test]
async fn set_overwrites_existing_key() {
    let (pool, _container) = setup_test_db().await;
    let store = PgStore::new(pool, "default");

    write_key(&store, keys::AUTO_CONFIRM, &false).await.unwrap();
    write_key(&store, keys::AUTO_CONFIRM, &true).await.unwrap();

    let flag: Option<bool> = read_key(&store, keys::AUTO_CONFIRM).await.unwrap();
    assert_eq!(flag, Some(true));
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    let first = db.store("first");
    let second = db.store("second");

    write_key(&first, keys::TARGET_LIST, &entities(&["a"]))
        .await
        .unwrap();

    let missing: Option<Vec<Entity>> = read_key(&second, keys::TARGET_LIST).await.unwrap();
    assert!(missing.is_none());

    second.remove(&[keys::TARGET_LIST]).await.unwrap();
    let kept: Option<Vec<Entity>> = read_key(&first, keys::TARGET_LIST).await.unwrap();
    assert_eq!(kept.unwrap().len(), 1);
}

#[tokio::test]
async fn task_state_survives_reconnect() {
    let (pool, _container) = setup_test_db().await;
    let tasks = TaskStateStore::new(PgStore::new(pool.clone(), "default"));

    let plan = tasks
        .resume(Some(entities(&["a", "b", "c"])), &ExclusionSet::new())
        .await
        .unwrap();
    assert_eq!(plan.source, ResumeSource::Fresh);

    let mut state = plan.state;
    state.complete("a");
    tasks.save(&state).await.unwrap();

    // A new store over the same table picks the saved batch up.
    let reopened = TaskStateStore::new(PgStore::new(pool, "default"));
    let plan = reopened
        .resume(Some(entities(&["x", "y"])), &ExclusionSet::new())
        .await
        .unwrap();
    assert_eq!(plan.source, ResumeSource::Resumed);
    assert_eq!(plan.state.completed.len(), 1);
    let pending: Vec<&str> = plan.state.pending.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(pending, ["b", "c"]);
}

#[tokio::test]
async fn rehydrates_from_target_list_after_lost_task() {
    let (pool, _container) = setup_test_db().await;
    let store = PgStore::new(pool, "default");
    let tasks = TaskStateStore::new(store.clone());

    tasks.reseed(&entities(&["a", "b", "c"])).await.unwrap();
    let snapshot = ProgressSnapshot::new(RunStatus::Running, 3, 3, 0);
    write_key(&store, keys::PROGRESS_SNAPSHOT, &snapshot)
        .await
        .unwrap();

    let mut exclusions = ExclusionSet::new();
    exclusions.mark_retained("b", true);
    let plan = tasks.resume(None, &exclusions).await.unwrap();

    assert_eq!(plan.source, ResumeSource::Rehydrated);
    let pending: Vec<&str> = plan.state.pending.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(pending, ["a", "c"]);
}
