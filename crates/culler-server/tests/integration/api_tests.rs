use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use culler_core::progress::ObserverEvent;
use culler_core::store::{keys, read_key};

use crate::integration::common::{
    TEST_API_KEY, get, json_body, send_json, setup_test_app, wait_until_idle,
};

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app(0);

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store"], "ok");
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app(0);

    let response = app
        .router
        .oneshot(Request::get("/v1/progress").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app(0);

    let response = app
        .router
        .oneshot(
            Request::get("/v1/progress")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn progress_is_idle_before_any_run() {
    let app = setup_test_app(0);

    let response = app.router.oneshot(get("/v1/progress")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "idle");
    assert_eq!(json["unfollowed"], 0);
    assert!(json["active_run"].is_null());
}

#[tokio::test]
async fn harvest_then_execute_from_harvest() {
    let app = setup_test_app(40);

    // Retain one account before harvesting.
    let response = app
        .router
        .clone()
        .oneshot(send_json("PUT", "/v1/exclusions/user003", json!({ "retained": true })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["ids"], json!(["user003"]));

    let response = app
        .router
        .clone()
        .oneshot(send_json("POST", "/v1/harvest", json!({ "target": 6 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["run"], "harvest");
    wait_until_idle(&app.router).await;

    let response = app.router.clone().oneshot(get("/v1/harvest")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let harvest = json_body(response).await;
    let accounts = harvest["accounts"].as_array().unwrap();
    assert_eq!(accounts.len(), 6);
    assert!(accounts.iter().all(|a| a["id"] != "user003"));

    let response = app
        .router
        .clone()
        .oneshot(send_json(
            "POST",
            "/v1/execution",
            json!({ "from_harvest": true, "confirmed": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let progress = wait_until_idle(&app.router).await;
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["unfollowed"], 6);
    assert_eq!(app.list.confirmed_ids().len(), 6);
    assert!(!app.list.confirmed_ids().contains(&"user003".to_string()));
}

#[tokio::test]
async fn rejected_execution_actions_nothing() {
    let app = setup_test_app(10);

    let response = app
        .router
        .clone()
        .oneshot(send_json(
            "POST",
            "/v1/execution",
            json!({ "accounts": [{ "id": "@user001" }], "confirmed": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_until_idle(&app.router).await;
    assert!(app.list.confirmed_ids().is_empty());
}

#[tokio::test]
async fn remember_persists_auto_confirm() {
    let app = setup_test_app(10);

    let response = app
        .router
        .clone()
        .oneshot(send_json(
            "POST",
            "/v1/execution",
            json!({
                "accounts": [{ "id": "user002", "label": "Two" }],
                "confirmed": true,
                "remember": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    wait_until_idle(&app.router).await;

    let flag: Option<bool> = read_key(&app.store, keys::AUTO_CONFIRM).await.unwrap();
    assert_eq!(flag, Some(true));
    assert_eq!(app.list.confirmed_ids(), ["user002"]);
}

#[tokio::test]
async fn execute_from_missing_harvest_returns_404() {
    let app = setup_test_app(5);

    let response = app
        .router
        .oneshot(send_json(
            "POST",
            "/v1/execution",
            json!({ "from_harvest": true, "confirmed": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");
}

#[tokio::test]
async fn get_harvest_before_any_returns_404() {
    let app = setup_test_app(5);
    let response = app.router.oneshot(get("/v1/harvest")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_run_conflicts_and_stop_cancels() {
    let app = setup_test_app(10);
    // The host throttles after two actions, parking the run in its cooldown.
    app.list.rate_limit_after(2, Duration::from_secs(60));

    let accounts: Vec<_> = (0..5).map(|i| json!({ "id": format!("user{i:03}") })).collect();
    let response = app
        .router
        .clone()
        .oneshot(send_json(
            "POST",
            "/v1/execution",
            json!({ "accounts": accounts, "confirmed": true }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .router
        .clone()
        .oneshot(send_json("POST", "/v1/harvest", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "conflict");

    let response = app
        .router
        .clone()
        .oneshot(send_json("POST", "/v1/reset", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .router
        .clone()
        .oneshot(send_json("POST", "/v1/stop", json!({})))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["stopped"], true);

    let progress = wait_until_idle(&app.router).await;
    assert_eq!(progress["status"], "stopped");
    assert!(app.list.confirmed_ids().len() <= 2);

    let response = app
        .router
        .clone()
        .oneshot(send_json("POST", "/v1/stop", json!({})))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["stopped"], false);
}

#[tokio::test]
async fn reset_keeps_exclusions() {
    let app = setup_test_app(5);

    app.router
        .clone()
        .oneshot(send_json("PUT", "/v1/exclusions/alice", json!({ "retained": true })))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(send_json("POST", "/v1/reset", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.router.clone().oneshot(get("/v1/exclusions")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["ids"], json!(["alice"]));
    assert_eq!(json["total"], 1);
}

#[tokio::test]
async fn logs_record_retention_changes() {
    let app = setup_test_app(5);

    app.router
        .clone()
        .oneshot(send_json("PUT", "/v1/exclusions/bob", json!({ "retained": true })))
        .await
        .unwrap();
    app.router
        .clone()
        .oneshot(send_json("PUT", "/v1/exclusions/bob", json!({ "retained": false })))
        .await
        .unwrap();

    let response = app.router.oneshot(get("/v1/logs?limit=1")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["total"], 1);
    assert_eq!(json["entries"][0]["scope"], "bob");
    assert_eq!(json["entries"][0]["message"], "No longer retained");
}

#[tokio::test]
async fn observer_events_reach_subscribers() {
    let app = setup_test_app(20);
    let mut rx = app.events.subscribe();

    app.router
        .clone()
        .oneshot(send_json("POST", "/v1/harvest", json!({ "target": 3 })))
        .await
        .unwrap();
    wait_until_idle(&app.router).await;

    let mut saw_complete = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ObserverEvent::HarvestComplete { found: 3, .. }) {
            saw_complete = true;
        }
    }
    assert!(saw_complete);
}

#[tokio::test]
async fn events_stream_requires_auth() {
    let app = setup_test_app(0);

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/v1/events").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .oneshot(
            Request::get("/v1/events")
                .header("authorization", format!("Bearer {TEST_API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );
}
