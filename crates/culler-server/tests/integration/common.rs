use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use tokio::sync::broadcast;
use tower::ServiceExt;

use culler_core::config::PacingConfig;
use culler_core::progress::ObserverEvent;
use culler_core::testutil::{FakeList, FakeParser};
use culler_core::{Controller, CullerConfig, MemoryStore};
use culler_server::observer::{EVENT_BUFFER, ServerObserver};
use culler_server::routes;
use culler_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub list: FakeList,
    pub store: MemoryStore,
    pub events: broadcast::Sender<ObserverEvent>,
}

/// Router over a controller driving a simulated list of `accounts` rows,
/// with no pacing delays.
pub fn setup_test_app(accounts: usize) -> TestApp {
    let ids: Vec<String> = (0..accounts).map(|i| format!("user{i:03}")).collect();
    let list = FakeList::new(&ids);
    let store = MemoryStore::new();
    let (events, _) = broadcast::channel(EVENT_BUFFER);

    let mut config = CullerConfig::new();
    config.pacing = PacingConfig::immediate();
    let controller = Controller::new(
        list.clone(),
        FakeParser,
        list.clone(),
        store.clone(),
        ServerObserver::new(events.clone(), None),
        config,
    );

    let state = Arc::new(AppState {
        operator: Arc::new(controller),
        api_key: TEST_API_KEY.to_string(),
        events: events.clone(),
    });

    TestApp {
        router: routes::router(state),
        list,
        store,
        events,
    }
}

pub fn get(path: &str) -> Request<Body> {
    Request::get(path)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

pub fn send_json(method: &str, path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Polls `/v1/progress` until no run is active, then returns the snapshot.
pub async fn wait_until_idle(router: &Router) -> serde_json::Value {
    for _ in 0..500 {
        let response = router.clone().oneshot(get("/v1/progress")).await.unwrap();
        let json = json_body(response).await;
        if json["active_run"].is_null() {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Run did not finish in time");
}
