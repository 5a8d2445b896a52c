use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use culler_core::{Decision, ExecutionRequest, RunKind};

use crate::auth::require_api_key;
use crate::dto::{
    ErrorResponse, ExclusionListResponse, HarvestResponse, HealthResponse, LogEntryResponse,
    LogListResponse, LogsQuery, ProgressResponse, RetainRequest, RunStartedResponse,
    StartExecutionRequest, StartHarvestRequest, StopResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/harvest", post(start_harvest))
        .route("/v1/harvest", get(get_harvest))
        .route("/v1/execution", post(start_execution))
        .route("/v1/stop", post(stop))
        .route("/v1/progress", get(get_progress))
        .route("/v1/exclusions", get(list_exclusions))
        .route("/v1/exclusions/{id}", put(set_retained))
        .route("/v1/scroll-to-bottom", post(scroll_to_bottom))
        .route("/v1/logs", get(get_logs))
        .route("/v1/reset", post(reset))
        .route("/v1/events", get(events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

fn not_found(message: impl Into<String>) -> axum::response::Response {
    let body = ErrorResponse {
        error: "not_found".to_string(),
        message: message.into(),
    };
    (StatusCode::NOT_FOUND, axum::Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Harvest
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/harvest",
    request_body = StartHarvestRequest,
    responses(
        (status = 202, description = "Harvest started", body = RunStartedResponse),
        (status = 409, description = "A run is already active", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "harvest"
)]
pub async fn start_harvest(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StartHarvestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.operator.start_harvest(body.target)?;
    Ok((
        StatusCode::ACCEPTED,
        axum::Json(RunStartedResponse::started(RunKind::Harvest.as_str())),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/harvest",
    responses(
        (status = 200, description = "Last harvest result", body = HarvestResponse),
        (status = 404, description = "No harvest yet", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "harvest"
)]
pub async fn get_harvest(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let Some(result) = state.operator.harvest_result().await? else {
        return Ok(not_found("No harvest result"));
    };
    let exclusions = state.operator.exclusions().await?;
    Ok(axum::Json(HarvestResponse::new(result, &exclusions)).into_response())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/execution",
    request_body = StartExecutionRequest,
    responses(
        (status = 202, description = "Execution started", body = RunStartedResponse),
        (status = 404, description = "No harvest to execute", body = ErrorResponse),
        (status = 409, description = "A run is already active", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "execution"
)]
pub async fn start_execution(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<StartExecutionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let list = match body.accounts {
        Some(accounts) => Some(accounts.into_iter().map(Into::into).collect()),
        None if body.from_harvest => match state.operator.action_list().await? {
            Some(list) => Some(list),
            None => return Ok(not_found("No harvest result to execute")),
        },
        None => None,
    };

    let request = match list {
        Some(list) if body.reseed => ExecutionRequest::reseeded(list),
        Some(list) => ExecutionRequest::with_entities(list),
        None => ExecutionRequest::resume(),
    };
    let decision = Decision {
        accepted: body.confirmed,
        remember: body.confirmed && body.remember,
    };

    state.operator.start_execution(request, decision).await?;
    Ok((
        StatusCode::ACCEPTED,
        axum::Json(RunStartedResponse::started(RunKind::Execution.as_str())),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/v1/stop",
    responses(
        (status = 200, description = "Stop requested", body = StopResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "execution"
)]
pub async fn stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(StopResponse {
        stopped: state.operator.stop(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/scroll-to-bottom",
    responses(
        (status = 202, description = "Scrolling started", body = RunStartedResponse),
        (status = 409, description = "A run is already active", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "execution"
)]
pub async fn scroll_to_bottom(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    state.operator.start_scroll_to_bottom()?;
    Ok((
        StatusCode::ACCEPTED,
        axum::Json(RunStartedResponse::started(RunKind::ScrollToBottom.as_str())),
    ))
}

// ---------------------------------------------------------------------------
// Progress & events
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/progress",
    responses(
        (status = 200, description = "Latest progress snapshot", body = ProgressResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "progress"
)]
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.operator.progress().await?;
    let active = state.operator.active().map(|k| k.as_str());
    Ok(axum::Json(ProgressResponse::new(snapshot, active)))
}

#[utoipa::path(
    get,
    path = "/v1/events",
    responses(
        (status = 200, description = "Server-sent observer events"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "progress"
)]
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().data(data)), rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/exclusions",
    responses(
        (status = 200, description = "Retained accounts", body = ExclusionListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "exclusions"
)]
pub async fn list_exclusions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let set = state.operator.exclusions().await?;
    Ok(axum::Json(ExclusionListResponse::from(set)))
}

#[utoipa::path(
    put,
    path = "/v1/exclusions/{id}",
    params(
        ("id" = String, Path, description = "Account handle")
    ),
    request_body = RetainRequest,
    responses(
        (status = 200, description = "Updated retained accounts", body = ExclusionListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "exclusions"
)]
pub async fn set_retained(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<RetainRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let set = state.operator.mark_retained(&id, body.retained).await?;
    Ok(axum::Json(ExclusionListResponse::from(set)))
}

// ---------------------------------------------------------------------------
// Logs & state
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/logs",
    params(LogsQuery),
    responses(
        (status = 200, description = "Most recent diagnostic log entries", body = LogListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50).min(100);
    let entries = state.operator.logs().await?;
    let skip = entries.len().saturating_sub(limit);
    let entries: Vec<LogEntryResponse> = entries
        .into_iter()
        .skip(skip)
        .map(LogEntryResponse::from)
        .collect();

    Ok(axum::Json(LogListResponse {
        total: entries.len(),
        entries,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/reset",
    responses(
        (status = 204, description = "Run state cleared, retained accounts kept"),
        (status = 409, description = "A run is active", body = ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "system"
)]
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.operator.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_status = match state.operator.progress().await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            "error"
        }
    };

    let status = if store_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if store_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        store: store_status,
    };

    (status, axum::Json(response))
}
