use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use culler_client::{MarkupCellParser, WebhookObserver};
use culler_core::{Controller, CullerConfig};
use culler_db::{DatabaseConfig, StateStore};
use culler_server::config::ServerConfig;
use culler_server::observer::{EVENT_BUFFER, ServerObserver};
use culler_server::routes;
use culler_server::state::{AppState, Operator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("culler=info".parse()?))
        .with_target(false)
        .init();

    let server = ServerConfig::from_env()?;
    let config = CullerConfig::from_env()?;

    let database = if std::env::var("DATABASE_URL").is_ok() {
        Some(DatabaseConfig::from_env()?)
    } else {
        None
    };
    let state_file = std::env::var("CULLER_STATE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("culler-state.json"));
    let store = StateStore::open(database, state_file).await?;

    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let webhook = std::env::var("CULLER_WEBHOOK_URL")
        .ok()
        .map(|url| WebhookObserver::new(&url))
        .transpose()?;
    let observer = ServerObserver::new(events.clone(), webhook);
    let parser = MarkupCellParser::new()?;

    let operator = operator(parser, store, observer, config).await?;
    let state = Arc::new(AppState {
        operator: operator.clone(),
        api_key: server.api_key.clone(),
        events,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = server.addr();
    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(operator.clone()))
        .await?;

    wait_for_run_to_finish(operator.as_ref()).await;
    Ok(())
}

/// Gives a stopped run time to persist its state before the process exits.
async fn wait_for_run_to_finish(operator: &dyn Operator) {
    const GRACE: Duration = Duration::from_secs(15);
    let deadline = tokio::time::Instant::now() + GRACE;
    while let Some(kind) = operator.active() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(run = kind.as_str(), "Run still active at exit");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Browser-backed controller on the following list of `CULLER_HANDLE`.
#[cfg(feature = "browser")]
async fn operator(
    parser: MarkupCellParser,
    store: StateStore,
    observer: ServerObserver,
    config: CullerConfig,
) -> anyhow::Result<Arc<dyn Operator>> {
    use anyhow::Context;
    use culler_client::{BrowserConfig, BrowserHost};

    let handle = std::env::var("CULLER_HANDLE").context("CULLER_HANDLE must be set")?;
    let host = BrowserHost::launch(BrowserConfig {
        selectors: config.selectors.clone(),
        ..BrowserConfig::from_env()
    })
    .await
    .context("Failed to start browser")?;
    host.open_following(&handle)
        .await
        .with_context(|| format!("Failed to open the following list of @{handle}"))?;

    Ok(Arc::new(Controller::new(
        host.clone(),
        parser,
        host,
        store,
        observer,
        config,
    )))
}

/// Without a browser only the state endpoints work; runs fail with a host error.
#[cfg(not(feature = "browser"))]
async fn operator(
    parser: MarkupCellParser,
    store: StateStore,
    observer: ServerObserver,
    config: CullerConfig,
) -> anyhow::Result<Arc<dyn Operator>> {
    use culler_core::DetachedHost;

    tracing::warn!("Built without browser support; harvest and execution are unavailable");
    let controller = Controller::new(DetachedHost, parser, DetachedHost, store, observer, config);
    Ok(Arc::new(controller))
}

/// Waits for Ctrl-C, then stops the active run so its state is flushed.
async fn shutdown_signal(operator: Arc<dyn Operator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    operator.stop();
}
