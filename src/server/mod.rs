//! HTTP server: shared state, routes, and runtime entry.

mod handlers;
pub mod types;

pub use handlers::{
    LLMUX_CACHED_HEADER, LLMUX_LATENCY_MS_HEADER, LLMUX_MODEL_HEADER, LLMUX_PROVIDER_HEADER,
    LLMUX_REQUEST_ID_HEADER,
};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::cache;
use crate::config::Config;
use crate::router::AiService;
use crate::storage;

/// Correlation ID (UUID v4) assigned to every incoming request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AiService>,
    pub config: Arc<Config>,
    pub db: Option<SqlitePool>,
}

/// Create the axum router with all endpoints.
///
/// Requests beyond `server.max_in_flight` queue at the outermost layer;
/// the permit is released when the response completes.
pub fn create_router(state: AppState) -> Router {
    let max_in_flight = state.config.server.max_in_flight;
    Router::new()
        .route("/v1/respond", post(handlers::respond))
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/providers", get(handlers::list_providers))
        .route("/v1/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .layer(middleware::from_fn(assign_request_id))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(RequestId(Uuid::new_v4()));
    next.run(request).await
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    // Per-request timeouts live in the provider configs; this is the
    // outer bound for any single upstream exchange.
    let http_client = Client::builder()
        .timeout(Duration::from_secs(120))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let service = Arc::new(AiService::from_config(&config, http_client));

    if let Some(cache) = service.cache() {
        cache::spawn_sweeper(Arc::clone(cache));
    }

    let db = match &config.database {
        Some(database) => Some(storage::init_pool(&database.path).await?),
        None => None,
    };

    let state = AppState {
        service,
        config: Arc::new(config),
        db,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "starting llmux server");

    axum::serve(listener, app).await?;

    Ok(())
}
