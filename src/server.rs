//! Server wiring: collaborators built once, router over the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::answer::Answerer;
use crate::api;
use crate::config::AppConfig;
use crate::embedding::EmbeddingProvider;
use crate::genmodel::{ExtractRateLimiter, GeminiClient, GenerativeModel};
use crate::graph::cypher::CypherGraphStore;
use crate::graph::GraphStore;
use crate::ingest::Ingestor;
use crate::retrieve::Retriever;
use crate::session::SessionCoordinator;
use crate::store::RelationalStore;
use crate::AppState;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let store = Arc::new(RelationalStore::connect(&config.database_url).await?);
    info!(name: "store.ready", "relational store ready");

    let graph: Arc<dyn GraphStore> = Arc::new(CypherGraphStore::new(
        config.graph.uri.clone(),
        config.graph.database.clone(),
        config.graph.user.clone(),
        config.graph.password.clone(),
    ));
    if let Err(err) = graph.ensure_indices().await {
        error!(error = %err, "failed to ensure graph indices");
    } else {
        info!(name: "graph.ready", "graph indices ensured");
    }

    let embedder =
        Arc::new(EmbeddingProvider::initialize(&config.embedding.model_priority).await);
    info!(
        name: "embedding.ready",
        dimension = embedder.dimension(),
        "embedding provider ready"
    );

    let genmodel: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new(
        config.genmodel.base_url.clone(),
        config.genmodel.model.clone(),
        config.genmodel.api_key.clone(),
    ));

    let limiter = Arc::new(ExtractRateLimiter::new(Duration::from_millis(
        config.genmodel.extract_min_interval_ms,
    )));

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&graph),
        Arc::clone(&genmodel),
        Arc::clone(&embedder),
        Arc::clone(&limiter),
        config.limits.max_upload_bytes,
    )?);

    let retriever = Arc::new(Retriever::new(Arc::clone(&graph), Arc::clone(&embedder)));

    let answerer = Arc::new(Answerer::new(
        Arc::clone(&store),
        Arc::clone(&retriever),
        Arc::clone(&genmodel),
        config.limits.history_token_budget,
    ));

    let state = AppState {
        store,
        graph,
        embedder,
        genmodel,
        ingestor,
        retriever,
        answerer,
        sessions: SessionCoordinator::new(),
        config: config.clone(),
    };

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the router over the HTTP surface.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.limits.max_upload_bytes + 1024 * 1024;

    Router::new()
        .route(
            "/sessions",
            post(api::sessions::create_session).get(api::sessions::list_sessions),
        )
        .route(
            "/sessions/{id}",
            get(api::sessions::get_session)
                .put(api::sessions::update_session)
                .delete(api::sessions::delete_session),
        )
        .route("/ingest", post(api::ingest::ingest))
        .route("/chat", post(api::chat::chat))
        .route("/chat/non-streaming", post(api::chat::chat_non_streaming))
        .route("/chat/history/{session_id}", get(api::chat::history))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
