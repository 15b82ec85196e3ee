pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod opds;
pub mod parsers;
pub mod search;
pub mod server_stats;
pub mod state;
pub mod stats;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use tower::ServiceBuilder;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::load_shed::LoadShedLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::state::AppState;

/// Global cap on concurrently served connections; excess requests are shed
/// with 503.
pub const MAX_CONNECTIONS: usize = 100;

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let stats = state.server_stats.snapshot();
    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "library_root": state.config.library.path,
        "database": if db_ok { "connected" } else { "error" },
        "scanning": crate::ingest::scanner::is_scanning(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "requests": stats,
    }))
}

async fn shed_overload(_err: tower::BoxError) -> AppError {
    AppError::RateLimited
}

/// Assemble the full application router: the catalog under the configured
/// root prefix, the status endpoint, and the connection cap.
pub fn build_router(state: AppState) -> Router {
    let catalog = opds::router(state.clone());
    let prefix = state.config.route_prefix();

    let router = if prefix.is_empty() {
        Router::new().merge(catalog)
    } else {
        Router::new().nest(&prefix, catalog)
    };

    router
        .route("/status", get(status))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(shed_overload))
                .layer(LoadShedLayer::new())
                .layer(GlobalConcurrencyLimitLayer::new(MAX_CONNECTIONS)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
