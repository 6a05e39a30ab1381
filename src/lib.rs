pub mod client_ip;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod store;

use crate::client_ip::{ClientIpResolver, TrustedProxyConfig};
use crate::config::{AppConfig, LimitsConfig};
use crate::error::{GateError, Result};
use crate::rate_limit::{policies, rate_limit_middleware, RateLimitMiddleware, RateLimiter};
use crate::store::{MemoryStore, RateLimitStore, RedisStore};
use axum::{
    extract::Path,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Start the gate server
pub async fn serve(config: AppConfig) -> Result<()> {
    config.validate()?;

    info!("Starting PharmaGate");

    let store: Arc<dyn RateLimitStore> = match &config.redis {
        Some(redis) => {
            let store = RedisStore::connect(&redis.url).await?;
            store.ping().await?;
            info!(url = %redis.url, "Using Redis-backed rate limit store");
            Arc::new(store)
        }
        None => {
            warn!("No Redis configured; rate limit state is process-local");
            Arc::new(MemoryStore::new())
        }
    };

    let resolver = Arc::new(ClientIpResolver::new(TrustedProxyConfig::from_env()));
    let app = build_app(store, resolver, &config.limits)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GateError::Io)?;

    info!("PharmaGate listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| GateError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Build the application router with every endpoint family behind its
/// limiter. The limiters are constructed here, once, and shared via the
/// middleware state; nothing else in the crate holds limiter instances.
pub fn build_app(
    store: Arc<dyn RateLimitStore>,
    resolver: Arc<ClientIpResolver>,
    limits: &LimitsConfig,
) -> Result<Router> {
    let submission = RateLimitMiddleware::new(
        Arc::new(RateLimiter::new(
            policies::review_submission(&limits.review_submission),
            store.clone(),
        )?),
        resolver.clone(),
    );
    let read = RateLimitMiddleware::new(
        Arc::new(RateLimiter::new(
            policies::review_read(&limits.review_read),
            store.clone(),
        )?),
        resolver.clone(),
    );
    let general = RateLimitMiddleware::new(
        Arc::new(RateLimiter::new(
            policies::general_api(&limits.general_api),
            store,
        )?),
        resolver,
    );

    let submission_routes = Router::new()
        .route("/store/reviews", post(submit_review))
        .route("/store/products/:id/reviews", post(submit_product_review))
        .layer(middleware::from_fn_with_state(
            submission,
            rate_limit_middleware,
        ));

    let read_routes = Router::new()
        .route("/store/reviews", get(list_reviews))
        .route("/store/products/:id/reviews", get(list_product_reviews))
        .layer(middleware::from_fn_with_state(read, rate_limit_middleware));

    let admin_routes = Router::new()
        .route("/admin/reviews", get(list_admin_reviews))
        .layer(middleware::from_fn_with_state(
            general,
            rate_limit_middleware,
        ));

    Ok(Router::new()
        .merge(submission_routes)
        .merge(read_routes)
        .merge(admin_routes)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http()))
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pharma_gate=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}

// The review CRUD itself lives in the commerce backend; these handlers
// acknowledge admitted requests so the admission layer can run standalone.

async fn submit_review() -> impl IntoResponse {
    (StatusCode::CREATED, Json(json!({ "status": "accepted" })))
}

async fn submit_product_review(Path(id): Path<String>) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(json!({ "status": "accepted", "product_id": id })),
    )
}

async fn list_reviews() -> impl IntoResponse {
    Json(json!({ "reviews": [], "count": 0 }))
}

async fn list_product_reviews(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({ "product_id": id, "reviews": [], "count": 0 }))
}

async fn list_admin_reviews() -> impl IntoResponse {
    Json(json!({ "reviews": [], "count": 0 }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
