pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use axum::http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use state::AppState;

pub async fn serve(state: AppState, bind_addr: &str, cors_origins: &[String]) -> Result<()> {
    let cors = if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        // Pricing (public)
        .route("/pricing/quote", get(handlers::pricing::quote))
        // Orders (JWT required)
        .route(
            "/orders",
            get(handlers::orders::list).post(handlers::orders::create),
        )
        .route("/orders/{id}", get(handlers::orders::get_one))
        .route("/orders/{id}/pay", post(handlers::orders::pay))
        .route("/orders/{id}/sync", post(handlers::orders::sync))
        .route("/orders/{id}/cancel", post(handlers::orders::cancel))
        // Chat surface bridge (JWT required)
        .route("/chat/start", post(handlers::chat::start))
        .route("/chat/advance", post(handlers::chat::advance))
        // Gateway callbacks (signature-verified)
        .route("/payments/webhook", post(handlers::webhook::receive))
        // Admin
        .route("/admin/orders/{id}/retry", post(handlers::admin::retry))
        .route(
            "/admin/orders/{id}/mark-success",
            post(handlers::admin::mark_success),
        )
        .layer(cors)
        .with_state(state);

    info!(%bind_addr, "kios API listening");

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding to {bind_addr}"))?;
    axum::serve(listener, app).await.context("running server")?;

    Ok(())
}
