pub mod checkout;
pub mod orders;
pub mod webhook;

use axum::{routing::get, Router};
use serde::Serialize;

use crate::db::AppState;
use crate::extractors::Json;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Checkout endpoints (browser-facing, CORS enabled)
        .merge(checkout::router())
        // Webhook endpoints (provider-facing, signature auth)
        .merge(webhook::router())
        // Order lookup for the confirmation view, plus the root redirect rule
        .merge(orders::router())
}
