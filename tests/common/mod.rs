//! Test utilities and fixtures for Storegate integration tests

#![allow(dead_code)]

use axum::Router;
use hmac::{Hmac, Mac};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use sha2::Sha256;

pub use storegate::config::StripeConfig;
pub use storegate::db::{init_db, queries, AppState, DbPool};
pub use storegate::models::*;
pub use storegate::payments::StripeClient;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Create an in-memory pool limited to a single connection so every handle
/// the handlers check out sees the same database.
pub fn setup_test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to build test pool");
    {
        let conn = pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    pool
}

/// Create an AppState whose payment client targets the given API base
/// (usually a wiremock server).
pub fn create_test_app_state(api_base: &str) -> AppState {
    AppState {
        db: setup_test_pool(),
        stripe: StripeClient::new(&StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        })
        .with_api_base(api_base),
        site_url: "http://localhost:3000".to_string(),
        currency: "pkr".to_string(),
        webhook_test_token: None,
    }
}

/// Build the full application router over a test state.
pub fn app(state: AppState) -> Router {
    storegate::handlers::router().with_state(state)
}

/// Produce a `stripe-signature` header valid for the given payload right now.
pub fn sign_payload(payload: &[u8]) -> String {
    sign_with(payload, TEST_WEBHOOK_SECRET, chrono::Utc::now().timestamp())
}

pub fn sign_with(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Drain a response body into parsed JSON.
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&bytes).expect("Response should be valid JSON")
}

/// Count rows in the orders table.
pub fn count_orders(pool: &DbPool) -> i64 {
    let conn = pool.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
        .unwrap()
}
