use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Shared user-facing message constants so handlers and tests agree on wording.
pub mod msg {
    pub const CART_EMPTY: &str = "Cart is empty";
    pub const ORDER_NOT_FOUND: &str = "Order not found";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
    pub const MISSING_SIGNATURE_HEADER: &str = "Missing stripe-signature header";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Missing configuration: {0}")]
    Configuration(String),

    #[error("Payment provider error: {0}")]
    PaymentProvider(String),

    /// The event cannot be tied to an order and never will be. Webhook
    /// handlers acknowledge these with 200 so the provider stops retrying.
    #[error("Event cannot be correlated to an order: {0}")]
    CorrelationMissing(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::InvalidCart(msg) => (StatusCode::BAD_REQUEST, msg::CART_EMPTY, {
                // Keep the short form when the detail just repeats the message
                if msg == msg::CART_EMPTY {
                    None
                } else {
                    Some(msg.clone())
                }
            }),
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::BAD_REQUEST, "Missing server configuration", None)
            }
            AppError::PaymentProvider(msg) => {
                tracing::error!("Payment provider error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to talk to payment provider",
                    None,
                )
            }
            AppError::CorrelationMissing(msg) => {
                // Reaching IntoResponse with this variant is a programming
                // error - webhook handlers acknowledge it with 200 instead.
                tracing::warn!("Uncorrelatable event surfaced as response: {}", msg);
                (StatusCode::OK, "Event ignored", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Convert `Option<T>` lookups into `NotFound` errors without a closure at
/// every call site.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
