//! Session Initiator: turns a cart plus shipping info into a hosted
//! checkout session, generating the order correlation id up front.

use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use url::Url;
use uuid::Uuid;

use crate::db::AppState;
use crate::error::{msg, AppError, Result};
use crate::extractors::Json;
use crate::payments::{CheckoutContact, ProviderLineItem};
use crate::reconcile::to_minor_units;

#[derive(Debug, Deserialize)]
pub struct CartItem {
    pub id: String,
    pub name: String,
    /// Unit price in the store's base currency units.
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShippingInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub cart: Vec<CartItem>,
    #[serde(default)]
    pub shipping: Option<ShippingInfo>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Provider-hosted payment page to redirect the shopper to.
    pub url: String,
    /// Provider's checkout transaction id.
    pub id: String,
    /// Our correlation identifier, generated before any payment exists.
    pub order_id: String,
}

/// Compose `base + path + params` without malformed double slashes or
/// missing separators.
fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<String> {
    let base = Url::parse(base)
        .map_err(|e| AppError::Configuration(format!("invalid site URL '{}': {}", base, e)))?;
    let mut url = base
        .join(path)
        .map_err(|e| AppError::Internal(format!("failed to build redirect URL: {}", e)))?;
    for (key, value) in params {
        url.query_pairs_mut().append_pair(key, value);
    }
    Ok(url.into())
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    if request.cart.is_empty() {
        return Err(AppError::InvalidCart(msg::CART_EMPTY.into()));
    }

    // Generated here, before the provider knows anything - this id is the
    // correlation key the webhook uses to find its way back to the order.
    let order_id = Uuid::new_v4().to_string();

    let line_items: Vec<ProviderLineItem> = request
        .cart
        .iter()
        .map(|item| ProviderLineItem {
            name: item.name.clone(),
            unit_amount: to_minor_units(item.price.max(0.0)),
            quantity: item.quantity.max(1),
            image: item.image.clone(),
        })
        .collect();

    let contact = request
        .shipping
        .map(|s| CheckoutContact {
            name: s.name,
            email: s.email,
            phone: s.phone,
            address: s.address,
        })
        .unwrap_or_default();

    // Success lands on the root with the order id as a query parameter; a
    // companion redirect rule forwards it to the confirmation view.
    let success_url = build_url(&state.site_url, "/", &[("order_id", &order_id)])?;
    let cancel_url = build_url(&state.site_url, "/shop", &[])?;

    tracing::info!(
        "Creating checkout session: order_id={}, {} item(s)",
        order_id,
        line_items.len()
    );

    let session = state
        .stripe
        .create_checkout_session(
            &order_id,
            &state.currency,
            &line_items,
            &contact,
            &success_url,
            &cancel_url,
        )
        .await?;

    Ok(Json(CheckoutResponse {
        url: session.url,
        id: session.id,
        order_id,
    }))
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    message: &'static str,
}

async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        message: "Use POST to create a checkout session.",
    })
}

pub fn router() -> Router<AppState> {
    // Browser-facing endpoint: echo the request origin and answer preflights.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route(
            "/checkout/session",
            post(create_checkout_session).get(liveness),
        )
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_handles_trailing_slash() {
        let with = build_url("https://shop.example.com/", "/", &[("order_id", "o1")]).unwrap();
        let without = build_url("https://shop.example.com", "/", &[("order_id", "o1")]).unwrap();
        assert_eq!(with, "https://shop.example.com/?order_id=o1");
        assert_eq!(with, without);
    }

    #[test]
    fn build_url_joins_paths_cleanly() {
        let url = build_url("https://shop.example.com/", "/shop", &[]).unwrap();
        assert_eq!(url, "https://shop.example.com/shop");
        assert!(!url.contains("//shop"));
    }

    #[test]
    fn build_url_encodes_params() {
        let url = build_url("https://shop.example.com", "/", &[("order_id", "a b&c")]).unwrap();
        assert_eq!(url, "https://shop.example.com/?order_id=a+b%26c");
    }

    #[test]
    fn build_url_rejects_bad_base() {
        assert!(build_url("not a url", "/", &[]).is_err());
    }
}
