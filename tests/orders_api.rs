//! Tests for the order lookup endpoint, the root redirect rule, and /health.

use axum::{body::Body, http::Request};
use tower::ServiceExt;

mod common;
use common::*;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn order_lookup_returns_order_with_items() {
    let state = create_test_app_state("http://stripe.invalid");
    {
        let mut conn = state.db.get().unwrap();
        queries::upsert_order(
            &conn,
            "O1",
            &OrderPatch {
                customer_name: Some("Ayesha Khan".to_string()),
                subtotal: Some(2400.0),
                status: Some(OrderStatus::Paid),
                ..Default::default()
            },
        )
        .unwrap();
        queries::replace_order_items(
            &mut conn,
            "O1",
            &[NewOrderItem {
                product_id: Some("p1".to_string()),
                name: "Almonds 1kg".to_string(),
                price: 1200.0,
                quantity: 2,
                total: 2400.0,
            }],
        )
        .unwrap();
    }

    let response = app(state).oneshot(get("/orders/O1")).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "O1");
    assert_eq!(body["status"], "paid");
    assert_eq!(body["subtotal"], 2400.0);
    assert_eq!(body["items"][0]["name"], "Almonds 1kg");
    assert_eq!(body["items"][0]["quantity"], 2);
}

#[tokio::test]
async fn order_lookup_unknown_id_is_404() {
    let state = create_test_app_state("http://stripe.invalid");
    let response = app(state).oneshot(get("/orders/missing")).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["details"], "Order not found");
}

#[tokio::test]
async fn root_with_order_id_redirects_to_confirmation() {
    let state = create_test_app_state("http://stripe.invalid");
    let response = app(state).oneshot(get("/?order_id=O1")).await.unwrap();

    assert_eq!(
        response.status(),
        axum::http::StatusCode::TEMPORARY_REDIRECT
    );
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert_eq!(location, "/order-confirmation?order_id=O1");
}

#[tokio::test]
async fn root_redirect_re_encodes_the_order_id() {
    let state = create_test_app_state("http://stripe.invalid");
    let response = app(state)
        .oneshot(get("/?order_id=a%20b%26c"))
        .await
        .unwrap();

    assert_eq!(
        response.status(),
        axum::http::StatusCode::TEMPORARY_REDIRECT
    );
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert_eq!(location, "/order-confirmation?order_id=a+b%26c");
}

#[tokio::test]
async fn root_without_order_id_is_a_liveness_probe() {
    let state = create_test_app_state("http://stripe.invalid");
    let response = app(state).oneshot(get("/")).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn health_reports_version() {
    let state = create_test_app_state("http://stripe.invalid");
    let response = app(state).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
