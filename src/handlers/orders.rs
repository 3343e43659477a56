//! Order lookup for the confirmation view, plus the root redirect rule that
//! moves shoppers off the transitional success URL.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, OptionExt, Result};
use crate::extractors::{Json, Query};
use crate::models::{Order, OrderItem};

#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Look up an order and its line items by the correlation identifier.
///
/// A 404 here can be a legitimate transient state: the shopper may land on
/// the confirmation view before the webhook has reconciled the payment.
/// Clients poll through it rather than treating it as terminal.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>> {
    let conn = state.db.get()?;
    let order = queries::find_order(&conn, &id)?.or_not_found(msg::ORDER_NOT_FOUND)?;
    let items = queries::list_order_items(&conn, &id)?;
    Ok(Json(OrderWithItems { order, items }))
}

#[derive(Debug, Deserialize)]
pub struct RootQuery {
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Serialize)]
struct LivenessResponse {
    status: &'static str,
    message: &'static str,
}

/// Success redirects land on the root with `order_id` attached; forward them
/// to the confirmation path so the transitional URL doesn't stay in browser
/// history. Without the parameter this is a plain liveness response.
pub async fn root(Query(query): Query<RootQuery>) -> Response {
    match query.order_id {
        Some(order_id) => {
            let params = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("order_id", &order_id)
                .finish();
            Redirect::temporary(&format!("/order-confirmation?{}", params)).into_response()
        }
        None => Json(LivenessResponse {
            status: "ok",
            message: "Storegate running",
        })
        .into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/orders/{id}", get(get_order))
}
