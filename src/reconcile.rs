//! Payment-to-order reconciliation.
//!
//! The webhook handler funnels every provider shape through one
//! normalization step ([`CheckoutConfirmation::from_provider`]) and one
//! idempotent write ([`record_paid_checkout`]). At-least-once delivery,
//! out-of-order arrival, and duplicate concurrent deliveries all converge
//! to the same final order row and line-item set.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{NewOrderItem, OrderPatch, OrderStatus};
use crate::payments::{StripeCheckoutSession, StripeLineItem};

/// Convert provider sub-units to the store's base currency units.
pub fn to_major_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

/// Convert a store-side unit price to provider sub-units, rounding to the
/// nearest sub-unit.
pub fn to_minor_units(major: f64) -> i64 {
    (major * 100.0).round() as i64
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Everything the order store needs from a confirmed checkout, with the
/// provider's dynamic field presence resolved up front.
#[derive(Debug)]
pub struct CheckoutConfirmation {
    /// The correlation identifier generated at session creation.
    pub order_id: String,
    pub session_id: String,
    pub payment_intent: Option<String>,
    pub receipt_url: Option<String>,
    /// Provider-authoritative charged total, sub-units.
    pub amount_total_minor: i64,
    pub customer_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub line_items: Vec<NewOrderItem>,
}

impl CheckoutConfirmation {
    /// Normalize the authoritative session and line items fetched from the
    /// provider.
    ///
    /// Correlation prefers session metadata, falling back to the provider's
    /// own `client_reference_id`; when neither is present the event can never
    /// be reconciled and `CorrelationMissing` is returned. Customer fields
    /// prefer the metadata captured at checkout time over provider-reported
    /// customer details.
    pub fn from_provider(
        session: &StripeCheckoutSession,
        line_items: &[StripeLineItem],
        receipt_url: Option<String>,
    ) -> Result<Self> {
        let metadata = session.metadata.as_ref();

        let order_id = metadata
            .and_then(|m| non_empty(m.order_id.clone()))
            .or_else(|| non_empty(session.client_reference_id.clone()))
            .ok_or_else(|| {
                AppError::CorrelationMissing(format!(
                    "checkout session {} has no order_id metadata or client_reference_id",
                    session.id
                ))
            })?;

        let details = session.customer_details.as_ref();
        let customer_name = metadata
            .and_then(|m| non_empty(m.customer_name.clone()))
            .or_else(|| details.and_then(|d| non_empty(d.name.clone())))
            .or_else(|| Some("Customer".to_string()));
        let email = metadata
            .and_then(|m| non_empty(m.email.clone()))
            .or_else(|| details.and_then(|d| non_empty(d.email.clone())));
        let phone = metadata.and_then(|m| non_empty(m.phone.clone()));
        let address = metadata.and_then(|m| non_empty(m.address.clone()));

        let items = line_items
            .iter()
            .map(|li| {
                let unit_minor = li.price.as_ref().and_then(|p| p.unit_amount).unwrap_or(0);
                let quantity = li.quantity.unwrap_or(1);
                let total_minor = li.amount_total.unwrap_or(quantity * unit_minor);
                NewOrderItem {
                    product_id: None,
                    name: li
                        .description
                        .clone()
                        .unwrap_or_else(|| "Item".to_string()),
                    price: to_major_units(unit_minor),
                    quantity,
                    total: to_major_units(total_minor),
                }
            })
            .collect();

        Ok(Self {
            order_id,
            session_id: session.id.clone(),
            payment_intent: session.payment_intent_id(),
            receipt_url,
            amount_total_minor: session.amount_total.unwrap_or(0),
            customer_name,
            email,
            phone,
            address,
            line_items: items,
        })
    }
}

/// Write a confirmed checkout into the order store.
///
/// Upserts the order to `paid` with the provider-authoritative subtotal and
/// correlation fields, then replaces its line items, all in one SQLite
/// transaction so a reader never observes a half-applied state. Replaying
/// the same confirmation is a pure overwrite producing identical output.
pub fn record_paid_checkout(
    conn: &mut Connection,
    confirmation: &CheckoutConfirmation,
) -> Result<()> {
    let patch = OrderPatch {
        customer_name: confirmation.customer_name.clone(),
        email: confirmation.email.clone(),
        phone: confirmation.phone.clone(),
        address: confirmation.address.clone(),
        subtotal: Some(to_major_units(confirmation.amount_total_minor)),
        status: Some(OrderStatus::Paid),
        stripe_session_id: Some(confirmation.session_id.clone()),
        stripe_payment_intent: confirmation.payment_intent.clone(),
        stripe_receipt_url: confirmation.receipt_url.clone(),
    };

    let tx = conn.transaction()?;
    queries::upsert_order(&tx, &confirmation.order_id, &patch)?;
    // Line items are only authoritative from the checkout-completed path;
    // an empty list means the provider reported none, so leave any existing
    // set alone rather than wiping it.
    if !confirmation.line_items.is_empty() {
        queries::write_order_items(&tx, &confirmation.order_id, &confirmation.line_items)?;
    }
    tx.commit()?;

    tracing::info!(
        "Reconciled order {}: paid, subtotal={}, {} line item(s), session={}",
        confirmation.order_id,
        to_major_units(confirmation.amount_total_minor),
        confirmation.line_items.len(),
        confirmation.session_id
    );

    Ok(())
}
