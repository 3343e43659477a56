use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Order lifecycle states.
///
/// The reconciliation core only ever drives `pending -> paid`; the later
/// administrative transitions are written by the dashboard, not this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(()),
        }
    }
}

/// One row per purchase. `id` is generated by the Session Initiator before
/// any payment exists and is the correlation key for the whole flow.
#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: String,
    pub customer_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Major currency units, authoritative from the provider once paid.
    pub subtotal: f64,
    pub status: OrderStatus,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
    pub stripe_receipt_url: Option<String>,
    pub created_at: i64,
}

/// A purchased line. Immutable individually; the reconciler replaces the
/// whole set per order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub order_id: String,
    pub product_id: Option<String>,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    pub total: f64,
}

/// Input for line-item replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: Option<String>,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    pub total: f64,
}

/// Partial order write. `None` fields are left untouched on the update
/// branch and fall back to column defaults on the insert branch.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub customer_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub subtotal: Option<f64>,
    pub status: Option<OrderStatus>,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
    pub stripe_receipt_url: Option<String>,
}
