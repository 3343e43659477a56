//! Order store operations.
//!
//! The reconciliation core touches the database exclusively through these
//! functions. The upsert is written as conditional-insert-then-update so
//! that concurrent duplicate webhook deliveries converge on the primary key
//! constraint instead of racing a separate existence check.

use chrono::Utc;
use rusqlite::{params, types::Value, Connection, ErrorCode};

use crate::error::Result;
use crate::models::{NewOrderItem, Order, OrderItem, OrderPatch, OrderStatus};

use super::from_row::{query_all, query_one, ORDER_COLS, ORDER_ITEM_COLS};

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for dynamic UPDATE statements with optional fields.
/// Combines multiple field updates into a single query.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
        }
    }

    fn set_opt<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.fields.push((column, v.into()));
        }
        self
    }

    fn execute(self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

/// Lookup by primary key.
pub fn find_order(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY rowid",
            ORDER_ITEM_COLS
        ),
        &[&order_id],
    )
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Create-or-update an order by primary key.
///
/// Attempts a conditional insert first; a uniqueness conflict (the row
/// already exists, possibly written by a concurrent delivery of the same
/// event) switches to a partial update that only touches fields present in
/// the patch. Applying the same patch twice produces the same row.
pub fn upsert_order(conn: &Connection, id: &str, patch: &OrderPatch) -> Result<Order> {
    let insert = conn.execute(
        "INSERT INTO orders (id, customer_name, email, phone, address, subtotal, status,
             stripe_session_id, stripe_payment_intent, stripe_receipt_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            patch.customer_name,
            patch.email,
            patch.phone,
            patch.address,
            patch.subtotal.unwrap_or(0.0),
            patch.status.unwrap_or(OrderStatus::Pending).as_str(),
            patch.stripe_session_id,
            patch.stripe_payment_intent,
            patch.stripe_receipt_url,
            now(),
        ],
    );

    match insert {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            UpdateBuilder::new("orders", id)
                .set_opt("customer_name", patch.customer_name.clone())
                .set_opt("email", patch.email.clone())
                .set_opt("phone", patch.phone.clone())
                .set_opt("address", patch.address.clone())
                .set_opt("subtotal", patch.subtotal)
                .set_opt("status", patch.status.map(|s| s.as_str().to_string()))
                .set_opt("stripe_session_id", patch.stripe_session_id.clone())
                .set_opt("stripe_payment_intent", patch.stripe_payment_intent.clone())
                .set_opt("stripe_receipt_url", patch.stripe_receipt_url.clone())
                .execute(conn)?;
        }
        Err(e) => return Err(e.into()),
    }

    find_order(conn, id)?.ok_or_else(|| {
        crate::error::AppError::Internal(format!("Order {} vanished during upsert", id))
    })
}

/// Delete-then-insert the full line-item set for an order.
///
/// No atomicity guarantee by itself; the reconciler runs it inside its own
/// transaction so readers never observe a partial set. Safe to replay with
/// the same input.
pub(crate) fn write_order_items(
    conn: &Connection,
    order_id: &str,
    items: &[NewOrderItem],
) -> Result<()> {
    conn.execute("DELETE FROM order_items WHERE order_id = ?1", params![order_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO order_items (order_id, product_id, name, price, quantity, total)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for item in items {
        stmt.execute(params![
            order_id,
            item.product_id,
            item.name,
            item.price,
            item.quantity,
            item.total,
        ])?;
    }
    Ok(())
}

/// Replace all line items for an order as a single atomic unit.
pub fn replace_order_items(
    conn: &mut Connection,
    order_id: &str,
    items: &[NewOrderItem],
) -> Result<()> {
    let tx = conn.transaction()?;
    write_order_items(&tx, order_id, items)?;
    tx.commit()?;
    Ok(())
}

/// Fallback write for direct payment-intent confirmations: flip the order to
/// paid and record the payment reference, leaving line items untouched.
/// Returns false when no order with that id exists yet.
pub fn mark_order_paid(conn: &Connection, id: &str, payment_intent: Option<&str>) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'paid',
             stripe_payment_intent = COALESCE(?2, stripe_payment_intent)
         WHERE id = ?1",
        params![id, payment_intent],
    )?;
    Ok(affected > 0)
}
