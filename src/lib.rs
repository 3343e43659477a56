//! Storegate - storefront checkout and payment reconciliation service
//!
//! This library provides the payment core for the storefront: creating
//! Stripe checkout sessions, receiving asynchronous webhook confirmations,
//! and reconciling them into the order store idempotently.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod payments;
pub mod reconcile;
