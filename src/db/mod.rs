mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding the order store pool and resolved configuration.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub stripe: StripeClient,
    /// Public storefront base URL for checkout redirect targets.
    pub site_url: String,
    /// Store currency code passed to the provider per line item.
    pub currency: String,
    /// Insecure webhook test token; `None` unless explicitly enabled.
    pub webhook_test_token: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // Foreign keys are per-connection in SQLite; enable them on every
    // connection the pool hands out so ON DELETE CASCADE holds.
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    Pool::builder().max_size(10).build(manager)
}
