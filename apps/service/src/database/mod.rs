//! Persistence for users, targets, check results and notification settings.
//!
//! All tables live in one local libsql file reached through the connection
//! pool in [`crate::pool`]. Timestamps are stored as UTC milliseconds.

pub mod error;
pub mod migrations;
pub mod models;
pub mod repository;

pub use error::StoreError;
pub use repository::{DatabaseImpl, ResultStore, SettingsStore, TargetStore};

use crate::pool::LibsqlPool;

/// Initialize database with schema
pub async fn initialize_database(pool: &LibsqlPool) -> Result<(), StoreError> {
    let conn = pool.get().await?;
    migrations::run_migrations(&conn).await
}
