//! `PostgreSQL` backend for Clubhouse event registration.
//!
//! - [`PostgresUserStore`] and [`PostgresEventStore`] implement the storage
//!   ports over a shared connection pool
//! - [`PostgresLedger`] applies both halves of a membership change in one
//!   `SERIALIZABLE` transaction, so no saga or compensation is needed
//!
//! # Example
//!
//! ```no_run
//! use clubhouse_postgres::{PostgresLedger, connect, migrate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/clubhouse", 10, Duration::from_secs(5)).await?;
//! migrate(&pool).await?;
//! let ledger = PostgresLedger::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod events;
mod ledger;
mod rows;
mod users;

pub use events::PostgresEventStore;
pub use ledger::PostgresLedger;
pub use users::PostgresUserStore;

use clubhouse_core::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if no connection can be established
/// within `connect_timeout`.
pub async fn connect(
    url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(url)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))
}
