//! Database migrations for Postgres.
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionlock::postgres::migrations;
//! use sqlx::PgPool;
//!
//! async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//!     migrations::run(pool).await?;
//!     Ok(())
//! }
//! ```

use sqlx::PgPool;

/// Runs the session table migrations.
///
/// This creates the `sessions` table and its expiry index.
pub async fn run(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations/core").run(pool).await
}
