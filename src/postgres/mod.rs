//! Postgres database backend.
//!
//! Enable the `sqlx_postgres` feature to use it.

pub mod migrations;
mod session_record;

pub use session_record::PostgresSessionRecordRepository;
use sqlx::PgPool;

use crate::StoreError;
use crate::config::StoreConfig;
use crate::session::SessionStateStore;

/// Creates a session state store over a Postgres pool.
pub fn create_store(
    pool: PgPool,
    config: StoreConfig,
) -> Result<SessionStateStore<PostgresSessionRecordRepository>, StoreError> {
    SessionStateStore::new(PostgresSessionRecordRepository::new(pool), config)
}
