//! `SQLite` database backend.
//!
//! Enable the `sqlx_sqlite` feature (on by default) to use it.

pub mod migrations;
mod session_record;

pub use session_record::SqliteSessionRecordRepository;
use sqlx::SqlitePool;

use crate::StoreError;
use crate::config::StoreConfig;
use crate::session::SessionStateStore;

/// Creates a session state store over an `SQLite` pool.
///
/// Run [`migrations::run`] on the pool first.
pub fn create_store(
    pool: SqlitePool,
    config: StoreConfig,
) -> Result<SessionStateStore<SqliteSessionRecordRepository>, StoreError> {
    SessionStateStore::new(SqliteSessionRecordRepository::new(pool), config)
}
