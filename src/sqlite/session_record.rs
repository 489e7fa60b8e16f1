use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::StoreError;
use crate::repository::{
    LockToken, RecordWrite, SessionFlags, SessionRecord, SessionRecordRepository,
};

/// `SQLite`-backed session record storage.
///
/// Each primitive is a single statement, and `SQLite` serializes writers,
/// so lock acquisition is a plain conditional `UPDATE`.
///
/// # Table Schema
///
/// ```sql
/// CREATE TABLE sessions (
///     session_id TEXT PRIMARY KEY NOT NULL,
///     payload BLOB NOT NULL DEFAULT x'',
///     created_at TEXT NOT NULL,
///     expires_at TEXT NOT NULL,
///     timeout_minutes INTEGER NOT NULL,
///     locked INTEGER NOT NULL DEFAULT 0,
///     lock_date TEXT NOT NULL,
///     lock_id INTEGER NOT NULL DEFAULT 0,
///     flags INTEGER NOT NULL DEFAULT 0
/// );
/// ```
#[derive(Clone)]
pub struct SqliteSessionRecordRepository {
    pool: SqlitePool,
}

impl SqliteSessionRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    timeout_minutes: i32,
    locked: bool,
    lock_date: DateTime<Utc>,
    lock_id: i64,
    flags: i32,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            session_id: row.session_id,
            payload: row.payload,
            created_at: row.created_at,
            expires_at: row.expires_at,
            timeout_minutes: row.timeout_minutes,
            locked: row.locked,
            lock_date: row.lock_date,
            lock_id: row.lock_id,
            flags: SessionFlags::from_i32(row.flags),
        }
    }
}

fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| {
        log::error!(target: "sessionlock", "msg=\"database error\", operation=\"{operation}\", error=\"{e}\"");
        StoreError::DatabaseError(e.to_string())
    }
}

#[async_trait]
impl SessionRecordRepository for SqliteSessionRecordRepository {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, record), err))]
    async fn create_uninitialized(&self, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO sessions
                (session_id, payload, created_at, expires_at, timeout_minutes, locked, lock_date, lock_id, flags)
               VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
               ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(&record.session_id)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.timeout_minutes)
        .bind(record.lock_date)
        .bind(record.lock_id)
        .bind(record.flags.as_i32())
        .execute(&self.pool)
        .await
        .map_err(db_error("create_uninitialized"))?;

        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn find(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r"SELECT session_id, payload, created_at, expires_at, timeout_minutes,
                      locked, lock_date, lock_id, flags
               FROM sessions WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("find_session"))?;

        Ok(row.map(SessionRecord::from))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, write), err))]
    async fn upsert_on_write(
        &self,
        session_id: &str,
        write: RecordWrite<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = if write.is_new {
            sqlx::query(
                r"INSERT INTO sessions
                    (session_id, payload, created_at, expires_at, timeout_minutes, locked, lock_date, lock_id, flags)
                   VALUES (?, ?, ?, ?, ?, 0, ?, ?, 0)
                   ON CONFLICT (session_id) DO UPDATE SET
                       payload = excluded.payload,
                       created_at = excluded.created_at,
                       expires_at = excluded.expires_at,
                       timeout_minutes = excluded.timeout_minutes,
                       locked = 0,
                       lock_date = excluded.lock_date,
                       lock_id = MAX(sessions.lock_id, excluded.lock_id),
                       flags = 0
                   WHERE sessions.locked = 0 OR sessions.lock_id = excluded.lock_id",
            )
            .bind(session_id)
            .bind(write.payload)
            .bind(now)
            .bind(write.expires_at)
            .bind(write.timeout_minutes)
            .bind(now)
            .bind(write.lock_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("insert_session"))?
        } else {
            sqlx::query(
                r"UPDATE sessions
                   SET payload = ?, timeout_minutes = ?, expires_at = ?, locked = 0, flags = 0
                   WHERE session_id = ? AND lock_id = ?",
            )
            .bind(write.payload)
            .bind(write.timeout_minutes)
            .bind(write.expires_at)
            .bind(session_id)
            .bind(write.lock_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("update_session"))?
        };

        Ok(result.rows_affected() > 0)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("remove_session"))?;

        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn remove_if_expired(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ? AND expires_at <= ?")
            .bind(session_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("remove_expired_session"))?;

        Ok(result.rows_affected() > 0)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn refresh_timeout(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE session_id = ?")
            .bind(expires_at)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("refresh_timeout"))?;

        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn mark_locked(
        &self,
        session_id: &str,
        expected_lock_id: LockToken,
        new_lock_id: LockToken,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"UPDATE sessions
               SET locked = 1, lock_date = ?, lock_id = ?, flags = 0
               WHERE session_id = ? AND locked = 0 AND lock_id = ?",
        )
        .bind(now)
        .bind(new_lock_id)
        .bind(session_id)
        .bind(expected_lock_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("mark_locked"))?;

        Ok(result.rows_affected() == 1)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn mark_unlocked(
        &self,
        session_id: &str,
        lock_id: LockToken,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET locked = 0, expires_at = ? WHERE session_id = ? AND lock_id = ?",
        )
        .bind(expires_at)
        .bind(session_id)
        .bind(lock_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("mark_unlocked"))?;

        Ok(result.rows_affected() > 0)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn mark_initialized(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET flags = 0 WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("mark_initialized"))?;

        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("prune_expired_sessions"))?;

        Ok(result.rows_affected())
    }
}
