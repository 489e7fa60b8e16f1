use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::StoreError;
use crate::repository::{
    LockToken, RecordWrite, SessionFlags, SessionRecord, SessionRecordRepository,
};

/// Postgres-backed session record storage.
///
/// Lock acquisition is a conditional `UPDATE`: the row lock Postgres takes
/// for the update makes a second concurrent acquirer re-check `locked` after
/// the first commits, so only one of them matches.
///
/// Expects the `sessions` table created by
/// [`migrations::run`](super::migrations::run).
#[derive(Clone)]
pub struct PostgresSessionRecordRepository {
    pool: PgPool,
}

impl PostgresSessionRecordRepository {
    pub fn new(pool: PgPool) -> Self {
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
impl SessionRecordRepository for PostgresSessionRecordRepository {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, record), err))]
    async fn create_uninitialized(&self, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO sessions
                (session_id, payload, created_at, expires_at, timeout_minutes, locked, lock_date, lock_id, flags)
               VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $8)
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
               FROM sessions WHERE session_id = $1",
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
                   VALUES ($1, $2, $3, $4, $5, FALSE, $3, $6, 0)
                   ON CONFLICT (session_id) DO UPDATE SET
                       payload = EXCLUDED.payload,
                       created_at = EXCLUDED.created_at,
                       expires_at = EXCLUDED.expires_at,
                       timeout_minutes = EXCLUDED.timeout_minutes,
                       locked = FALSE,
                       lock_date = EXCLUDED.lock_date,
                       lock_id = GREATEST(sessions.lock_id, EXCLUDED.lock_id),
                       flags = 0
                   WHERE sessions.locked = FALSE OR sessions.lock_id = EXCLUDED.lock_id",
            )
            .bind(session_id)
            .bind(write.payload)
            .bind(now)
            .bind(write.expires_at)
            .bind(write.timeout_minutes)
            .bind(write.lock_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("insert_session"))?
        } else {
            sqlx::query(
                r"UPDATE sessions
                   SET payload = $1, timeout_minutes = $2, expires_at = $3, locked = FALSE, flags = 0
                   WHERE session_id = $4 AND lock_id = $5",
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
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
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
        let result =
            sqlx::query("DELETE FROM sessions WHERE session_id = $1 AND expires_at <= $2")
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
        sqlx::query("UPDATE sessions SET expires_at = $1 WHERE session_id = $2")
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
               SET locked = TRUE, lock_date = $1, lock_id = $2, flags = 0
               WHERE session_id = $3 AND locked = FALSE AND lock_id = $4",
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
            "UPDATE sessions SET locked = FALSE, expires_at = $1 WHERE session_id = $2 AND lock_id = $3",
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
        sqlx::query("UPDATE sessions SET flags = 0 WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_error("mark_initialized"))?;

        Ok(())
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("prune_expired_sessions"))?;

        Ok(result.rows_affected())
    }
}
