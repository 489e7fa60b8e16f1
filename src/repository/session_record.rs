use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::StoreError;

/// Token identifying one generation of exclusive ownership of a session.
pub type LockToken = i64;

/// Lifecycle marker stored with each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionFlags {
    /// The record holds real session data.
    #[default]
    None,
    /// Placeholder created before any data existed.
    Uninitialized,
    /// Reserved by the session framework; never written by this crate but
    /// accepted when read back from an existing table.
    InitializeItem,
}

impl SessionFlags {
    pub fn as_i32(self) -> i32 {
        match self {
            SessionFlags::None => 0,
            SessionFlags::Uninitialized => 1,
            SessionFlags::InitializeItem => 2,
        }
    }

    /// Unknown values read as `None`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => SessionFlags::Uninitialized,
            2 => SessionFlags::InitializeItem,
            _ => SessionFlags::None,
        }
    }
}

/// One row of the session table.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    /// Encoded items; empty for an uninitialized placeholder.
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Idle timeout in minutes.
    pub timeout_minutes: i32,
    pub locked: bool,
    pub lock_date: DateTime<Utc>,
    pub lock_id: LockToken,
    pub flags: SessionFlags,
}

impl SessionRecord {
    /// Builds a placeholder record with no payload.
    pub fn uninitialized(
        session_id: &str,
        timeout_minutes: i32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.to_owned(),
            payload: Vec::new(),
            created_at: now,
            expires_at,
            timeout_minutes,
            locked: false,
            lock_date: now,
            lock_id: 0,
            flags: SessionFlags::Uninitialized,
        }
    }

    /// Builds a record populated by a session's first write.
    pub fn populated(
        session_id: &str,
        payload: Vec<u8>,
        timeout_minutes: i32,
        lock_id: LockToken,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.to_owned(),
            payload,
            created_at: now,
            expires_at,
            timeout_minutes,
            locked: false,
            lock_date: now,
            lock_id,
            flags: SessionFlags::None,
        }
    }
}

/// Update applied when a lock holder writes the session back.
#[derive(Debug, Clone)]
pub struct RecordWrite<'a> {
    pub payload: &'a [u8],
    pub timeout_minutes: i32,
    pub lock_id: LockToken,
    pub expires_at: DateTime<Utc>,
    /// Insert a fresh record instead of updating an existing one.
    pub is_new: bool,
}

/// Durable table of session records.
///
/// Every method must be atomic with respect to concurrent callers on the
/// same session id. Mutations on a missing record are silent no-ops.
///
/// Implementations:
/// - [`InMemorySessionRecordRepository`](crate::session::InMemorySessionRecordRepository)
/// - `SqliteSessionRecordRepository` (feature `sqlx_sqlite`)
/// - `PostgresSessionRecordRepository` (feature `sqlx_postgres`)
#[async_trait]
pub trait SessionRecordRepository: Send + Sync {
    /// Inserts a placeholder record. A record that already exists under the
    /// same id is left untouched.
    async fn create_uninitialized(&self, record: SessionRecord) -> Result<(), StoreError>;

    async fn find(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Inserts a populated record when `write.is_new`, otherwise rewrites
    /// the payload, unlocks, and moves the expiry of an existing record.
    ///
    /// The update only applies while the record still carries
    /// `write.lock_id`; a holder whose lock was broken writes nothing. An
    /// insert racing with an existing record replaces it unless that record
    /// is locked under another token, and never lowers its `lock_id`.
    ///
    /// Returns `true` if a row was written.
    async fn upsert_on_write(
        &self,
        session_id: &str,
        write: RecordWrite<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn remove(&self, session_id: &str) -> Result<(), StoreError>;

    /// Deletes the record only if it is still expired at `now`.
    ///
    /// Returns `true` if a row was deleted.
    async fn remove_if_expired(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn refresh_timeout(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Compare-and-set lock acquisition.
    ///
    /// Succeeds only if the record exists, is unlocked, and still carries
    /// `expected_lock_id`. On success sets `locked`, `lock_date = now`,
    /// `lock_id = new_lock_id`, and clears the flags.
    async fn mark_locked(
        &self,
        session_id: &str,
        expected_lock_id: LockToken,
        new_lock_id: LockToken,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clears the lock and moves the expiry, only while the record still
    /// carries `lock_id`.
    ///
    /// Returns `true` if the record was updated.
    async fn mark_unlocked(
        &self,
        session_id: &str,
        lock_id: LockToken,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clears the lifecycle flags to [`SessionFlags::None`].
    async fn mark_initialized(&self, session_id: &str) -> Result<(), StoreError>;

    /// Deletes every record expired at `now`.
    ///
    /// Never called by the locking protocol; hosts that want a sweep can
    /// run it on their own schedule.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
