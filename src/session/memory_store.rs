//! In-memory session record storage.
//!
//! Suitable for development, testing, and single-instance deployments.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::StoreError;
use crate::repository::{
    LockToken, RecordWrite, SessionFlags, SessionRecord, SessionRecordRepository,
};

use super::expiration::is_expired;

/// In-memory session record storage.
///
/// Stores records in a `HashMap` protected by a `RwLock`. Every mutation
/// runs under one write guard, which makes each call atomic.
///
/// # Note
///
/// Records are lost when the process restarts, and the lock is only shared
/// by clones of this value. For locks that outlive a process, use the
/// `SQLite` or Postgres repository.
#[derive(Clone)]
pub struct InMemorySessionRecordRepository {
    records: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl InMemorySessionRecordRepository {
    /// Creates a new in-memory session record repository.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.records.read().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Returns true if there are no records stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces a record as-is.
    ///
    /// Useful for seeding tests with records in a specific state.
    pub fn put(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?
            .insert(record.session_id.clone(), record);

        Ok(())
    }

    fn with_record<F>(&self, session_id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        if let Some(record) = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?
            .get_mut(session_id)
        {
            f(record);
        }

        Ok(())
    }
}

impl Default for InMemorySessionRecordRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRecordRepository for InMemorySessionRecordRepository {
    async fn create_uninitialized(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        if let Entry::Vacant(slot) = records.entry(record.session_id.clone()) {
            slot.insert(record);
        }

        Ok(())
    }

    async fn find(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        Ok(records.get(session_id).cloned())
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn upsert_on_write(
        &self,
        session_id: &str,
        write: RecordWrite<'_>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        if write.is_new {
            let mut record = SessionRecord::populated(
                session_id,
                write.payload.to_vec(),
                write.timeout_minutes,
                write.lock_id,
                now,
                write.expires_at,
            );
            match records.entry(session_id.to_owned()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get();
                    if existing.locked && existing.lock_id != write.lock_id {
                        return Ok(false);
                    }
                    record.lock_id = record.lock_id.max(existing.lock_id);
                    slot.insert(record);
                }
            }
            return Ok(true);
        }

        match records.get_mut(session_id) {
            Some(record) if record.lock_id == write.lock_id => {
                record.payload = write.payload.to_vec();
                record.timeout_minutes = write.timeout_minutes;
                record.expires_at = write.expires_at;
                record.locked = false;
                record.flags = SessionFlags::None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?
            .remove(session_id);

        Ok(())
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn remove_if_expired(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        let expired = records
            .get(session_id)
            .is_some_and(|record| is_expired(record.expires_at, now));
        if expired {
            records.remove(session_id);
        }

        Ok(expired)
    }

    async fn refresh_timeout(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_record(session_id, |record| record.expires_at = expires_at)
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn mark_locked(
        &self,
        session_id: &str,
        expected_lock_id: LockToken,
        new_lock_id: LockToken,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        match records.get_mut(session_id) {
            Some(record) if !record.locked && record.lock_id == expected_lock_id => {
                record.locked = true;
                record.lock_date = now;
                record.lock_id = new_lock_id;
                record.flags = SessionFlags::None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn mark_unlocked(
        &self,
        session_id: &str,
        lock_id: LockToken,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        match records.get_mut(session_id) {
            Some(record) if record.lock_id == lock_id => {
                record.locked = false;
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_initialized(&self, session_id: &str) -> Result<(), StoreError> {
        self.with_record(session_id, |record| record.flags = SessionFlags::None)
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StoreError::DatabaseError("Lock poisoned".to_owned()))?;

        let before_count = records.len();

        records.retain(|_, record| !is_expired(record.expires_at, now));

        let pruned = before_count.saturating_sub(records.len());
        Ok(u64::try_from(pruned).unwrap_or(u64::MAX))
    }
}
