//! Per-session locking protocol.

use chrono::{DateTime, Utc};

use crate::StoreError;
use crate::codec::{self, SessionItems};
use crate::config::StoreConfig;
use crate::repository::{
    LockToken, RecordWrite, SessionFlags, SessionRecord, SessionRecordRepository,
};

use super::expiration::{expires_after, expires_after_minutes, is_expired, lock_age};
use super::{FetchResult, SessionData, WriteData};

/// Session state store layered on a [`SessionRecordRepository`].
///
/// At most one caller holds the exclusive lock of a session at a time. The
/// lock lives in the record, so it is shared by every process and store
/// instance pointed at the same table. Contention is reported, never waited
/// on: retrying is up to the caller.
#[derive(Clone)]
pub struct SessionStateStore<R> {
    repository: R,
    config: StoreConfig,
}

impl<R: SessionRecordRepository> SessionStateStore<R> {
    pub fn new(repository: R, config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self { repository, config })
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Stores a placeholder for a session that has no data yet.
    ///
    /// If a record with the same id already exists it is left as it is.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    pub async fn create_uninitialized(
        &self,
        session_id: &str,
        timeout_minutes: i32,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let expires_at = expires_after_minutes(now, timeout_minutes)?;

        self.repository
            .create_uninitialized(SessionRecord::uninitialized(
                session_id,
                timeout_minutes,
                now,
                expires_at,
            ))
            .await?;

        log::debug!(
            target: "sessionlock",
            "msg=\"uninitialized session created\", session_id=\"{session_id}\", timeout_minutes={timeout_minutes}"
        );

        Ok(())
    }

    /// Fetches a session, taking its lock when `exclusive` is set.
    ///
    /// # Returns
    ///
    /// - `Ok(FetchResult::Absent)` - no record, or the record had expired and was deleted
    /// - `Ok(FetchResult::LockedByOther { .. })` - exclusive fetch of a locked session
    /// - `Ok(FetchResult::Found { .. })` - decoded items; for an exclusive fetch the
    ///   lock is now held under the returned token
    /// - `Err(StoreError::MalformedPayload(_))` - the stored payload could not be decoded
    /// - `Err(_)` - storage failures
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    pub async fn fetch(
        &self,
        session_id: &str,
        exclusive: bool,
    ) -> Result<FetchResult, StoreError> {
        for attempt in 1..=self.config.max_lock_attempts {
            if let Some(result) = self.try_fetch(session_id, exclusive).await? {
                return Ok(result);
            }

            log::debug!(
                target: "sessionlock",
                "msg=\"lost lock race\", session_id=\"{session_id}\", attempt={attempt}"
            );
        }

        // every compare-and-set lost; report the lock as it stands now
        let now = Utc::now();
        match self.live_record(session_id, now).await? {
            None => Ok(FetchResult::Absent),
            Some(record) if record.locked => Ok(locked_by_other(session_id, &record, now)),
            Some(_) => {
                if let Some(result) = self.try_fetch(session_id, exclusive).await? {
                    return Ok(result);
                }
                let now = Utc::now();
                Ok(self
                    .live_record(session_id, now)
                    .await?
                    .map_or(FetchResult::Absent, |record| {
                        locked_by_other(session_id, &record, now)
                    }))
            }
        }
    }

    /// Unlocks a session, writing it back first when `write` is given.
    ///
    /// With `write`, the items are encoded and stored and the record expires
    /// `write.timeout_minutes` from now. Without `write`, the lock is cleared
    /// and the record expires after the configured default expiry.
    ///
    /// Either way the record is only touched while it still carries
    /// `lock_token`. A caller whose lock was broken and handed to someone
    /// else releases nothing, and neither does releasing a session that no
    /// longer exists. A new session (`write.is_new`) is inserted unless a
    /// record under the same id is locked by another holder.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, write), err))]
    pub async fn release(
        &self,
        session_id: &str,
        lock_token: LockToken,
        write: Option<WriteData>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();

        let applied = match write {
            Some(write) => {
                let expires_at = expires_after_minutes(now, write.timeout_minutes)?;
                let payload = codec::encode(&write.items)?;

                let written = self
                    .repository
                    .upsert_on_write(
                        session_id,
                        RecordWrite {
                            payload: &payload,
                            timeout_minutes: write.timeout_minutes,
                            lock_id: lock_token,
                            expires_at,
                            is_new: write.is_new,
                        },
                        now,
                    )
                    .await?;

                if written {
                    log::debug!(
                        target: "sessionlock",
                        "msg=\"session written and released\", session_id=\"{session_id}\", lock_id={lock_token}, is_new={}",
                        write.is_new
                    );
                }
                written
            }
            None => {
                let unlocked = self
                    .repository
                    .mark_unlocked(session_id, lock_token, self.default_expiry_from(now)?)
                    .await?;

                if unlocked {
                    log::debug!(
                        target: "sessionlock",
                        "msg=\"session released\", session_id=\"{session_id}\", lock_id={lock_token}"
                    );
                }
                unlocked
            }
        };

        if !applied {
            log::info!(
                target: "sessionlock",
                "msg=\"stale release ignored\", session_id=\"{session_id}\", lock_id={lock_token}"
            );
        }

        Ok(())
    }

    /// Deletes a session regardless of who holds its lock.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    pub async fn remove(&self, session_id: &str) -> Result<(), StoreError> {
        self.repository.remove(session_id).await?;

        log::info!(
            target: "sessionlock",
            "msg=\"session removed\", session_id=\"{session_id}\""
        );

        Ok(())
    }

    /// Extends a session by the configured default expiry without touching
    /// its lock or data.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), err))]
    pub async fn reset_timeout(&self, session_id: &str) -> Result<(), StoreError> {
        let expires_at = self.default_expiry_from(Utc::now())?;
        self.repository.refresh_timeout(session_id, expires_at).await
    }

    /// One read and, for an exclusive fetch, one compare-and-set.
    ///
    /// `None` means the compare-and-set lost to another caller.
    async fn try_fetch(
        &self,
        session_id: &str,
        exclusive: bool,
    ) -> Result<Option<FetchResult>, StoreError> {
        let now = Utc::now();

        let Some(record) = self.live_record(session_id, now).await? else {
            return Ok(Some(FetchResult::Absent));
        };

        if exclusive && record.locked {
            return Ok(Some(locked_by_other(session_id, &record, now)));
        }

        let items = codec::decode(&record.payload)?;

        if !exclusive {
            if record.flags != SessionFlags::None {
                self.repository.mark_initialized(session_id).await?;
            }
            return Ok(Some(found(&record, items, record.lock_id)));
        }

        let lock_token = next_lock_token(record.lock_id);
        if self
            .repository
            .mark_locked(session_id, record.lock_id, lock_token, now)
            .await?
        {
            log::debug!(
                target: "sessionlock",
                "msg=\"session locked\", session_id=\"{session_id}\", lock_id={lock_token}"
            );
            return Ok(Some(found(&record, items, lock_token)));
        }

        Ok(None)
    }

    /// Reads a record, deleting it instead when it has expired.
    ///
    /// Expiry is checked before the lock: an expired session is never
    /// handed out, locked or not.
    async fn live_record(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, StoreError> {
        let Some(record) = self.repository.find(session_id).await? else {
            return Ok(None);
        };

        if is_expired(record.expires_at, now) {
            if self.repository.remove_if_expired(session_id, now).await? {
                log::info!(
                    target: "sessionlock",
                    "msg=\"expired session reaped\", session_id=\"{session_id}\""
                );
            }
            return Ok(None);
        }

        Ok(Some(record))
    }

    fn default_expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        expires_after(now, self.config.default_expiry)
            .ok_or(StoreError::InvalidConfig("default_expiry overflows the clock"))
    }
}

fn locked_by_other(session_id: &str, record: &SessionRecord, now: DateTime<Utc>) -> FetchResult {
    let age = lock_age(record.lock_date, now);
    log::debug!(
        target: "sessionlock",
        "msg=\"session locked by another holder\", session_id=\"{session_id}\", lock_id={}, lock_age_ms={}",
        record.lock_id,
        age.num_milliseconds()
    );
    FetchResult::LockedByOther {
        lock_age: age,
        lock_token: record.lock_id,
    }
}

fn found(record: &SessionRecord, items: SessionItems, lock_token: LockToken) -> FetchResult {
    FetchResult::Found {
        data: SessionData {
            items,
            timeout_minutes: record.timeout_minutes,
        },
        lock_token,
        flags: record.flags,
    }
}

/// Wraps back to 1 rather than overflowing.
fn next_lock_token(current: LockToken) -> LockToken {
    current.checked_add(1).unwrap_or(1)
}
