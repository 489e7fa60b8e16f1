//! Lazy expiration policy.
//!
//! Expiry is only evaluated when a session is fetched; nothing sweeps the
//! table in the background. A session that is never fetched again after it
//! expires stays stored until a host calls
//! [`SessionRecordRepository::prune_expired`](crate::SessionRecordRepository::prune_expired).

use chrono::{DateTime, Duration, Utc};

use crate::StoreError;

/// A record is invalid once `now` reaches its expiry.
pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

/// Computes `now + timeout_minutes`, rejecting non-positive timeouts.
pub fn expires_after_minutes(
    now: DateTime<Utc>,
    timeout_minutes: i32,
) -> Result<DateTime<Utc>, StoreError> {
    if timeout_minutes <= 0 {
        return Err(StoreError::InvalidTimeout(i64::from(timeout_minutes)));
    }
    expires_after(now, Duration::minutes(i64::from(timeout_minutes)))
        .ok_or(StoreError::InvalidTimeout(i64::from(timeout_minutes)))
}

pub fn expires_after(now: DateTime<Utc>, lifetime: Duration) -> Option<DateTime<Utc>> {
    now.checked_add_signed(lifetime)
}

/// Time elapsed since a lock was taken. Never negative, even if the clock
/// that stamped `lock_date` ran ahead of ours.
pub fn lock_age(lock_date: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - lock_date).max(Duration::zero())
}
