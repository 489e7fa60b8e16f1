pub mod expiration;
mod memory_store;
mod state_store;

use chrono::Duration;
pub use memory_store::InMemorySessionRecordRepository;
pub use state_store::SessionStateStore;

use crate::codec::SessionItems;
use crate::repository::{LockToken, SessionFlags};

/// Decoded session contents handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub items: SessionItems,
    /// Idle timeout in minutes.
    pub timeout_minutes: i32,
}

impl SessionData {
    /// Empty data for a brand-new session.
    ///
    /// Nothing is stored until it is released as [`WriteData::new_session`].
    pub fn new(timeout_minutes: i32) -> Self {
        Self {
            items: SessionItems::new(),
            timeout_minutes,
        }
    }
}

/// Data written back when a lock holder releases a session.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteData {
    pub items: SessionItems,
    pub timeout_minutes: i32,
    /// The session was created by this request and has no record yet.
    pub is_new: bool,
}

impl WriteData {
    /// Writes back fetched data, keeping its timeout.
    pub fn existing(data: SessionData) -> Self {
        Self {
            items: data.items,
            timeout_minutes: data.timeout_minutes,
            is_new: false,
        }
    }

    /// Writes data built with [`SessionData::new`] as a new session.
    pub fn new_session(data: SessionData) -> Self {
        Self {
            items: data.items,
            timeout_minutes: data.timeout_minutes,
            is_new: true,
        }
    }
}

/// Outcome of [`SessionStateStore::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// No live session under this id; the caller should start a new one.
    Absent,
    /// Another caller holds the lock. Nothing was read.
    LockedByOther {
        /// Time since the lock was taken, never negative.
        lock_age: Duration,
        lock_token: LockToken,
    },
    Found {
        data: SessionData,
        /// For exclusive fetches, the token of the lock now held and to be
        /// passed back on release. For read-only fetches, the record's
        /// current lock id.
        lock_token: LockToken,
        /// Flags as stored before this fetch cleared them.
        flags: SessionFlags,
    },
}

impl FetchResult {
    pub fn is_absent(&self) -> bool {
        matches!(self, FetchResult::Absent)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, FetchResult::LockedByOther { .. })
    }
}
