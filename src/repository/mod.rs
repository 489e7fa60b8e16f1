//! Record store abstraction.
//!
//! This module defines the storage contract the locking protocol is built on.
//! Implement [`SessionRecordRepository`] to keep sessions in your own
//! database or storage backend.
//!
//! # Data Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SessionRecord`] | One stored session |
//! | [`SessionFlags`] | Lifecycle marker of a record |
//! | [`RecordWrite`] | Payload write issued on release |
//! | [`LockToken`] | Lock generation counter |

mod session_record;

pub use session_record::LockToken;
pub use session_record::RecordWrite;
pub use session_record::SessionFlags;
pub use session_record::SessionRecord;
pub use session_record::SessionRecordRepository;
