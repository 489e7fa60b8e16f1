//! Configuration for the session state store.
//!
//! The store needs a single default expiry, used whenever a session's life is
//! extended without the session's own timeout at hand (release without a
//! write, keep-alive pings). Hosts read it once at startup and pass it to
//! [`SessionStateStore::new`](crate::SessionStateStore::new).
//!
//! # Example
//!
//! ```rust
//! use sessionlock::config::StoreConfig;
//! use chrono::Duration;
//!
//! // Use defaults
//! let config = StoreConfig::default();
//!
//! // Or take the value from the host's session settings
//! let config = StoreConfig::from_minutes(30).unwrap();
//! assert_eq!(config.default_expiry, Duration::minutes(30));
//! ```

use chrono::Duration;

use crate::StoreError;

/// Default session lifetime, in minutes, when the host configures nothing.
pub const DEFAULT_EXPIRY_MINUTES: i64 = 20;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lifetime granted by release-only and keep-alive refreshes.
    ///
    /// Default: 20 minutes
    pub default_expiry: Duration,

    /// How many times an exclusive fetch re-reads a record after losing the
    /// lock compare-and-set to a concurrent caller before reporting
    /// contention.
    ///
    /// Default: 3
    pub max_lock_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_expiry: Duration::minutes(DEFAULT_EXPIRY_MINUTES),
            max_lock_attempts: 3,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with the given default expiry in minutes.
    pub fn from_minutes(minutes: i64) -> Result<Self, StoreError> {
        let default_expiry =
            Duration::try_minutes(minutes).ok_or(StoreError::InvalidTimeout(minutes))?;

        let config = Self {
            default_expiry,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Short-lived sessions for local development.
    pub fn development() -> Self {
        Self {
            default_expiry: Duration::minutes(5),
            max_lock_attempts: 3,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.default_expiry <= Duration::zero() {
            return Err(StoreError::InvalidConfig("default_expiry must be positive"));
        }
        if self.max_lock_attempts == 0 {
            return Err(StoreError::InvalidConfig(
                "max_lock_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Returns the default expiry in whole minutes.
    #[inline]
    pub fn default_expiry_minutes(&self) -> i64 {
        self.default_expiry.num_minutes()
    }
}
