//! Stored Record Module
//!
//! Defines the structure persisted for every key, with TTL support.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

// == Stored Record ==
/// A single persisted record.
///
/// `value` holds the wire form of the transform envelope: plain JSON, or a
/// `compressed:` / `encrypted:` tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Key without the namespace prefix
    pub key: String,
    /// Encoded payload
    pub value: String,
    /// Write time (Unix milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Expiration time, None = no expiration
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    // == Constructor ==
    /// Creates a record stamped with the current time and an optional TTL.
    ///
    /// A TTL too large to represent is treated as no expiration.
    pub fn new(key: impl Into<String>, value: String, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        Self {
            key: key.into(),
            value,
            timestamp: now,
            expires_at,
        }
    }

    // == Is Expired ==
    /// Checks if the record has expired.
    ///
    /// A record is expired once the current time is greater than or equal to
    /// its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Same as [`is_expired`](Self::is_expired) against an explicit instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    /// Remaining lifetime, `Some(ZERO)` once expired, None without TTL.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            (expires - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}
