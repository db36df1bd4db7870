//! # Versioned values and entries
//!
//! A [`Value`] is one version of a key: a timestamp plus either a payload or a
//! tombstone, optionally with a time-to-live. Values are never edited; every
//! upsert or remove creates a new one with a fresh timestamp.
//!
//! An [`Entry`] pairs a key with a value. Entries are ordered by:
//! 1. key bytes (ascending)
//! 2. timestamp (descending - newer first)
//!
//! This ordering defines both the on-disk layout of sorted runs and which
//! version wins when sources are merged.

use std::cmp::Ordering;
use std::time::Duration;

use bytes::Bytes;

use crate::clock::{self, Clock, Timestamp};
use crate::error::{Error, Result};

/// One timestamped version of a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    timestamp: Timestamp,
    payload: Option<Bytes>,
    ttl: Option<Duration>,
}

/// Longest TTL a sorted run can store; anything longer never expires anyway.
pub const MAX_TTL: Duration = Duration::from_millis(i64::MAX as u64);

/// Rounds a TTL up to whole milliseconds and caps it at [`MAX_TTL`]; zero
/// means no expiry.
fn normalize_ttl(ttl: Option<Duration>) -> Option<Duration> {
    let ttl = ttl.filter(|t| !t.is_zero())?;
    let mut millis = ttl.as_millis();
    if ttl.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    Some(Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX)).min(MAX_TTL))
}

impl Value {
    /// Creates a live value stamped with a fresh timestamp from `clock`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use emberkv::clock::{Clock, ManualClock};
    /// use emberkv::Value;
    ///
    /// let clock = ManualClock::new(1_000);
    /// let value = Value::make_live(&clock, &b"payload"[..], None);
    /// assert!(value.is_live(clock.now()));
    /// assert_eq!(value.data().unwrap().as_ref(), b"payload");
    /// ```
    pub fn make_live(clock: &dyn Clock, payload: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        Self::live(clock.tick(), payload, ttl)
    }

    /// Creates a tombstone stamped with a fresh timestamp from `clock`.
    pub fn make_tombstone(clock: &dyn Clock) -> Self {
        Self::tombstone(clock.tick())
    }

    /// Creates a live value with an explicit timestamp.
    pub fn live(timestamp: Timestamp, payload: impl Into<Bytes>, ttl: Option<Duration>) -> Self {
        Self { timestamp, payload: Some(payload.into()), ttl: normalize_ttl(ttl) }
    }

    /// Creates a tombstone with an explicit timestamp.
    pub fn tombstone(timestamp: Timestamp) -> Self {
        Self { timestamp, payload: None, ttl: None }
    }

    /// Returns the timestamp of this version.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the time-to-live, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns the timestamp at which this value stops being live.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.ttl.map(|ttl| self.timestamp.saturating_add(clock::duration_to_ticks(ttl)))
    }

    /// Returns `true` if this is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }

    /// Returns `true` if the value carries a payload that has not expired at `now`.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.payload.is_some() && self.expires_at().map_or(true, |expiry| now < expiry)
    }

    /// Returns the payload, or `None` for a tombstone.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Returns the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the value is a tombstone.
    pub fn data(&self) -> Result<&Bytes> {
        self.payload.as_ref().ok_or_else(|| Error::invalid_state("tombstone has no data"))
    }

    /// Payload length in bytes; zero for a tombstone.
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Compares by recency: the newer value sorts first.
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        other.timestamp.cmp(&self.timestamp)
    }
}

/// A key together with one version of its value.
#[derive(Debug, Clone)]
pub struct Entry {
    key: Bytes,
    value: Value,
}

impl Entry {
    /// Creates a new entry.
    pub fn new(key: impl Into<Bytes>, value: Value) -> Self {
        Self { key: key.into(), value }
    }

    /// Returns the key.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Returns the value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Splits the entry into key and value.
    pub fn into_parts(self) -> (Bytes, Value) {
        (self.key, self.value)
    }

    /// Approximate in-memory footprint: key plus payload bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.key.len() + self.value.payload_len()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.value.recency_cmp(&other.value))
    }
}
