//! The contract shared by the MemTable and sorted runs.
//!
//! The engine merges both kinds of table through this trait. Sorted runs are
//! immutable, so their mutation methods report [`Error::Unsupported`].
//!
//! [`Error::Unsupported`]: crate::Error::Unsupported

use std::time::Duration;

use crate::error::Result;
use crate::value::Entry;

/// A boxed ascending iterator over table entries.
///
/// Iterators own what they read from, so they stay valid after the table
/// handle that produced them is dropped.
pub type TableIterator = Box<dyn Iterator<Item = Result<Entry>> + Send>;

/// Operations supported by every table variant.
pub trait Table: Send + Sync {
    /// Returns the entry stored for `key`, tombstones included.
    fn get(&self, key: &[u8]) -> Result<Option<Entry>>;

    /// Returns entries with key >= `from` in ascending key order.
    fn iter_from(&self, from: &[u8]) -> Result<TableIterator>;

    /// Approximate size of the table in bytes.
    fn size_in_bytes(&self) -> u64;

    /// Stores a new live version of `key`.
    fn upsert(&self, key: &[u8], payload: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Stores a tombstone for `key`.
    fn remove(&self, key: &[u8]) -> Result<()>;
}
