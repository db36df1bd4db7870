//! Database iterator for scanning key-value pairs.
//!
//! Provides ascending iteration over the live contents of the database,
//! starting at any key.

use bytes::Bytes;

use crate::clock::Timestamp;
use crate::compaction::{Collapse, MergeIterator};
use crate::error::Result;
use crate::table::TableIterator;
use crate::DB;

/// An iterator over live key-value pairs in the database.
///
/// Merges the MemTable with every sorted run and yields each key once, with
/// the payload of its newest version. Tombstoned keys are skipped, as are
/// values that had expired when the iterator was created.
///
/// Sorted runs are immutable and captured when the iterator is created. The
/// MemTable is read live, so writes made while iterating may or may not be
/// seen.
///
/// # Example
///
/// ```rust,no_run
/// use emberkv::{DB, Options};
///
/// # fn main() -> Result<(), emberkv::Error> {
/// let db = DB::open("./data", Options::default())?;
///
/// db.put(b"key1", b"value1")?;
/// db.put(b"key2", b"value2")?;
/// db.put(b"key3", b"value3")?;
///
/// for item in db.iter()? {
///     let (key, value) = item?;
///     println!("{:?} => {:?}", key, value);
/// }
/// # Ok(())
/// # }
/// ```
pub struct DBIterator {
    inner: Collapse<MergeIterator>,

    /// Expiry checks are made against this timestamp
    now: Timestamp,
}

impl DBIterator {
    /// Creates an iterator over `sources`, oldest first.
    pub(crate) fn new(sources: Vec<TableIterator>, now: Timestamp) -> Self {
        Self { inner: Collapse::new(MergeIterator::new(sources)), now }
    }
}

impl Iterator for DBIterator {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if !entry.value().is_live(self.now) {
                continue;
            }
            let (key, value) = entry.into_parts();
            if let Some(payload) = value.payload() {
                return Some(Ok((key, payload.clone())));
            }
        }
    }
}

impl DB {
    /// Creates an iterator over all live key-value pairs.
    pub fn iter(&self) -> Result<DBIterator> {
        self.iter_from(b"")
    }

    /// Creates an iterator over live key-value pairs with key >= `from`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use emberkv::{DB, Options};
    ///
    /// # fn main() -> Result<(), emberkv::Error> {
    /// let db = DB::open("./data", Options::default())?;
    ///
    /// for item in db.iter_from(b"key1")? {
    ///     let (key, value) = item?;
    ///     println!("{:?} => {:?}", key, value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn iter_from(&self, from: &[u8]) -> Result<DBIterator> {
        let tables = self.snapshot();
        let sources = tables.sources(from)?;
        Ok(DBIterator::new(sources, self.clock.now()))
    }
}
