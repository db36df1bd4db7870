//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable absorbs every write until it grows past the flush threshold,
//! at which point the engine writes it out as a sorted run and starts a new
//! one.
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist, so scans stay valid while new keys are
//!   inserted concurrently
//! - One version per key: upsert and remove replace whatever was there
//! - Deletes are stored as tombstones so they shadow older sorted runs
//! - Tracks the key and payload bytes it holds to decide when to flush
//!
//! ## Thread Safety
//!
//! Readers may run concurrently with a writer. Writers must be serialized
//! with each other (the engine holds its writer lock around every write),
//! otherwise size accounting for a contended key can drift.

use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::clock::Clock;
use crate::error::Result;
use crate::table::{Table, TableIterator};
use crate::value::{Entry, Value};

/// MemTable stores recent writes in memory using a SkipList.
///
/// # Example
///
/// ```rust
/// use emberkv::clock::HybridClock;
/// use emberkv::memtable::MemTable;
/// use std::sync::Arc;
///
/// let memtable = MemTable::new(Arc::new(HybridClock::new()));
/// memtable.upsert(b"key1", b"value1", None);
/// let entry = memtable.get(b"key1").unwrap();
/// assert_eq!(entry.value().data().unwrap().as_ref(), b"value1");
/// ```
pub struct MemTable {
    /// The underlying SkipList storing key -> latest version
    data: Arc<SkipMap<Bytes, Value>>,

    /// Sum of key and payload lengths
    size: AtomicUsize,

    clock: Arc<dyn Clock>,
}

impl MemTable {
    /// Creates a new empty MemTable stamping writes with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(SkipMap::new()), size: AtomicUsize::new(0), clock }
    }

    /// Stores a fresh live value for `key`, replacing any prior version.
    pub fn upsert(&self, key: &[u8], payload: &[u8], ttl: Option<Duration>) {
        let value = Value::make_live(self.clock.as_ref(), Bytes::copy_from_slice(payload), ttl);
        self.insert(Bytes::copy_from_slice(key), value);
    }

    /// Stores a tombstone for `key`, replacing any prior version.
    ///
    /// # Example
    ///
    /// ```rust
    /// use emberkv::clock::HybridClock;
    /// use emberkv::memtable::MemTable;
    /// use std::sync::Arc;
    ///
    /// let memtable = MemTable::new(Arc::new(HybridClock::new()));
    /// memtable.upsert(b"key", b"value", None);
    /// memtable.remove(b"key");
    /// assert!(memtable.get(b"key").unwrap().value().is_tombstone());
    /// ```
    pub fn remove(&self, key: &[u8]) {
        let value = Value::make_tombstone(self.clock.as_ref());
        self.insert(Bytes::copy_from_slice(key), value);
    }

    /// Installs an already stamped value.
    ///
    /// Size accounting: a new key adds its key length plus payload length;
    /// replacing a version adds the difference of the payload lengths.
    pub fn insert(&self, key: Bytes, value: Value) {
        let new_len = value.payload_len();
        match self.data.get(key.as_ref()) {
            None => {
                self.size.fetch_add(key.len() + new_len, Ordering::Relaxed);
            }
            Some(prev) => {
                let old_len = prev.value().payload_len();
                if new_len >= old_len {
                    self.size.fetch_add(new_len - old_len, Ordering::Relaxed);
                } else {
                    self.size.fetch_sub(old_len - new_len, Ordering::Relaxed);
                }
            }
        }
        self.data.insert(key, value);
    }

    /// Returns the entry for `key`, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.data.get(key).map(|e| Entry::new(e.key().clone(), e.value().clone()))
    }

    /// Returns an ascending iterator over entries with key >= `from`.
    ///
    /// The iterator is a live view: keys inserted ahead of its position
    /// while it is being consumed will be yielded.
    pub fn iter_from(&self, from: &[u8]) -> MemTableIterator {
        MemTableIterator {
            data: Arc::clone(&self.data),
            bound: Some(Bound::Included(Bytes::copy_from_slice(from))),
        }
    }

    /// Returns an ascending iterator over all entries.
    pub fn iter(&self) -> MemTableIterator {
        MemTableIterator { data: Arc::clone(&self.data), bound: Some(Bound::Unbounded) }
    }

    /// Returns the number of key and payload bytes held.
    pub fn size_in_bytes(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns the number of keys in the MemTable.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the MemTable contains no entries.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes every entry and resets the size to zero.
    pub fn clear(&self) {
        self.data.clear();
        self.size.store(0, Ordering::Relaxed);
    }
}

impl Table for MemTable {
    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(MemTable::get(self, key))
    }

    fn iter_from(&self, from: &[u8]) -> Result<TableIterator> {
        Ok(Box::new(MemTable::iter_from(self, from).map(Ok)))
    }

    fn size_in_bytes(&self) -> u64 {
        MemTable::size_in_bytes(self) as u64
    }

    fn upsert(&self, key: &[u8], payload: &[u8], ttl: Option<Duration>) -> Result<()> {
        MemTable::upsert(self, key, payload, ttl);
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<()> {
        MemTable::remove(self, key);
        Ok(())
    }
}

/// Iterator over MemTable entries in ascending key order.
///
/// Each step re-seeks past the last yielded key, so the iterator never holds
/// a borrow of the skip list and keeps it alive through an `Arc`.
pub struct MemTableIterator {
    data: Arc<SkipMap<Bytes, Value>>,
    /// Next lower bound; `None` once exhausted
    bound: Option<Bound<Bytes>>,
}

impl Iterator for MemTableIterator {
    type Item = Entry;

    fn next(&mut self) -> Option<Self::Item> {
        let bound = self.bound.take()?;
        let found = match &bound {
            Bound::Included(key) => self.data.lower_bound(Bound::Included(key.as_ref())),
            Bound::Excluded(key) => self.data.lower_bound(Bound::Excluded(key.as_ref())),
            Bound::Unbounded => self.data.front(),
        };
        let entry = found.map(|e| Entry::new(e.key().clone(), e.value().clone()))?;
        self.bound = Some(Bound::Excluded(entry.key().clone()));
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{HybridClock, ManualClock};
    use std::thread;

    fn memtable() -> MemTable {
        MemTable::new(Arc::new(HybridClock::new()))
    }

    fn keys(iter: MemTableIterator) -> Vec<Vec<u8>> {
        iter.map(|e| e.key().to_vec()).collect()
    }

    #[test]
    fn test_memtable_new() {
        let memtable = memtable();
        assert!(memtable.is_empty());
        assert_eq!(memtable.len(), 0);
        assert_eq!(memtable.size_in_bytes(), 0);
    }

    #[test]
    fn test_memtable_upsert_and_get() {
        let memtable = memtable();

        memtable.upsert(b"key1", b"value1", None);
        memtable.upsert(b"key2", b"value2", None);

        assert_eq!(memtable.get(b"key1").unwrap().value().data().unwrap().as_ref(), b"value1");
        assert_eq!(memtable.get(b"key2").unwrap().value().data().unwrap().as_ref(), b"value2");
        assert!(memtable.get(b"key3").is_none());
        assert_eq!(memtable.len(), 2);
    }

    #[test]
    fn test_memtable_upsert_replaces() {
        let memtable = memtable();

        memtable.upsert(b"key1", b"value1", None);
        let first = memtable.get(b"key1").unwrap().value().timestamp();
        memtable.upsert(b"key1", b"value2", None);
        let entry = memtable.get(b"key1").unwrap();

        assert_eq!(entry.value().data().unwrap().as_ref(), b"value2");
        assert!(entry.value().timestamp() > first);
        // One version per key
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_memtable_remove() {
        let memtable = memtable();

        memtable.upsert(b"key1", b"value1", None);
        memtable.remove(b"key1");

        let entry = memtable.get(b"key1").unwrap();
        assert!(entry.value().is_tombstone());
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_memtable_size_accounting() {
        let memtable = memtable();

        // New key: key + payload
        memtable.upsert(b"key", b"12345", None);
        assert_eq!(memtable.size_in_bytes(), 3 + 5);

        // Replace live: payload delta
        memtable.upsert(b"key", b"12", None);
        assert_eq!(memtable.size_in_bytes(), 3 + 2);

        // Tombstone over live: drop payload
        memtable.remove(b"key");
        assert_eq!(memtable.size_in_bytes(), 3);

        // Tombstone over tombstone: unchanged
        memtable.remove(b"key");
        assert_eq!(memtable.size_in_bytes(), 3);

        // Live over tombstone: add payload
        memtable.upsert(b"key", b"abcd", None);
        assert_eq!(memtable.size_in_bytes(), 3 + 4);

        // Tombstone for absent key: key only
        memtable.remove(b"other");
        assert_eq!(memtable.size_in_bytes(), 3 + 4 + 5);
    }

    #[test]
    fn test_memtable_iter_from() {
        let memtable = memtable();

        memtable.upsert(b"c", b"3", None);
        memtable.upsert(b"a", b"1", None);
        memtable.upsert(b"b", b"2", None);
        memtable.remove(b"d");

        assert_eq!(keys(memtable.iter()), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(keys(memtable.iter_from(b"b")), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(keys(memtable.iter_from(b"bb")), vec![b"c".to_vec(), b"d".to_vec()]);
        assert!(keys(memtable.iter_from(b"z")).is_empty());
    }

    #[test]
    fn test_memtable_iterator_sees_inserts_ahead() {
        let memtable = memtable();
        memtable.upsert(b"a", b"1", None);
        memtable.upsert(b"c", b"3", None);

        let mut iter = memtable.iter();
        assert_eq!(iter.next().unwrap().key().as_ref(), b"a");

        memtable.upsert(b"b", b"2", None);
        assert_eq!(iter.next().unwrap().key().as_ref(), b"b");
        assert_eq!(iter.next().unwrap().key().as_ref(), b"c");
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_memtable_clear() {
        let memtable = memtable();
        memtable.upsert(b"a", b"1", None);
        memtable.clear();

        assert!(memtable.is_empty());
        assert_eq!(memtable.size_in_bytes(), 0);
        assert!(memtable.get(b"a").is_none());
    }

    #[test]
    fn test_memtable_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let memtable = MemTable::new(clock.clone());
        memtable.upsert(b"k", b"v", Some(Duration::from_millis(10)));

        let value = memtable.get(b"k").unwrap().value().clone();
        assert!(value.is_live(clock.now()));
        clock.advance(Duration::from_millis(10));
        assert!(!value.is_live(clock.now()));
    }

    #[test]
    fn test_memtable_table_contract() {
        let memtable = memtable();
        let table: &dyn Table = &memtable;

        table.upsert(b"k1", b"v1", None).unwrap();
        table.remove(b"k2").unwrap();

        assert!(table.get(b"k1").unwrap().is_some());
        assert_eq!(table.iter_from(b"").unwrap().count(), 2);
        assert_eq!(table.size_in_bytes(), 2 + 2 + 2);
    }

    #[test]
    fn test_memtable_concurrent_readers() {
        let memtable = Arc::new(memtable());
        for i in 0..1000 {
            memtable.upsert(format!("key{:04}", i).as_bytes(), b"v", None);
        }

        let mut handles = vec![];
        for _ in 0..4 {
            let mt = Arc::clone(&memtable);
            handles.push(thread::spawn(move || {
                let collected: Vec<_> = mt.iter().collect();
                assert!(collected.windows(2).all(|w| w[0].key() < w[1].key()));
                collected.len()
            }));
        }

        // Writer keeps inserting new keys while readers scan
        for i in 1000..2000 {
            memtable.upsert(format!("key{:04}", i).as_bytes(), b"v", None);
        }

        for handle in handles {
            let seen = handle.join().unwrap();
            assert!(seen >= 1000);
        }
        assert_eq!(memtable.len(), 2000);
    }
}
