//! Multi-way merge over table iterators.
//!
//! [`MergeIterator`] interleaves any number of ascending sources into one
//! stream in [`Entry`] order. [`Collapse`] then keeps only the first entry
//! of each key, which under that order is the newest version.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::table::TableIterator;
use crate::value::Entry;

/// Entry in the merge heap
struct HeapEntry {
    entry: Entry,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap on the entry order
        other.entry.cmp(&self.entry).then_with(|| {
            // Equal key and timestamp: the higher source index (newer) pops first
            self.source.cmp(&other.source)
        })
    }
}

/// K-way merge iterator over table iterators.
///
/// Sources are ordered oldest to newest. When two sources hold the same key
/// with the same timestamp, the entry from the newer source comes out first.
///
/// A source that fails yields its error once and is then treated as
/// exhausted; the remaining sources keep merging.
pub struct MergeIterator {
    heap: BinaryHeap<HeapEntry>,
    sources: Vec<Option<TableIterator>>,
    errors: VecDeque<Error>,
}

impl MergeIterator {
    /// Create a merge iterator over `sources`, oldest first.
    pub fn new(sources: Vec<TableIterator>) -> Self {
        let mut iter = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources: sources.into_iter().map(Some).collect(),
            errors: VecDeque::new(),
        };
        for source in 0..iter.sources.len() {
            iter.advance_source(source);
        }
        iter
    }

    /// Pull the next entry of `source` into the heap.
    fn advance_source(&mut self, source: usize) {
        let Some(iter) = self.sources[source].as_mut() else {
            return;
        };
        match iter.next() {
            Some(Ok(entry)) => self.heap.push(HeapEntry { entry, source }),
            Some(Err(e)) => {
                log::debug!("Merge source {} failed: {}", source, e);
                self.sources[source] = None;
                self.errors.push_back(e);
            }
            None => self.sources[source] = None,
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.errors.pop_front() {
            return Some(Err(e));
        }

        let HeapEntry { entry, source } = self.heap.pop()?;
        self.advance_source(source);
        Some(Ok(entry))
    }
}

/// Keeps the first entry of every key group; errors pass through.
pub struct Collapse<I> {
    inner: I,
    last_key: Option<Bytes>,
}

impl<I> Collapse<I> {
    /// Wrap an iterator yielding entries in [`Entry`] order.
    pub fn new(inner: I) -> Self {
        Self { inner, last_key: None }
    }
}

impl<I: Iterator<Item = Result<Entry>>> Iterator for Collapse<I> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if self.last_key.as_ref() == Some(entry.key()) {
                continue;
            }
            self.last_key = Some(entry.key().clone());
            return Some(Ok(entry));
        }
    }
}
