//! SSTable reader implementation.
//!
//! Opens a sorted run by memory-mapping it. Only the 4-byte footer is read up
//! front; index slots and records are decoded on demand during lookups and
//! scans.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Buf;
use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::sstable::format::{self, FOOTER_SIZE, OFFSET_SIZE};
use crate::sstable::parse_sstable_filename;
use crate::table::{Table, TableIterator};
use crate::value::Entry;

/// The mapped file with the region boundaries resolved.
///
/// Cheap to clone; iterators hold their own copy so they outlive the
/// `SSTable` handle.
#[derive(Debug, Clone)]
struct RunData {
    mmap: Arc<Mmap>,
    rows: usize,
    /// Start of the index region, which is also the end of the data region
    index_start: usize,
}

impl RunData {
    fn data(&self) -> &[u8] {
        &self.mmap[..self.index_start]
    }

    fn offset(&self, row: usize) -> Result<usize> {
        if row >= self.rows {
            return Err(Error::internal(format!("row {} out of range ({} rows)", row, self.rows)));
        }
        let start = self.index_start + row * OFFSET_SIZE;
        let mut slot = &self.mmap[start..start + OFFSET_SIZE];
        let offset = slot.get_i32();
        usize::try_from(offset)
            .ok()
            .filter(|&o| o < self.index_start)
            .ok_or_else(|| Error::corruption(format!("row {} has invalid offset {}", row, offset)))
    }

    fn key_at(&self, row: usize) -> Result<&[u8]> {
        format::key_at(self.data(), self.offset(row)?)
    }

    fn entry_at(&self, row: usize) -> Result<Entry> {
        format::decode_entry(self.data(), self.offset(row)?)
    }

    /// Binary search for the leftmost row with key >= `key`.
    ///
    /// Returns the row and whether its key equals `key`.
    fn position(&self, key: &[u8]) -> Result<(usize, bool)> {
        let mut left = 0;
        let mut right = self.rows;
        while left < right {
            let mid = left + (right - left) / 2;
            match self.key_at(mid)?.cmp(key) {
                std::cmp::Ordering::Less => left = mid + 1,
                std::cmp::Ordering::Greater => right = mid,
                std::cmp::Ordering::Equal => return Ok((mid, true)),
            }
        }
        Ok((left, false))
    }
}

/// A read-only sorted run backed by a memory-mapped file.
///
/// Usage:
/// ```no_run
/// use emberkv::sstable::SSTable;
///
/// let table = SSTable::open("1sstable.dat").unwrap();
/// if let Some(entry) = table.get(b"key1").unwrap() {
///     println!("Found: {:?}", entry.value());
/// }
/// ```
#[derive(Debug)]
pub struct SSTable {
    path: PathBuf,
    generation: Option<u64>,
    data: RunData,
    file_size: u64,
}

impl SSTable {
    /// Open a sorted run file for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corruption`] if the footer or index region do not
    /// fit in the file.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`. Run files are never written after
    /// being renamed into place; they are only replaced by rename or
    /// unlinked, neither of which changes an existing mapping.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!("{:?} too small to be a sorted run", path)));
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let len = mmap.len();

        let mut footer = &mmap[len - FOOTER_SIZE..];
        let rows = footer.get_i32();
        let rows = usize::try_from(rows)
            .map_err(|_| Error::corruption(format!("{:?} has negative row count {}", path, rows)))?;

        let index_start = rows
            .checked_mul(OFFSET_SIZE)
            .and_then(|index_len| (len - FOOTER_SIZE).checked_sub(index_len))
            .ok_or_else(|| {
                Error::corruption(format!("{:?}: index of {} rows does not fit in file", path, rows))
            })?;

        let generation = path.file_name().and_then(|n| n.to_str()).and_then(parse_sstable_filename);

        Ok(Self {
            path,
            generation,
            data: RunData { mmap: Arc::new(mmap), rows, index_start },
            file_size,
        })
    }

    /// Look up `key`; returns the stored entry, tombstones included.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        match self.data.position(key)? {
            (row, true) => self.data.entry_at(row).map(Some),
            _ => Ok(None),
        }
    }

    /// Iterate from the first row with key >= `from`.
    pub fn iter_from(&self, from: &[u8]) -> Result<SSTableIterator> {
        let (next, _) = self.data.position(from)?;
        Ok(SSTableIterator { data: self.data.clone(), next })
    }

    /// Iterate over all rows.
    pub fn iter(&self) -> SSTableIterator {
        SSTableIterator { data: self.data.clone(), next: 0 }
    }

    /// Returns the key stored at `row`.
    pub fn key_at(&self, row: usize) -> Result<&[u8]> {
        self.data.key_at(row)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.rows
    }

    /// Returns `true` if the run has no rows.
    pub fn is_empty(&self) -> bool {
        self.data.rows == 0
    }

    /// Path of the run file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation parsed from the file name, if it follows the naming scheme.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Get the file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

impl Table for SSTable {
    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        SSTable::get(self, key)
    }

    fn iter_from(&self, from: &[u8]) -> Result<TableIterator> {
        Ok(Box::new(SSTable::iter_from(self, from)?))
    }

    fn size_in_bytes(&self) -> u64 {
        self.file_size
    }

    fn upsert(&self, _key: &[u8], _payload: &[u8], _ttl: Option<Duration>) -> Result<()> {
        Err(Error::unsupported(format!("sorted run {:?} is read-only", self.path)))
    }

    fn remove(&self, _key: &[u8]) -> Result<()> {
        Err(Error::unsupported(format!("sorted run {:?} is read-only", self.path)))
    }
}

/// Iterator over the rows of a sorted run, decoding one record per step.
///
/// A decoding error is yielded once and ends the iteration.
pub struct SSTableIterator {
    data: RunData,
    next: usize,
}

impl Iterator for SSTableIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.data.rows {
            return None;
        }
        let result = self.data.entry_at(self.next);
        self.next = if result.is_ok() { self.next + 1 } else { self.data.rows };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.data.rows.saturating_sub(self.next);
        (0, Some(remaining))
    }
}
