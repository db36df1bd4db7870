//! SSTable builder implementation.
//!
//! Streams a sorted sequence of entries into a staging file and renames it
//! into place once complete, so a run is either fully visible under its final
//! name or not at all.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes};

use crate::error::{Error, Result};
use crate::sstable::format::{self, FOOTER_SIZE, OFFSET_SIZE};
use crate::sstable::TEMP_EXTENSION;
use crate::value::Entry;

/// SSTableBuilder builds a sorted run file.
///
/// Usage:
/// ```no_run
/// use emberkv::sstable::SSTableBuilder;
/// use emberkv::{Entry, Value};
///
/// let mut builder = SSTableBuilder::new("1sstable.dat").unwrap();
/// builder.add(&Entry::new(&b"key1"[..], Value::live(1, &b"value1"[..], None))).unwrap();
/// builder.add(&Entry::new(&b"key2"[..], Value::tombstone(2))).unwrap();
/// builder.finish().unwrap();
/// ```
pub struct SSTableBuilder {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    temp_path: PathBuf,
    offsets: Vec<u32>,
    data_size: u64,
    last_key: Option<Bytes>,
    scratch: Vec<u8>,
    sync: bool,
}

/// Staging path for a run: same stem, `.tmp` extension.
pub fn temp_path_for(path: &Path) -> PathBuf {
    path.with_extension(TEMP_EXTENSION.trim_start_matches('.'))
}

impl SSTableBuilder {
    /// Create a new builder that will publish the run at `path`.
    ///
    /// Any leftover staging file for the same path is truncated.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&path);
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(&temp_path)?;

        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path,
            temp_path,
            offsets: Vec::new(),
            data_size: 0,
            last_key: None,
            scratch: Vec::new(),
            sync: true,
        })
    }

    /// Set whether the file is fsynced before being renamed (default: true)
    pub fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if no entries have been added.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Add an entry to the run.
    ///
    /// Keys must be added in strictly ascending order.
    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if entry.key() <= last {
                return Err(Error::invalid_argument("Keys must be added in strictly ascending order"));
            }
        }

        let offset = u32::try_from(self.data_size)
            .ok()
            .filter(|&o| o <= i32::MAX as u32)
            .ok_or_else(|| Error::invalid_argument("sorted run data region exceeds i32::MAX bytes"))?;

        self.scratch.clear();
        format::encode_entry(&mut self.scratch, entry)?;

        let writer = self.writer.as_mut().ok_or_else(|| Error::internal("builder already finished"))?;
        writer.write_all(&self.scratch)?;

        self.offsets.push(offset);
        self.data_size += self.scratch.len() as u64;
        self.last_key = Some(entry.key().clone());
        Ok(())
    }

    /// Writes the index and footer, then atomically renames the staging file
    /// to the final path. Returns the file size.
    pub fn finish(mut self) -> Result<u64> {
        let mut writer = self.writer.take().ok_or_else(|| Error::internal("builder already finished"))?;

        let mut tail = Vec::with_capacity(self.offsets.len() * OFFSET_SIZE + FOOTER_SIZE);
        for offset in &self.offsets {
            tail.put_i32(*offset as i32);
        }
        let rows = i32::try_from(self.offsets.len())
            .map_err(|_| Error::invalid_argument("too many rows for one sorted run"))?;
        tail.put_i32(rows);
        writer.write_all(&tail)?;

        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        if self.sync {
            file.sync_all()?;
        }
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        if self.sync {
            sync_parent_dir(&self.path)?;
        }

        let file_size = self.data_size + tail.len() as u64;
        log::debug!("Wrote sorted run {:?}: {} rows, {} bytes", self.path, rows, file_size);
        Ok(file_size)
    }

    /// Abandon the run, removing the staging file.
    pub fn abandon(mut self) -> Result<()> {
        self.writer.take();
        fs::remove_file(&self.temp_path)?;
        Ok(())
    }

    /// Build a run at `path` from an ascending sequence of entries.
    ///
    /// An error from `entries` aborts the build and removes the staging file.
    pub fn build<P, I>(path: P, entries: I, sync: bool) -> Result<u64>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Result<Entry>>,
    {
        let mut builder = Self::new(path)?;
        builder.set_sync(sync);
        for entry in entries {
            builder.add(&entry?)?;
        }
        builder.finish()
    }
}

impl Drop for SSTableBuilder {
    fn drop(&mut self) {
        // Still holding the writer means finish() never ran to completion.
        if self.writer.take().is_some() || self.temp_path.exists() {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove staging file {:?}: {}", self.temp_path, e);
                }
            }
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::TempDir;

    fn entry(key: &'static [u8], ts: u64) -> Entry {
        Entry::new(key, Value::live(ts, &b"v"[..], None))
    }

    #[test]
    fn test_builder_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1sstable.dat");

        let mut builder = SSTableBuilder::new(&path).unwrap();
        builder.add(&entry(b"a", 1)).unwrap();
        builder.add(&entry(b"b", 2)).unwrap();
        let size = builder.finish().unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len() as u64, size);

        // Each record: 4 + 1 + 8 + 4 + 1 = 18 bytes
        let tail = &bytes[bytes.len() - 12..];
        assert_eq!(&tail[0..4], &0i32.to_be_bytes());
        assert_eq!(&tail[4..8], &18i32.to_be_bytes());
        assert_eq!(&tail[8..12], &2i32.to_be_bytes());
        assert_eq!(bytes.len(), 36 + 12);
    }

    #[test]
    fn test_builder_renames_staging_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("3sstable.dat");
        let temp = dir.path().join("3sstable.tmp");

        let mut builder = SSTableBuilder::new(&path).unwrap();
        builder.add(&entry(b"a", 1)).unwrap();
        assert!(temp.exists());
        assert!(!path.exists());

        builder.finish().unwrap();
        assert!(path.exists());
        assert!(!temp.exists());
    }

    #[test]
    fn test_builder_rejects_unsorted_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1sstable.dat");

        let mut builder = SSTableBuilder::new(&path).unwrap();
        builder.add(&entry(b"b", 1)).unwrap();
        assert!(builder.add(&entry(b"a", 2)).is_err());
        assert!(builder.add(&entry(b"b", 3)).is_err());
    }

    #[test]
    fn test_dropped_builder_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1sstable.dat");

        {
            let mut builder = SSTableBuilder::new(&path).unwrap();
            builder.add(&entry(b"a", 1)).unwrap();
        }

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_build_propagates_source_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1sstable.dat");

        let entries = vec![Ok(entry(b"a", 1)), Err(Error::corruption("bad source"))];
        let result = SSTableBuilder::build(&path, entries, false);

        assert!(matches!(result, Err(Error::Corruption(_))));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_abandon() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1sstable.dat");

        let builder = SSTableBuilder::new(&path).unwrap();
        builder.abandon().unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
