//! # emberkv - An Embedded LSM Key-Value Storage Engine
//!
//! emberkv stores byte keys and values using the Log-Structured Merge
//! pattern: writes land in an in-memory table which is periodically flushed
//! to immutable sorted files on disk. Reads merge the in-memory table with
//! every sorted file, the newest version of a key wins, and deletes are kept
//! as tombstones until a compaction drops them.
//!
//! ## Architecture
//!
//! - **Clock**: Issues strictly increasing hybrid timestamps
//! - **MemTable**: In-memory sorted structure for recent writes
//! - **SSTable**: Immutable memory-mapped sorted runs on disk
//! - **Compaction**: Merges every sorted run into one, dropping dead entries
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use emberkv::{DB, Options};
//!
//! # fn main() -> Result<(), emberkv::Error> {
//! // Open or create a database
//! let options = Options::default();
//! let db = DB::open("./data", options)?;
//!
//! // Write operations
//! db.put(b"key1", b"value1")?;
//! db.put(b"key2", b"value2")?;
//!
//! // Read operations
//! if let Some(value) = db.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Delete operations
//! db.delete(b"key1")?;
//!
//! // Merge all sorted runs into one
//! db.compact()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod clock;
pub mod compaction;
pub mod config;
pub mod error;
pub mod iterator;
pub mod memtable;
pub mod sstable;
pub mod table;
pub mod value;

// Re-exports
pub use clock::{Clock, HybridClock, ManualClock};
pub use config::Options;
pub use error::{Error, Result};
pub use iterator::DBIterator;
pub use value::{Entry, Value};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use clock::Timestamp;
use compaction::CompactionJob;
use memtable::MemTable;
use sstable::{SSTable, SSTableBuilder, COMPACTION_GENERATION};
use table::{Table, TableIterator};

/// The tables a reader sees: the current MemTable and the sorted runs,
/// oldest first.
///
/// Never modified once published; flush and compaction publish a new one.
pub(crate) struct TableSet {
    pub(crate) memtable: Arc<MemTable>,
    pub(crate) sstables: Vec<Arc<SSTable>>,
}

impl TableSet {
    /// Iterators over every table from `from`, oldest first, MemTable last.
    pub(crate) fn sources(&self, from: &[u8]) -> Result<Vec<TableIterator>> {
        let mut sources = Vec::with_capacity(self.sstables.len() + 1);
        for table in &self.sstables {
            sources.push(Table::iter_from(&**table, from)?);
        }
        sources.push(Table::iter_from(&*self.memtable, from)?);
        Ok(sources)
    }
}

/// State owned by whoever holds the writer lock.
struct WriterState {
    /// Generation of the next flushed run; never decreases
    next_generation: u64,
}

/// The main database handle.
///
/// This is the primary interface for interacting with the storage engine.
///
/// # Thread Safety
///
/// `DB` can be shared across threads using `Arc<DB>`. Writes, flushes and
/// compactions are serialized by a writer lock. Reads take a snapshot of the
/// published tables and never wait on writers.
pub struct DB {
    /// Database directory path
    path: PathBuf,

    /// Configuration options
    options: Options,

    /// Timestamp source for new versions and expiry checks
    clock: Arc<dyn Clock>,

    /// Currently published tables
    state: RwLock<Arc<TableSet>>,

    /// Serializes writers, flush and compaction
    writer: Mutex<WriterState>,
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// Existing sorted runs in the directory are opened; staging files left
    /// behind by an interrupted flush or compaction are deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory does not exist and `create_if_missing` is false
    /// - The directory holds sorted runs and `error_if_exists` is true
    /// - A sorted run file cannot be opened or is corrupt
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use emberkv::{DB, Options};
    ///
    /// # fn main() -> Result<(), emberkv::Error> {
    /// let options = Options::default();
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::open_with_clock(path, options, Arc::new(HybridClock::new()))
    }

    /// Opens a database that stamps versions with `clock`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use emberkv::{ManualClock, DB, Options};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # fn main() -> Result<(), emberkv::Error> {
    /// let clock = Arc::new(ManualClock::new(0));
    /// let db = DB::open_with_clock("./data", Options::default(), clock.clone())?;
    ///
    /// db.put_with_ttl(b"session", b"token", Duration::from_secs(60))?;
    /// clock.advance(Duration::from_secs(61));
    /// assert_eq!(db.get(b"session")?, None);
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_with_clock<P: AsRef<Path>>(path: P, options: Options, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        options.validate()?;

        // Step 1: Create directory if not exists
        if !path.exists() {
            if options.create_if_missing {
                fs::create_dir_all(&path)?;
            } else {
                return Err(Error::not_found(format!("Database directory does not exist: {:?}", path)));
            }
        }

        // Step 2: Scan for sorted runs and leftover staging files
        let mut runs = Vec::new();
        let mut stale = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(generation) = sstable::parse_sstable_filename(name) {
                runs.push((generation, entry.path()));
            } else if sstable::is_temp_filename(name) {
                stale.push(entry.path());
            }
        }

        if options.error_if_exists && !runs.is_empty() {
            return Err(Error::AlreadyExists(format!("Database already exists: {:?}", path)));
        }

        for temp in stale {
            log::warn!("Removing incomplete sorted run {:?}", temp);
            fs::remove_file(&temp)?;
        }

        // Step 3: Open sorted runs, oldest first
        runs.sort_by_key(|(generation, _)| *generation);
        let next_generation = match runs.last() {
            Some((generation, _)) => generation
                .checked_add(1)
                .ok_or_else(|| Error::corruption("sorted run generations exhausted"))?,
            None => 0,
        };

        let mut sstables = Vec::with_capacity(runs.len());
        for (generation, run_path) in runs {
            let table = SSTable::open(&run_path)?;
            log::debug!("Loaded sorted run {}: {} rows, {} bytes", generation, table.len(), table.file_size());
            sstables.push(Arc::new(table));
        }

        log::info!(
            "Opened database at {:?}: {} sorted runs, next generation {}",
            path,
            sstables.len(),
            next_generation
        );

        let memtable = Arc::new(MemTable::new(Arc::clone(&clock)));
        Ok(DB {
            path,
            options,
            clock,
            state: RwLock::new(Arc::new(TableSet { memtable, sstables })),
            writer: Mutex::new(WriterState { next_generation }),
        })
    }

    /// Inserts a key-value pair into the database.
    ///
    /// If the key already exists, its value will be overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the write triggers a flush and the flush fails.
    /// The write itself stays in the MemTable.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use emberkv::{DB, Options};
    /// # fn main() -> Result<(), emberkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"my_key", b"my_value")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(|memtable| memtable.upsert(key, value, None))
    }

    /// Same as [`DB::put`].
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(key, value)
    }

    /// Inserts a key-value pair that expires `ttl` after it is written.
    ///
    /// The TTL is kept with millisecond precision, rounded up. A zero TTL
    /// means the value never expires.
    pub fn put_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        self.write(|memtable| memtable.upsert(key, value, Some(ttl)))
    }

    /// Deletes a key from the database.
    ///
    /// This operation is implemented as a tombstone marker.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use emberkv::{DB, Options};
    /// # fn main() -> Result<(), emberkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.delete(b"my_key")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(|memtable| memtable.remove(key))
    }

    /// Same as [`DB::delete`].
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.delete(key)
    }

    fn write(&self, op: impl FnOnce(&MemTable)) -> Result<()> {
        let mut writer = self.writer.lock();
        let memtable = Arc::clone(&self.snapshot().memtable);
        op(&memtable);

        if memtable.size_in_bytes() >= self.options.flush_threshold {
            self.flush_locked(&mut writer)?;
        }
        Ok(())
    }

    /// Retrieves the value associated with a key.
    ///
    /// Returns `None` if the key was never written, was deleted, or has
    /// expired.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use emberkv::{DB, Options};
    /// # fn main() -> Result<(), emberkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// match db.get(b"my_key")? {
    ///     Some(value) => println!("Found: {:?}", value),
    ///     None => println!("Not found"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let tables = self.snapshot();
        let now = self.clock.now();

        // The MemTable always holds the newest version of a key it contains
        if let Some(entry) = tables.memtable.get(key) {
            return Ok(live_payload(entry.value(), now));
        }

        let newest = if tables.sstables.len() >= self.options.parallel_lookup_threshold {
            lookup_parallel(&tables.sstables, key)?
        } else {
            lookup_sequential(&tables.sstables, key)?
        };
        Ok(newest.and_then(|value| live_payload(&value, now)))
    }

    /// Flushes the MemTable to a new sorted run.
    ///
    /// Does nothing if the MemTable is empty.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use emberkv::{DB, Options};
    /// # fn main() -> Result<(), emberkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put(b"key", b"value")?;
    /// db.flush()?; // Manually flush to disk
    /// # Ok(())
    /// # }
    /// ```
    pub fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.flush_locked(&mut writer)
    }

    fn flush_locked(&self, writer: &mut WriterState) -> Result<()> {
        let current = self.snapshot();
        if current.memtable.is_empty() {
            return Ok(());
        }

        // Allocated up front so a failed flush never reuses the number
        let generation = writer.next_generation;
        writer.next_generation = generation
            .checked_add(1)
            .ok_or_else(|| Error::internal("sorted run generations exhausted"))?;

        let run_path = self.path.join(sstable::sstable_filename(generation));
        log::info!(
            "Flushing MemTable ({} entries, {} bytes) to {:?}",
            current.memtable.len(),
            current.memtable.size_in_bytes(),
            run_path
        );

        let file_size =
            SSTableBuilder::build(&run_path, current.memtable.iter().map(Ok), self.options.sync_writes)?;
        let table = Arc::new(SSTable::open(&run_path)?);

        let mut sstables = current.sstables.clone();
        sstables.push(table);
        self.publish(TableSet { memtable: Arc::new(MemTable::new(Arc::clone(&self.clock))), sstables });

        log::info!("Flushed sorted run {}: {} bytes", generation, file_size);
        Ok(())
    }

    /// Merges every sorted run into one, dropping tombstones, expired values
    /// and superseded versions.
    ///
    /// The MemTable is flushed first. The result is written as the reserved
    /// compaction generation and the old run files are deleted.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use emberkv::{DB, Options};
    /// # fn main() -> Result<(), emberkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.compact()?;
    /// assert!(db.sstable_count() <= 1);
    /// # Ok(())
    /// # }
    /// ```
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.flush_locked(&mut writer)?;

        let current = self.snapshot();
        if current.sstables.is_empty() {
            log::debug!("Nothing to compact");
            return Ok(());
        }

        let job = CompactionJob::new(current.sstables.clone(), &self.path, self.clock.now(), self.options.sync_writes);
        let result = job.run()?;

        self.publish(TableSet {
            memtable: Arc::clone(&current.memtable),
            sstables: vec![Arc::new(result.table)],
        });
        writer.next_generation = writer.next_generation.max(COMPACTION_GENERATION + 1);

        let removed = job.remove_inputs()?;
        log::info!("Compaction replaced {} sorted runs", removed);
        Ok(())
    }

    /// Closes the database, ensuring all data is flushed to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn close(&self) -> Result<()> {
        self.flush()?;
        log::info!("Database closed successfully");
        Ok(())
    }

    /// Number of sorted runs currently published.
    pub fn sstable_count(&self) -> usize {
        self.snapshot().sstables.len()
    }

    /// Key and payload bytes held by the MemTable.
    pub fn memtable_size(&self) -> usize {
        self.snapshot().memtable.size_in_bytes()
    }

    /// Database directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn snapshot(&self) -> Arc<TableSet> {
        Arc::clone(&self.state.read())
    }

    fn publish(&self, tables: TableSet) {
        *self.state.write() = Arc::new(tables);
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("Error flushing database during drop: {}", e);
        }
    }
}

fn live_payload(value: &Value, now: Timestamp) -> Option<Bytes> {
    if value.is_live(now) {
        value.payload().cloned()
    } else {
        None
    }
}

/// Keeps the version with the highest timestamp; on a tie, the later
/// (newer) run wins.
fn newer(current: Option<Value>, candidate: Option<Entry>) -> Option<Value> {
    let Some(candidate) = candidate else {
        return current;
    };
    let (_, value) = candidate.into_parts();
    match current {
        Some(current) if current.timestamp() > value.timestamp() => Some(current),
        _ => Some(value),
    }
}

fn lookup_sequential(sstables: &[Arc<SSTable>], key: &[u8]) -> Result<Option<Value>> {
    let mut newest = None;
    for table in sstables {
        newest = newer(newest, table.get(key)?);
    }
    Ok(newest)
}

/// Looks `key` up in every run on its own thread and waits for all of them.
fn lookup_parallel(sstables: &[Arc<SSTable>], key: &[u8]) -> Result<Option<Value>> {
    let results: Vec<Result<Option<Entry>>> = thread::scope(|scope| {
        let handles: Vec<_> = sstables.iter().map(|table| scope.spawn(move || table.get(key))).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|_| Err(Error::internal("sorted run lookup panicked"))))
            .collect()
    });

    let mut newest = None;
    for result in results {
        newest = newer(newest, result?);
    }
    Ok(newest)
}
