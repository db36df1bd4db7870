//! Compaction module for collapsing sorted runs.
//!
//! A full compaction merges every sorted run into one, keeping only the
//! newest live version of each key. Tombstones and expired values are
//! dropped since no older run remains for them to shadow.
//!
//! ## Process
//!
//! 1. Merge all input runs (merge.rs)
//! 2. Write the live entries to the reserved compaction generation through a
//!    staging file and an atomic rename
//! 3. The engine publishes the new run
//! 4. Delete the superseded files, oldest first
//!
//! Deleting oldest first means a crash part way through leaves the newest
//! runs on disk next to the compacted one. Their contents are newer than or
//! equal to what was compacted, so a restart still reads the right values.

pub mod merge;

pub use merge::{Collapse, MergeIterator};

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::Timestamp;
use crate::error::Result;
use crate::sstable::{self, SSTable, SSTableBuilder, COMPACTION_GENERATION};
use crate::table::TableIterator;

/// Compaction job that merges a set of sorted runs into one.
pub struct CompactionJob {
    /// Input runs, oldest first
    pub inputs: Vec<Arc<SSTable>>,
    /// Database directory
    pub db_path: PathBuf,
    /// Expiry checks are made against this timestamp
    pub now: Timestamp,
    /// fsync the output before renaming it into place
    pub sync: bool,
}

/// Result of a compaction operation
pub struct CompactionResult {
    /// The compacted run, already open
    pub table: SSTable,
    /// Number of entries written
    pub entry_count: usize,
    /// Size of the output file
    pub file_size: u64,
}

impl CompactionJob {
    /// Create a new compaction job
    pub fn new(inputs: Vec<Arc<SSTable>>, db_path: impl Into<PathBuf>, now: Timestamp, sync: bool) -> Self {
        Self { inputs, db_path: db_path.into(), now, sync }
    }

    /// Path of the compacted run.
    pub fn output_path(&self) -> PathBuf {
        self.db_path.join(sstable::sstable_filename(COMPACTION_GENERATION))
    }

    /// Execute the compaction
    ///
    /// The output replaces any existing file of the compaction generation.
    /// An empty result still produces an (empty) run.
    pub fn run(&self) -> Result<CompactionResult> {
        log::info!("Starting compaction: {} input files", self.inputs.len());

        let sources: Vec<TableIterator> =
            self.inputs.iter().map(|table| Box::new(table.iter()) as TableIterator).collect();
        let now = self.now;
        let live = Collapse::new(MergeIterator::new(sources))
            .filter(|entry| entry.as_ref().map_or(true, |e| e.value().is_live(now)));

        let output_path = self.output_path();
        let mut builder = SSTableBuilder::new(&output_path)?;
        builder.set_sync(self.sync);
        for entry in live {
            builder.add(&entry?)?;
        }
        let entry_count = builder.len();
        let file_size = builder.finish()?;

        let table = SSTable::open(&output_path)?;

        log::info!(
            "Compaction completed: {} entries written, file size: {} bytes",
            entry_count,
            file_size
        );

        Ok(CompactionResult { table, entry_count, file_size })
    }

    /// Delete the input files, oldest first, skipping the output path.
    ///
    /// Stops at the first failure; files that remain are newer than the
    /// compacted run and stay correct to read.
    pub fn remove_inputs(&self) -> Result<usize> {
        let output_path = self.output_path();
        let mut removed = 0;
        for table in &self.inputs {
            if table.path() == output_path {
                continue;
            }
            match fs::remove_file(table.path()) {
                Ok(()) => {
                    log::debug!("Deleted compacted run {:?}", table.path());
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
