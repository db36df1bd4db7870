//! SSTable (sorted run) implementation.
//!
//! A sorted run is an immutable file holding one version per key, in strictly
//! ascending key order. Runs are produced by MemTable flushes and by
//! compaction, and never modified afterwards.
//!
//! ## File Format
//!
//! All integers are big-endian.
//!
//! ```text
//! [Data region]   records, ascending key order
//! [Index region]  row_count x i32 offset of each record in the data region
//! [Footer]        i32 row_count
//! ```
//!
//! ## Record Format
//!
//! ```text
//! i32 key_len | key
//! i64 signed_timestamp        // negative => tombstone, magnitude = timestamp
//! if signed_timestamp >= 0:
//!     if bit 62 set: i64 ttl_millis
//!     i32 value_len | value
//! ```
//!
//! ## File Naming
//!
//! `<generation>sstable.dat`, staged as `<generation>sstable.tmp` until it is
//! complete and renamed into place.

pub mod builder;
pub mod format;
pub mod reader;

pub use builder::SSTableBuilder;
pub use reader::{SSTable, SSTableIterator};

/// Marker between the generation number and the extension.
pub const TABLE_SUFFIX: &str = "sstable";

/// Extension of a complete sorted run.
pub const DATA_EXTENSION: &str = ".dat";

/// Extension of a sorted run that is still being written.
pub const TEMP_EXTENSION: &str = ".tmp";

/// Generation used for the output of a full compaction.
pub const COMPACTION_GENERATION: u64 = 0;

/// Returns the file name of the run with the given generation.
pub fn sstable_filename(generation: u64) -> String {
    format!("{}{}{}", generation, TABLE_SUFFIX, DATA_EXTENSION)
}

fn parse_generation(name: &str, extension: &str) -> Option<u64> {
    let digits = name.strip_suffix(extension)?.strip_suffix(TABLE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parses the generation out of a run file name.
///
/// Returns `None` for anything that is not `<decimal><suffix><extension>`.
pub fn parse_sstable_filename(name: &str) -> Option<u64> {
    parse_generation(name, DATA_EXTENSION)
}

/// Returns `true` for a leftover staging file.
pub fn is_temp_filename(name: &str) -> bool {
    parse_generation(name, TEMP_EXTENSION).is_some()
}
