//! Configuration options for the emberkv storage engine.

use serde::{Deserialize, Serialize};

/// Configuration options for opening a database.
///
/// Options can be built in code with the builder methods or loaded from JSON
/// with [`Options::from_json`]; fields missing from the JSON document keep
/// their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the database directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database directory already contains sorted runs.
    /// Default: false
    pub error_if_exists: bool,

    /// MemTable size (key + payload bytes) at which it is flushed to a
    /// sorted run.
    /// Default: 4MB
    pub flush_threshold: usize,

    /// Number of sorted runs at which point lookups fan out to one thread
    /// per run instead of probing them sequentially.
    /// Default: 4
    pub parallel_lookup_threshold: usize,

    /// fsync sorted run files before renaming them into place.
    /// Default: true
    pub sync_writes: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            flush_threshold: 4 * 1024 * 1024, // 4MB
            parallel_lookup_threshold: 4,
            sync_writes: true,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document.
    ///
    /// ```rust
    /// use emberkv::Options;
    ///
    /// let opts = Options::from_json(r#"{ "flush_threshold": 1024 }"#).unwrap();
    /// assert_eq!(opts.flush_threshold, 1024);
    /// assert!(opts.create_if_missing);
    /// ```
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether opening an existing database is an error.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the MemTable flush threshold in bytes.
    pub fn flush_threshold(mut self, size: usize) -> Self {
        self.flush_threshold = size;
        self
    }

    /// Sets the run count at which point lookups go parallel.
    pub fn parallel_lookup_threshold(mut self, runs: usize) -> Self {
        self.parallel_lookup_threshold = runs;
        self
    }

    /// Enables or disables fsync of run files.
    pub fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.parallel_lookup_threshold == 0 {
            return Err(crate::Error::invalid_argument("parallel_lookup_threshold must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.error_if_exists);
        assert_eq!(opts.flush_threshold, 4 * 1024 * 1024);
        assert_eq!(opts.parallel_lookup_threshold, 4);
        assert!(opts.sync_writes);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .flush_threshold(1024)
            .parallel_lookup_threshold(2)
            .sync_writes(false);

        assert_eq!(opts.flush_threshold, 1024);
        assert_eq!(opts.parallel_lookup_threshold, 2);
        assert!(!opts.sync_writes);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.parallel_lookup_threshold = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_options_from_json() {
        let opts = Options::from_json(r#"{ "sync_writes": false, "flush_threshold": 64 }"#).unwrap();
        assert!(!opts.sync_writes);
        assert_eq!(opts.flush_threshold, 64);
        assert_eq!(opts.parallel_lookup_threshold, 4);

        assert!(Options::from_json(r#"{ "parallel_lookup_threshold": 0 }"#).is_err());
        assert!(Options::from_json("not json").is_err());
    }
}
