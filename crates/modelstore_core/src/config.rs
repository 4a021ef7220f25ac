//! Store configuration.

use crate::crypto::EncryptionKey;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    /// A commit log file on disk.
    File(PathBuf),
    /// A named store that lives only in process memory.
    ///
    /// All contexts using the same name share one store until it is
    /// closed or the process exits.
    Memory(String),
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::File(path) => write!(f, "{}", path.display()),
            StoreLocation::Memory(name) => write!(f, "memory:{name}"),
        }
    }
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where the store lives.
    pub location: StoreLocation,

    /// Schema version recorded in the log header. Opening a store written
    /// with a different version fails with `StoreUnavailable`.
    pub schema_version: u64,

    /// Key used to seal commit frames, if the store is encrypted.
    pub encryption_key: Option<EncryptionKey>,

    /// Whether to fsync the log on every commit.
    pub sync_on_commit: bool,

    /// Whether to create the log file if it does not exist.
    pub create_if_missing: bool,

    /// Upper bound on background threads running async calls.
    pub background_threads: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::Memory("default".to_string()),
            schema_version: 0,
            encryption_key: None,
            sync_on_commit: true,
            create_if_missing: true,
            background_threads: 4,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration for a file-backed store.
    #[must_use]
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::File(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Creates a configuration for a named in-memory store.
    #[must_use]
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            location: StoreLocation::Memory(name.into()),
            ..Self::default()
        }
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Enables encryption with the given key.
    #[must_use]
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the background thread bound. Zero is treated as one.
    #[must_use]
    pub const fn background_threads(mut self, count: usize) -> Self {
        self.background_threads = count;
        self
    }

    /// Returns whether this store lives only in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        matches!(self.location, StoreLocation::Memory(_))
    }
}
