//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store.
///
/// The commit log is the only writer: it appends whole frames, reads the
/// store back in one piece on open, and truncates a torn tail after a
/// crash. Backends never interpret what they hold.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` makes every appended byte durable
/// - `truncate` never grows the store
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not
    /// fully inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the store down to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size`
    /// exceeds the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined or the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "store too large to load into memory",
            )
        })?;
        self.read_at(0, len)
    }
}
