//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// A byte store held entirely in memory.
///
/// Backs stores configured with an in-memory name. Its contents live as
/// long as the engine that owns it.
///
/// # Example
///
/// ```rust
/// use modelstore_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"abc").unwrap(), 0);
/// assert_eq!(backend.size().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Vec<u8>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    ///
    /// Used to replay a captured log, including damaged ones.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.data.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(len);

        if offset > size || end > self.data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(self.data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let size = self.data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        // new_size <= len, so the cast cannot truncate
        self.data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(10, 1),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn truncate_cuts_tail() {
        let mut backend = InMemoryBackend::with_data(b"frame-one|torn".to_vec());
        backend.truncate(9).unwrap();
        assert_eq!(backend.data(), b"frame-one");
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            backend.truncate(4),
            Err(StorageError::TruncateBeyondEnd {
                requested: 4,
                size: 3
            })
        ));
    }
}
