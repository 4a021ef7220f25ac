//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A byte store backed by a single file.
///
/// Appends go to the end of the file; `sync` calls `File::sync_all`, so a
/// commit is durable once the engine has synced the frame it appended.
///
/// # Example
///
/// ```no_run
/// use modelstore_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("store.mslog")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    // reads seek, so the handle needs interior mutability behind `&self`
    file: Mutex<File>,
    size: u64,
}

impl FileBackend {
    /// Opens the file at `path`, creating it (and its parent directories)
    /// if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or directories cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(path, file)
    }

    /// Opens the file at `path` only if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if there is no file at `path`.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        if !path.is_file() {
            return Err(StorageError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if offset > self.size || end > self.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        let file = self.file.get_mut();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.flush()?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.get_mut().sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: self.size,
            });
        }
        let file = self.file.get_mut();
        file.set_len(new_size)?;
        file.sync_all()?;
        self.size = new_size;
        Ok(())
    }
}
