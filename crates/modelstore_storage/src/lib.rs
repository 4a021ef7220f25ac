//! # modelstore storage
//!
//! Byte-store backends underneath the modelstore commit log.
//!
//! Backends are **opaque**: they append, read back and truncate bytes and
//! know nothing about frames, records or entities. The engine in
//! `modelstore_core` owns every byte it writes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For in-memory stores and tests
//! - [`FileBackend`] - For persistent stores backed by one file
//!
//! ## Example
//!
//! ```rust
//! use modelstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! assert_eq!(backend.read_all().unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
