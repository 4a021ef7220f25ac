//! # modelstore core
//!
//! Generic entity persistence on an embedded, append-only store.
//!
//! This crate provides:
//! - A checksummed, optionally encrypted commit log replayed into in-memory
//!   tables, shared per store location across the process
//! - Thread-confined handles with single-writer transactions
//! - The [`Persistable`] trait and [`EntityDescriptor`] metadata
//! - Primary-key-aware create, upsert, save and delete
//! - Predicate queries with insertion or explicit ordering
//! - Async variants of every operation, completed exactly once on the
//!   caller's [`MainLoop`]
//!
//! Most code only needs [`StoreContext`], [`Persistable`] and the
//! [`PersistableExt`] methods:
//!
//! ```rust,ignore
//! use modelstore_core::{Predicate, PersistableExt, StoreConfig, StoreContext};
//!
//! let ctx = StoreContext::new(StoreConfig::file("people.mslog"))?;
//! Person { id: 1, name: "Ada".into() }.create(&ctx)?;
//! let ada = Person::first_where(&ctx, Predicate::eq("name", "Ada"))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
pub mod coordinator;
mod crypto;
pub mod engine;
mod entity;
mod error;
mod ext;
mod handle;
pub mod mutation;
mod predicate;
pub mod query;
mod transaction;
mod types;

pub use config::{StoreConfig, StoreLocation};
pub use context::{configure, default_config, teardown, StoreContext};
pub use coordinator::{AsyncCall, CallState, MainLoop};
pub use crypto::{CryptoManager, EncryptionKey, KEY_SIZE};
pub use engine::{Engine, Snapshot};
pub use entity::{EntityDescriptor, Persistable};
pub use error::{CoreError, CoreResult};
pub use ext::PersistableExt;
pub use handle::Handle;
pub use predicate::{CompareOp, Predicate, Query, SortKey, SortOrder};
pub use query::Results;
pub use transaction::WriteTransaction;
pub use types::{CallId, RowId, SequenceNumber, StoreId};

// Re-export the record model so entity impls need only this crate.
pub use modelstore_codec::{Record, Value};
