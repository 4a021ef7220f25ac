//! # modelstore testkit
//!
//! Test utilities for modelstore.
//!
//! This crate provides:
//! - Ready-made entity types, with and without a primary key
//! - Isolated stores that clean up after themselves
//! - Population helpers and proptest strategies
//!
//! ## Usage
//!
//! ```rust,ignore
//! use modelstore_testkit::prelude::*;
//!
//! #[test]
//! fn creates() {
//!     let store = TestStore::memory();
//!     TestEntityPK::new(1).create(store.ctx()).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use modelstore_core::{
        MainLoop, Persistable, PersistableExt, Predicate, Query, SortOrder, StoreConfig,
        StoreContext,
    };
}

pub use fixtures::*;
pub use generators::*;
