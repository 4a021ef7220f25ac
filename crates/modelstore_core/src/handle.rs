//! Thread-confined store handles.
//!
//! A [`Handle`] is a short-lived session on one store. It cannot leave the
//! thread that opened it, and each thread may hold at most one handle per
//! store at a time: a second acquisition fails with
//! [`CoreError::ReentrantAcquisition`] instead of deadlocking on the
//! store's writer lock.

use crate::config::StoreLocation;
use crate::engine::{Engine, Snapshot};
use crate::entity::Persistable;
use crate::error::{CoreError, CoreResult};
use crate::predicate::Query;
use crate::query::Results;
use crate::transaction::WriteTransaction;
use crate::types::StoreId;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

thread_local! {
    static ACTIVE_STORES: RefCell<HashSet<StoreId>> = RefCell::new(HashSet::new());
    static WRITING_STORES: RefCell<HashSet<StoreId>> = RefCell::new(HashSet::new());
}

/// Returns whether this thread is inside a write transaction on `store`.
///
/// Such a thread holds the store's writer lock, so closing the store from
/// it would never return.
pub(crate) fn writing_on_this_thread(store: StoreId) -> bool {
    WRITING_STORES
        .try_with(|writing| writing.borrow().contains(&store))
        .unwrap_or(false)
}

/// A session on one store, bound to the current thread.
pub struct Handle {
    engine: Arc<Engine>,
    writing: Cell<bool>,
    _thread_bound: PhantomData<*const ()>,
}

impl Handle {
    pub(crate) fn acquire(engine: Arc<Engine>) -> CoreResult<Self> {
        let id = engine.id();
        let fresh = ACTIVE_STORES.with(|active| active.borrow_mut().insert(id));
        if !fresh {
            return Err(CoreError::reentrant_acquisition(format!(
                "a handle for {} is already active on this thread",
                engine.location()
            )));
        }
        trace!(store = %id, "handle opened");
        Ok(Self {
            engine,
            writing: Cell::new(false),
            _thread_bound: PhantomData,
        })
    }

    /// Returns the id of the underlying engine.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.engine.id()
    }

    /// Returns where the store lives.
    #[must_use]
    pub fn location(&self) -> &StoreLocation {
        self.engine.location()
    }

    /// Returns the latest committed state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.engine.snapshot()
    }

    /// Runs `body` in a write transaction.
    ///
    /// The transaction commits if `body` returns `Ok` and rolls back
    /// otherwise, including when `body` panics.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReentrantAcquisition`] if this handle is already
    /// inside a write transaction, the error from `body`, or the commit
    /// failure.
    pub fn write<R>(
        &self,
        body: impl FnOnce(&mut WriteTransaction<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        if self.writing.replace(true) {
            return Err(CoreError::reentrant_acquisition(
                "a write transaction is already active on this handle",
            ));
        }
        let _writing = WritingFlag::set(&self.writing, self.engine.id());

        let mut txn = self.engine.begin_write()?;
        match body(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    /// Returns a live view over every stored `T`, in insertion order.
    pub fn objects<T: Persistable>(&self) -> Results<'_, T> {
        Results::all(self)
    }

    /// Returns a live view over the `T`s matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueryError`] if the query names an unknown field.
    pub fn query<T: Persistable>(&self, query: impl Into<Query>) -> CoreResult<Results<'_, T>> {
        Results::matching(self, &query.into())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let id = self.engine.id();
        // The thread-local may already be gone during thread teardown.
        let _ = ACTIVE_STORES.try_with(|active| active.borrow_mut().remove(&id));
        trace!(store = %id, "handle released");
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("store", &self.engine.id())
            .field("location", self.engine.location())
            .finish_non_exhaustive()
    }
}

struct WritingFlag<'a> {
    flag: &'a Cell<bool>,
    store: StoreId,
}

impl<'a> WritingFlag<'a> {
    fn set(flag: &'a Cell<bool>, store: StoreId) -> Self {
        WRITING_STORES.with(|writing| writing.borrow_mut().insert(store));
        Self { flag, store }
    }
}

impl Drop for WritingFlag<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
        let _ = WRITING_STORES.try_with(|writing| writing.borrow_mut().remove(&self.store));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use modelstore_codec::Record;

    fn open(name: &str) -> Arc<Engine> {
        Arc::new(Engine::open(&StoreConfig::in_memory(name)).unwrap())
    }

    #[test]
    fn second_handle_on_same_thread_is_rejected() {
        let engine = open("handle-reentrant");
        let first = Handle::acquire(Arc::clone(&engine)).unwrap();
        assert!(matches!(
            Handle::acquire(Arc::clone(&engine)),
            Err(CoreError::ReentrantAcquisition { .. })
        ));
        drop(first);
        assert!(Handle::acquire(engine).is_ok());
    }

    #[test]
    fn write_marks_store_for_this_thread() {
        let engine = open("handle-writing");
        let id = engine.id();
        let handle = Handle::acquire(engine).unwrap();
        assert!(!writing_on_this_thread(id));
        handle
            .write(|_| {
                assert!(writing_on_this_thread(id));
                Ok(())
            })
            .unwrap();
        assert!(!writing_on_this_thread(id));
    }

    #[test]
    fn other_threads_may_hold_handles() {
        let engine = open("handle-threads");
        let _mine = Handle::acquire(Arc::clone(&engine)).unwrap();
        let theirs = std::thread::spawn(move || Handle::acquire(engine).is_ok())
            .join()
            .unwrap();
        assert!(theirs);
    }

    #[test]
    fn nested_write_is_rejected() {
        let handle = Handle::acquire(open("handle-nested")).unwrap();
        let result = handle.write(|_| handle.write(|_| Ok(())));
        assert!(matches!(
            result,
            Err(CoreError::ReentrantAcquisition { .. })
        ));
        assert!(handle.write(|_| Ok(())).is_ok());
    }

    #[test]
    fn failed_body_rolls_back() {
        let handle = Handle::acquire(open("handle-rollback")).unwrap();
        let result: CoreResult<()> = handle.write(|txn| {
            txn.insert("notes", None, Record::new().with("text", "draft"))?;
            Err(CoreError::invalid_operation("abandon"))
        });
        assert!(result.is_err());
        assert!(handle.snapshot().table("notes").is_none());
    }

    #[test]
    fn panicking_body_releases_everything() {
        let engine = open("handle-panic");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let handle = Handle::acquire(Arc::clone(&engine)).unwrap();
            let _: CoreResult<()> = handle.write(|_| panic!("boom"));
        }));
        assert!(outcome.is_err());

        let handle = Handle::acquire(engine).unwrap();
        handle
            .write(|txn| txn.insert("notes", None, Record::new()).map(drop))
            .unwrap();
        assert_eq!(handle.snapshot().table("notes").unwrap().len(), 1);
    }
}
