//! Write transactions.
//!
//! A [`WriteTransaction`] holds the store's single-writer lock for its whole
//! life. Changes are staged against a private copy of the committed
//! [`Snapshot`]; commit appends them to the log as one frame and then
//! publishes the copy. Dropping the transaction without committing
//! discards everything it staged.

use crate::engine::commit_log::{CommitBatch, CommitLog, LogOp};
use crate::engine::{Snapshot, Table};
use crate::error::{CoreError, CoreResult};
use crate::types::{RowId, SequenceNumber, StoreId};
use modelstore_codec::{Record, Value};
use parking_lot::{MutexGuard, RwLock};
use std::sync::Arc;
use tracing::{debug, trace};

/// A write transaction against one store.
pub struct WriteTransaction<'e> {
    store: StoreId,
    log: MutexGuard<'e, CommitLog>,
    published: &'e RwLock<Arc<Snapshot>>,
    working: Snapshot,
    ops: Vec<LogOp>,
}

impl<'e> WriteTransaction<'e> {
    pub(crate) fn new(
        store: StoreId,
        log: MutexGuard<'e, CommitLog>,
        published: &'e RwLock<Arc<Snapshot>>,
        working: Snapshot,
    ) -> Self {
        trace!(%store, base = %working.sequence(), "write transaction started");
        Self {
            store,
            log,
            published,
            working,
            ops: Vec::new(),
        }
    }

    /// Returns the table for `collection` as staged so far.
    #[must_use]
    pub fn table(&self, collection: &str) -> Option<&Table> {
        self.working.table(collection)
    }

    /// Returns the number of staged changes.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.ops.len()
    }

    /// Appends `record` to `collection`.
    ///
    /// # Errors
    ///
    /// With a primary key, fails with [`CoreError::PrimaryKeyConflict`] if
    /// the key is already present and [`CoreError::InvalidOperation`] if the
    /// record has no value for it.
    pub fn insert(
        &mut self,
        collection: &str,
        primary_key: Option<&str>,
        record: Record,
    ) -> CoreResult<RowId> {
        if let Some(field) = primary_key {
            let key = key_value(&record, field)?;
            if let Some(table) = self.working.table(collection) {
                if table.find_key(key)?.is_some() {
                    return Err(CoreError::primary_key_conflict(collection, key.to_string()));
                }
            }
        }
        let row = self.next_row(collection);
        self.stage(LogOp::Put {
            collection: collection.to_owned(),
            primary_key: primary_key.map(str::to_owned),
            row: row.as_u64(),
            record,
        })?;
        Ok(row)
    }

    /// Replaces the record whose primary key matches `record`'s, or appends
    /// it if there is none. A replaced record keeps its row.
    pub fn upsert(
        &mut self,
        collection: &str,
        primary_key: &str,
        record: Record,
    ) -> CoreResult<RowId> {
        let key = key_value(&record, primary_key)?;
        let existing = match self.working.table(collection) {
            Some(table) => table.find_key(key)?,
            None => None,
        };
        let row = match existing {
            Some(row) => row,
            None => self.next_row(collection),
        };
        self.stage(LogOp::Put {
            collection: collection.to_owned(),
            primary_key: Some(primary_key.to_owned()),
            row: row.as_u64(),
            record,
        })?;
        Ok(row)
    }

    /// Removes the record at `row`. Returns whether there was one.
    pub fn delete(&mut self, collection: &str, row: RowId) -> CoreResult<bool> {
        let present = self
            .working
            .table(collection)
            .is_some_and(|table| table.get(row).is_some());
        if present {
            self.stage(LogOp::Delete {
                collection: collection.to_owned(),
                row: row.as_u64(),
            })?;
        }
        Ok(present)
    }

    /// Removes every record of `collection` and returns how many there were.
    pub fn clear(&mut self, collection: &str) -> CoreResult<usize> {
        let count = self.working.table(collection).map_or(0, Table::len);
        if count > 0 {
            self.stage(LogOp::Clear {
                collection: collection.to_owned(),
            })?;
        }
        Ok(count)
    }

    fn next_row(&self, collection: &str) -> RowId {
        self.working
            .table(collection)
            .map_or_else(RowId::default, Table::next_row)
    }

    fn stage(&mut self, op: LogOp) -> CoreResult<()> {
        self.working.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }

    /// Makes the staged changes durable and visible.
    ///
    /// A transaction that staged nothing commits without touching the log.
    pub(crate) fn commit(self) -> CoreResult<SequenceNumber> {
        let Self {
            store,
            mut log,
            published,
            mut working,
            ops,
        } = self;

        if ops.is_empty() {
            trace!(%store, "empty write transaction");
            return Ok(working.sequence());
        }

        let sequence = working.sequence().next();
        let batch = CommitBatch {
            sequence: sequence.as_u64(),
            ops,
        };
        log.append(&batch)?;
        working.sequence = sequence;
        *published.write() = Arc::new(working);
        debug!(%store, %sequence, changes = batch.ops.len(), "committed");
        Ok(sequence)
    }

    /// Discards the staged changes.
    pub(crate) fn rollback(self) {
        trace!(store = %self.store, discarded = self.ops.len(), "write transaction rolled back");
    }
}

fn key_value<'r>(record: &'r Record, field: &str) -> CoreResult<&'r Value> {
    record.get(field).filter(|value| !value.is_null()).ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "record has no value for primary key field `{field}`"
        ))
    })
}
