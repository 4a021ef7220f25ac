//! Query engine.
//!
//! Queries run against the snapshot a handle sees when the query starts.
//! [`Results`] stays bound to the handle that produced it; the free
//! functions below decode matches into owned values.

use crate::engine::Table;
use crate::entity::Persistable;
use crate::error::CoreResult;
use crate::handle::Handle;
use crate::predicate::Query;
use crate::types::RowId;
use modelstore_codec::Record;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Matching records of one entity type, in result order.
///
/// Borrowed from the [`Handle`] that ran the query, so it cannot outlive
/// the handle or leave its thread. Entities are decoded on access; use
/// [`to_vec`](Self::to_vec) for owned copies.
pub struct Results<'h, T> {
    table: Option<Arc<Table>>,
    rows: Vec<RowId>,
    _bound: PhantomData<(&'h Handle, fn() -> T)>,
}

impl<'h, T: Persistable> Results<'h, T> {
    pub(crate) fn all(handle: &'h Handle) -> Self {
        let table = handle.snapshot().shared_table(T::COLLECTION);
        let rows = table
            .as_deref()
            .map(|table| table.rows().map(|(row, _)| row).collect())
            .unwrap_or_default();
        Self {
            table,
            rows,
            _bound: PhantomData,
        }
    }

    pub(crate) fn matching(handle: &'h Handle, query: &Query) -> CoreResult<Self> {
        query.validate(&T::descriptor())?;
        let table = handle.snapshot().shared_table(T::COLLECTION);
        let rows = table
            .as_deref()
            .map(|table| select_rows(table, query))
            .unwrap_or_default();
        trace!(collection = T::COLLECTION, matches = rows.len(), "query evaluated");
        Ok(Self {
            table,
            rows,
            _bound: PhantomData,
        })
    }

    /// Returns the number of matches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn record(&self, row: RowId) -> Option<&Record> {
        self.table.as_deref().and_then(|table| table.get(row))
    }

    fn decode(&self, row: Option<&RowId>) -> CoreResult<Option<T>> {
        row.and_then(|row| self.record(*row))
            .map(T::from_record)
            .transpose()
    }

    /// Decodes the match at `index`.
    pub fn get(&self, index: usize) -> CoreResult<Option<T>> {
        self.decode(self.rows.get(index))
    }

    /// Decodes the first match.
    pub fn first(&self) -> CoreResult<Option<T>> {
        self.decode(self.rows.first())
    }

    /// Decodes the last match.
    pub fn last(&self) -> CoreResult<Option<T>> {
        self.decode(self.rows.last())
    }

    /// Iterates over the raw matching records.
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.rows.iter().filter_map(|row| self.record(*row))
    }

    /// Decodes matches lazily.
    pub fn iter(&self) -> impl Iterator<Item = CoreResult<T>> + '_ {
        self.records().map(T::from_record)
    }

    /// Decodes every match into owned entities.
    pub fn to_vec(&self) -> CoreResult<Vec<T>> {
        self.iter().collect()
    }
}

impl<T> std::fmt::Debug for Results<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Results")
            .field("matches", &self.rows.len())
            .finish_non_exhaustive()
    }
}

/// Picks the rows of `table` matching `query`, in result order.
pub(crate) fn select_rows(table: &Table, query: &Query) -> Vec<RowId> {
    let mut matches: Vec<(RowId, &Record)> = table
        .rows()
        .filter(|(_, record)| query.matches(record))
        .collect();
    if !query.sort_keys().is_empty() {
        // stable, so ties keep insertion order
        matches.sort_by(|(_, a), (_, b)| query.order(a, b));
    }
    if let Some(limit) = query.result_limit() {
        matches.truncate(limit);
    }
    matches.into_iter().map(|(row, _)| row).collect()
}

/// Returns the earliest stored `T`, or `None` for an empty collection.
pub fn first_item<T: Persistable>(handle: &Handle) -> CoreResult<Option<T>> {
    handle.objects::<T>().first()
}

/// Returns the latest stored `T`, or `None` for an empty collection.
pub fn last_item<T: Persistable>(handle: &Handle) -> CoreResult<Option<T>> {
    handle.objects::<T>().last()
}

/// Returns every stored `T` in insertion order.
pub fn all_items<T: Persistable>(handle: &Handle) -> CoreResult<Vec<T>> {
    handle.objects::<T>().to_vec()
}

/// Returns every `T` matching `query`.
///
/// # Errors
///
/// Returns [`CoreError::QueryError`](crate::CoreError::QueryError) before
/// reading anything if the query names an unknown field.
pub fn find_where<T: Persistable>(handle: &Handle, query: &Query) -> CoreResult<Vec<T>> {
    handle.query::<T>(query.clone())?.to_vec()
}

/// Returns the first `T` matching `query`.
pub fn first_where<T: Persistable>(handle: &Handle, query: &Query) -> CoreResult<Option<T>> {
    handle.query::<T>(query.clone())?.first()
}

/// Returns the last `T` matching `query`.
pub fn last_where<T: Persistable>(handle: &Handle, query: &Query) -> CoreResult<Option<T>> {
    handle.query::<T>(query.clone())?.last()
}

/// Returns how many `T`s are stored.
pub fn count<T: Persistable>(handle: &Handle) -> CoreResult<usize> {
    Ok(handle
        .snapshot()
        .table(T::COLLECTION)
        .map_or(0, Table::len))
}

/// Returns how many `T`s match `query`.
pub fn count_where<T: Persistable>(handle: &Handle, query: &Query) -> CoreResult<usize> {
    Ok(handle.query::<T>(query.clone())?.len())
}
