//! In-memory table for one collection.

use crate::error::{CoreError, CoreResult};
use crate::types::RowId;
use modelstore_codec::{to_cbor, Record, Value};
use std::collections::{BTreeMap, HashMap};

/// The committed records of one collection, in insertion order.
///
/// When the collection declares a primary key, a hash index maps the
/// encoded key value to its row so conflict checks and upserts do not scan.
#[derive(Debug, Clone, Default)]
pub struct Table {
    primary_key: Option<String>,
    rows: BTreeMap<RowId, Record>,
    next_row: RowId,
    key_index: HashMap<Vec<u8>, RowId>,
}

impl Table {
    /// Creates an empty table.
    #[must_use]
    pub fn new(primary_key: Option<String>) -> Self {
        Self {
            primary_key,
            ..Self::default()
        }
    }

    /// Returns the primary key field, if the collection declares one.
    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns whether the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the record at `row`.
    #[must_use]
    pub fn get(&self, row: RowId) -> Option<&Record> {
        self.rows.get(&row)
    }

    /// Iterates records in insertion order.
    pub fn rows(&self) -> impl DoubleEndedIterator<Item = (RowId, &Record)> + '_ {
        self.rows.iter().map(|(row, record)| (*row, record))
    }

    /// Returns the earliest inserted record.
    #[must_use]
    pub fn first(&self) -> Option<&Record> {
        self.rows.values().next()
    }

    /// Returns the latest inserted record.
    #[must_use]
    pub fn last(&self) -> Option<&Record> {
        self.rows.values().next_back()
    }

    /// Returns the row that will be assigned to the next insert.
    #[must_use]
    pub fn next_row(&self) -> RowId {
        self.next_row
    }

    /// Looks up the row holding primary key `key`.
    pub fn find_key(&self, key: &Value) -> CoreResult<Option<RowId>> {
        Ok(self.key_index.get(&to_cbor(key)?).copied())
    }

    /// Extracts the primary key value of `record`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the table has a primary
    /// key and the record's value for it is missing or null.
    pub fn key_of(&self, record: &Record) -> CoreResult<Option<Value>> {
        let Some(field) = &self.primary_key else {
            return Ok(None);
        };
        match record.get(field) {
            Some(value) if !value.is_null() => Ok(Some(value.clone())),
            _ => Err(CoreError::invalid_operation(format!(
                "record has no value for primary key field `{field}`"
            ))),
        }
    }

    /// Stores `record` at `row`, replacing whatever was there.
    pub(crate) fn put(&mut self, row: RowId, record: Record) -> CoreResult<()> {
        let key = self.key_of(&record)?.map(|key| to_cbor(&key)).transpose()?;
        if let Some(old) = self.rows.get(&row) {
            if let Some(old_key) = self.key_of(old)? {
                self.key_index.remove(&to_cbor(&old_key)?);
            }
        }
        if let Some(key) = key {
            self.key_index.insert(key, row);
        }
        self.rows.insert(row, record);
        if row >= self.next_row {
            self.next_row = row.next();
        }
        Ok(())
    }

    /// Removes the record at `row`.
    pub(crate) fn remove(&mut self, row: RowId) -> CoreResult<Option<Record>> {
        let Some(record) = self.rows.remove(&row) else {
            return Ok(None);
        };
        if let Some(key) = self.key_of(&record)? {
            self.key_index.remove(&to_cbor(&key)?);
        }
        Ok(Some(record))
    }

    /// Removes every record. Row ids keep advancing afterwards.
    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.rows.len();
        self.rows.clear();
        self.key_index.clear();
        removed
    }
}
