//! Mutation engine.
//!
//! Every function runs in exactly one write transaction on the given
//! handle: it commits when the whole operation succeeds and rolls back
//! otherwise, so a failed batch leaves nothing behind.

use crate::entity::{EntityDescriptor, Persistable};
use crate::error::CoreResult;
use crate::handle::Handle;
use crate::predicate::Query;
use crate::query::select_rows;
use crate::transaction::WriteTransaction;
use crate::types::RowId;
use tracing::debug;

/// Inserts `entity`.
///
/// # Errors
///
/// Returns [`CoreError::PrimaryKeyConflict`](crate::CoreError::PrimaryKeyConflict)
/// if the type has a primary key and a record with the same key exists.
pub fn create<T: Persistable>(handle: &Handle, entity: &T) -> CoreResult<RowId> {
    let descriptor = T::descriptor();
    descriptor.validate()?;
    let record = entity.to_record();
    handle.write(|txn| txn.insert(descriptor.collection(), descriptor.primary_key(), record))
}

/// Inserts `entity`, or replaces the stored record with the same primary
/// key. A replaced record keeps its place in insertion order.
///
/// # Errors
///
/// Returns [`CoreError::InvalidOperation`](crate::CoreError::InvalidOperation)
/// if the type has no primary key. Nothing is written in that case.
pub fn create_or_update<T: Persistable>(handle: &Handle, entity: &T) -> CoreResult<RowId> {
    let descriptor = T::descriptor();
    descriptor.validate()?;
    let key = descriptor.require_primary_key()?;
    let record = entity.to_record();
    handle.write(|txn| txn.upsert(descriptor.collection(), key, record))
}

/// Upserts `entity` if its type has a primary key, inserts it otherwise.
pub fn save<T: Persistable>(handle: &Handle, entity: &T) -> CoreResult<RowId> {
    let descriptor = T::descriptor();
    descriptor.validate()?;
    handle.write(|txn| stage_save(txn, &descriptor, entity))
}

/// Saves every entity in one transaction. Either all are stored or none.
pub fn save_all<T: Persistable>(handle: &Handle, entities: &[T]) -> CoreResult<usize> {
    let descriptor = T::descriptor();
    descriptor.validate()?;
    handle.write(|txn| {
        for entity in entities {
            stage_save(txn, &descriptor, entity)?;
        }
        Ok(entities.len())
    })
}

fn stage_save<T: Persistable>(
    txn: &mut WriteTransaction<'_>,
    descriptor: &EntityDescriptor,
    entity: &T,
) -> CoreResult<RowId> {
    let record = entity.to_record();
    match descriptor.primary_key() {
        Some(key) => txn.upsert(descriptor.collection(), key, record),
        None => txn.insert(descriptor.collection(), None, record),
    }
}

/// Removes every stored `T` and returns how many there were.
pub fn delete_all<T: Persistable>(handle: &Handle) -> CoreResult<usize> {
    let removed = handle.write(|txn| txn.clear(T::COLLECTION))?;
    debug!(collection = T::COLLECTION, removed, "deleted all");
    Ok(removed)
}

/// Removes the `T`s matching `query` and returns how many there were.
///
/// # Errors
///
/// Returns [`CoreError::QueryError`](crate::CoreError::QueryError) for an
/// unknown field, before anything is removed.
pub fn delete_where<T: Persistable>(handle: &Handle, query: &Query) -> CoreResult<usize> {
    query.validate(&T::descriptor())?;
    let removed = handle.write(|txn| {
        let rows = txn
            .table(T::COLLECTION)
            .map(|table| select_rows(table, query))
            .unwrap_or_default();
        for row in &rows {
            txn.delete(T::COLLECTION, *row)?;
        }
        Ok(rows.len())
    })?;
    debug!(collection = T::COLLECTION, removed, "deleted matching");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::engine::Engine;
    use crate::error::CoreError;
    use crate::predicate::Predicate;
    use crate::query::{all_items, count};
    use modelstore_codec::Record;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Memo {
        body: String,
    }

    impl Persistable for Memo {
        const COLLECTION: &'static str = "memos";
        const FIELDS: &'static [&'static str] = &["body"];

        fn to_record(&self) -> Record {
            Record::new().with("body", self.body.as_str())
        }

        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                body: record.text("body")?.to_string(),
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        id: i64,
        owner: String,
    }

    impl Persistable for Account {
        const COLLECTION: &'static str = "accounts";
        const FIELDS: &'static [&'static str] = &["id", "owner"];
        const PRIMARY_KEY: Option<&'static str> = Some("id");

        fn to_record(&self) -> Record {
            Record::new()
                .with("id", self.id)
                .with("owner", self.owner.as_str())
        }

        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                id: record.integer("id")?,
                owner: record.text("owner")?.to_string(),
            })
        }
    }

    fn account(id: i64, owner: &str) -> Account {
        Account {
            id,
            owner: owner.into(),
        }
    }

    fn handle(name: &str) -> Handle {
        Handle::acquire(Arc::new(
            Engine::open(&StoreConfig::in_memory(name)).unwrap(),
        ))
        .unwrap()
    }

    #[test]
    fn unkeyed_create_and_save_always_append() {
        let handle = handle("mutation-unkeyed");
        let memo = Memo { body: "hi".into() };
        create(&handle, &memo).unwrap();
        create(&handle, &memo).unwrap();
        save(&handle, &memo).unwrap();
        assert_eq!(count::<Memo>(&handle).unwrap(), 3);
    }

    #[test]
    fn unkeyed_upsert_is_rejected_without_writing() {
        let handle = handle("mutation-unkeyed-upsert");
        let err = create_or_update(&handle, &Memo { body: "x".into() }).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert_eq!(count::<Memo>(&handle).unwrap(), 0);
        assert_eq!(handle.snapshot().sequence().as_u64(), 0);
    }

    #[test]
    fn duplicate_create_conflicts() {
        let handle = handle("mutation-conflict");
        create(&handle, &account(1, "ada")).unwrap();
        let err = create(&handle, &account(1, "bob")).unwrap_err();
        assert!(matches!(err, CoreError::PrimaryKeyConflict { .. }));
        assert_eq!(all_items::<Account>(&handle).unwrap(), [account(1, "ada")]);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let handle = handle("mutation-upsert");
        save_all(&handle, &[account(1, "ada"), account(2, "bob")]).unwrap();
        create_or_update(&handle, &account(1, "ada lovelace")).unwrap();
        save(&handle, &account(1, "ada lovelace")).unwrap();
        assert_eq!(
            all_items::<Account>(&handle).unwrap(),
            [account(1, "ada lovelace"), account(2, "bob")]
        );
    }

    #[test]
    fn failed_batch_leaves_nothing() {
        let handle = handle("mutation-batch");
        create(&handle, &account(9, "zed")).unwrap();
        let result = handle.write(|txn| {
            txn.insert("accounts", Some("id"), account(1, "ada").to_record())?;
            txn.insert("accounts", Some("id"), account(9, "dup").to_record())
        });
        assert!(result.is_err());
        assert_eq!(all_items::<Account>(&handle).unwrap(), [account(9, "zed")]);
    }

    #[test]
    fn deletes_report_counts() {
        let handle = handle("mutation-delete");
        let accounts: Vec<_> = (0..5).map(|id| account(id, "x")).collect();
        save_all(&handle, &accounts).unwrap();

        assert_eq!(
            delete_where::<Account>(&handle, &Predicate::eq("id", 1).into()).unwrap(),
            1
        );
        assert_eq!(
            delete_where::<Account>(&handle, &Predicate::eq("id", 1).into()).unwrap(),
            0
        );
        assert_eq!(count::<Account>(&handle).unwrap(), 4);
        assert_eq!(delete_all::<Account>(&handle).unwrap(), 4);
        assert_eq!(delete_all::<Account>(&handle).unwrap(), 0);
    }

    #[test]
    fn delete_where_validates_fields() {
        let handle = handle("mutation-delete-invalid");
        save(&handle, &account(1, "ada")).unwrap();
        let err = delete_where::<Account>(&handle, &Predicate::eq("balance", 0).into()).unwrap_err();
        assert!(matches!(err, CoreError::QueryError { .. }));
        assert_eq!(count::<Account>(&handle).unwrap(), 1);
    }
}
