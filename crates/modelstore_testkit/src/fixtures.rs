//! Test entities and store helpers.

use modelstore_core::{
    AsyncCall, CoreResult, MainLoop, Persistable, PersistableExt, Record, StoreConfig,
    StoreContext, StoreLocation,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// How long fixtures wait for an async call before giving up.
pub const ASYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// An entity without a primary key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestEntity {
    /// Free-form label.
    pub name: String,
}

impl TestEntity {
    /// Creates an entity with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Persistable for TestEntity {
    const COLLECTION: &'static str = "test_entity";
    const FIELDS: &'static [&'static str] = &["name"];

    fn to_record(&self) -> Record {
        Record::new().with("name", self.name.as_str())
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        Ok(Self {
            name: record.text("name")?.to_string(),
        })
    }
}

/// An entity keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestEntityPK {
    /// Primary key.
    pub id: i64,
    /// Free-form label.
    pub name: String,
}

impl TestEntityPK {
    /// Creates an entity with the given key and a name derived from it.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            name: format!("entity-{id}"),
        }
    }

    /// Creates an entity with an explicit name.
    pub fn named(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl Persistable for TestEntityPK {
    const COLLECTION: &'static str = "test_entity_pk";
    const FIELDS: &'static [&'static str] = &["id", "name"];
    const PRIMARY_KEY: Option<&'static str> = Some("id");

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        Ok(Self {
            id: record.integer("id")?,
            name: record.text("name")?.to_string(),
        })
    }
}

/// An isolated store that is closed (and deleted) when dropped.
pub struct TestStore {
    ctx: StoreContext,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a uniquely named in-memory store.
    pub fn memory() -> Self {
        Self::from_config(StoreConfig::in_memory(unique_name()), None)
    }

    /// Creates a store backed by a file in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("store.mslog");
        Self::from_config(StoreConfig::file(path), Some(temp_dir))
    }

    /// Creates a store from `config`, which must point somewhere unique.
    pub fn with_config(config: StoreConfig) -> Self {
        Self::from_config(config, None)
    }

    fn from_config(config: StoreConfig, temp_dir: Option<TempDir>) -> Self {
        let ctx = StoreContext::new(config.sync_on_commit(false).background_threads(2))
            .expect("Failed to start store context");
        Self {
            ctx,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the context for this store.
    pub fn ctx(&self) -> &StoreContext {
        &self.ctx
    }

    /// Returns the log file path for file-backed stores.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.ctx.config().location {
            StoreLocation::File(path) => Some(path.clone()),
            StoreLocation::Memory(_) => None,
        }
    }

    /// Closes the store so the next operation replays it from its log.
    pub fn reopen(&self) {
        self.ctx.close().expect("Failed to close store");
    }
}

impl Drop for TestStore {
    fn drop(&mut self) {
        let _ = self.ctx.destroy();
    }
}

/// Returns a process-unique store name.
pub fn unique_name() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

/// Runs `f` against a fresh in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&StoreContext) -> R,
{
    let store = TestStore::memory();
    f(store.ctx())
}

/// Runs `f` against a fresh file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&StoreContext, &Path) -> R,
{
    let store = TestStore::file();
    let path = store.path().expect("File store should have a path");
    f(store.ctx(), &path)
}

/// Waits for `call` on `main_loop`, panicking on timeout.
pub fn await_call(main_loop: &MainLoop, call: &AsyncCall) {
    assert!(
        main_loop.wait_for(call, ASYNC_TIMEOUT),
        "async call {} was not delivered in time",
        call.id()
    );
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Stores keyed entities with ids `0..count`, in order.
    pub fn populate_keyed(ctx: &StoreContext, count: i64) -> Vec<TestEntityPK> {
        let entities: Vec<_> = (0..count).map(TestEntityPK::new).collect();
        TestEntityPK::save_all(ctx, &entities).expect("Failed to populate keyed entities");
        entities
    }

    /// Stores `count` unkeyed entities named `item-0`, `item-1`, ...
    pub fn populate_unkeyed(ctx: &StoreContext, count: usize) -> Vec<TestEntity> {
        let entities: Vec<_> = (0..count)
            .map(|i| TestEntity::new(format!("item-{i}")))
            .collect();
        TestEntity::save_all(ctx, &entities).expect("Failed to populate entities");
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stores_are_isolated() {
        let a = TestStore::memory();
        let b = TestStore::memory();
        scenarios::populate_keyed(a.ctx(), 3);
        assert_eq!(TestEntityPK::count(a.ctx()).unwrap(), 3);
        assert_eq!(TestEntityPK::count(b.ctx()).unwrap(), 0);
    }

    #[test]
    fn file_store_survives_reopen() {
        let store = TestStore::file();
        scenarios::populate_unkeyed(store.ctx(), 2);
        store.reopen();
        assert_eq!(TestEntity::count(store.ctx()).unwrap(), 2);
    }

    #[test]
    fn file_store_is_removed_on_drop() {
        let store = TestStore::file();
        scenarios::populate_keyed(store.ctx(), 1);
        let path = store.path().unwrap();
        assert!(path.exists());
        drop(store);
        assert!(!path.exists());
    }

    #[test]
    fn fixtures_round_trip_records() {
        let entity = TestEntityPK::named(4, "four");
        assert_eq!(
            TestEntityPK::from_record(&entity.to_record()).unwrap(),
            entity
        );
    }
}
