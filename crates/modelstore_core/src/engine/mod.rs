//! The embedded store engine.
//!
//! An engine owns one store location. Committed state lives in memory as a
//! [`Snapshot`] of per-collection [`Table`]s; every commit is appended to
//! the commit log first and then published as a new snapshot. Opening a
//! store replays the log.
//!
//! Readers clone the current `Arc<Snapshot>` and never block writers.
//! Writers are serialized by the mutex around the commit log and work on a
//! private copy of the snapshot whose tables are shared until touched.

pub mod commit_log;
pub(crate) mod registry;
mod table;

pub use commit_log::{verify_log, LogHeader, LogReport, TornTail};
pub use table::Table;

use crate::config::{StoreConfig, StoreLocation};
use crate::crypto::{CryptoManager, EncryptionKey};
use crate::error::{CoreError, CoreResult};
use crate::transaction::WriteTransaction;
use crate::types::{RowId, SequenceNumber, StoreId};
use commit_log::{decode_header, scan_frames, CommitLog, LogOp, FORMAT_VERSION};
use modelstore_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// An immutable view of every committed collection at one sequence number.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) sequence: SequenceNumber,
    tables: HashMap<String, Arc<Table>>,
}

impl Snapshot {
    /// Returns the sequence number of the last commit in this view.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Returns the table for `collection`, if anything was ever stored in it.
    #[must_use]
    pub fn table(&self, collection: &str) -> Option<&Table> {
        self.tables.get(collection).map(Arc::as_ref)
    }

    pub(crate) fn shared_table(&self, collection: &str) -> Option<Arc<Table>> {
        self.tables.get(collection).cloned()
    }

    /// Returns collection names, sorted.
    #[must_use]
    pub fn collections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Applies one logged change. Used both while staging a write and
    /// while replaying the log, so both paths produce the same state.
    pub(crate) fn apply(&mut self, op: &LogOp) -> CoreResult<()> {
        match op {
            LogOp::Put {
                collection,
                primary_key,
                row,
                record,
            } => {
                let table = self
                    .tables
                    .entry(collection.clone())
                    .or_insert_with(|| Arc::new(Table::new(primary_key.clone())));
                if table.primary_key() != primary_key.as_deref() {
                    return Err(CoreError::invalid_operation(format!(
                        "collection `{collection}` is keyed by {:?}, not {:?}",
                        table.primary_key(),
                        primary_key
                    )));
                }
                Arc::make_mut(table).put(RowId::new(*row), record.clone())
            }
            LogOp::Delete { collection, row } => {
                if let Some(table) = self.tables.get_mut(collection) {
                    Arc::make_mut(table).remove(RowId::new(*row))?;
                }
                Ok(())
            }
            LogOp::Clear { collection } => {
                if let Some(table) = self.tables.get_mut(collection) {
                    Arc::make_mut(table).clear();
                }
                Ok(())
            }
        }
    }
}

/// One opened store.
pub struct Engine {
    id: StoreId,
    location: StoreLocation,
    schema_version: u64,
    encryption_key: Option<EncryptionKey>,
    state: RwLock<Arc<Snapshot>>,
    log: Mutex<CommitLog>,
    closed: AtomicBool,
}

impl Engine {
    /// Opens the store described by `config` and replays its log.
    ///
    /// This always opens a fresh engine. Handles go through the process
    /// registry instead, so that every handle for a location shares one
    /// engine.
    ///
    /// # Errors
    ///
    /// Every failure is reported as [`CoreError::StoreUnavailable`]: a
    /// missing file with `create_if_missing` off, an unreadable or corrupt
    /// log, a schema version or encryption mismatch, or a wrong key.
    pub fn open(config: &StoreConfig) -> CoreResult<Self> {
        Self::open_inner(config).map_err(|err| match err {
            err @ CoreError::StoreUnavailable { .. } => err,
            other => CoreError::store_unavailable(format!(
                "cannot open {}: {other}",
                config.location
            )),
        })
    }

    fn open_inner(config: &StoreConfig) -> CoreResult<Self> {
        let backend: Box<dyn StorageBackend> = match &config.location {
            StoreLocation::File(path) if config.create_if_missing => {
                Box::new(FileBackend::open(path)?)
            }
            StoreLocation::File(path) => Box::new(FileBackend::open_existing(path)?),
            StoreLocation::Memory(_) => Box::new(InMemoryBackend::new()),
        };
        let crypto = config.encryption_key.as_ref().map(CryptoManager::new);
        let mut log = CommitLog::new(backend, crypto, config.sync_on_commit);
        let snapshot = Self::recover(&mut log, config)?;

        let id = StoreId::allocate();
        debug!(
            store = %id,
            location = %config.location,
            sequence = snapshot.sequence.as_u64(),
            collections = snapshot.tables.len(),
            "store opened"
        );
        Ok(Self {
            id,
            location: config.location.clone(),
            schema_version: config.schema_version,
            encryption_key: config.encryption_key.clone(),
            state: RwLock::new(Arc::new(snapshot)),
            log: Mutex::new(log),
            closed: AtomicBool::new(false),
        })
    }

    /// Replays the store at `config` without keeping it open or touching
    /// its file. A torn tail is skipped, not truncated.
    ///
    /// # Errors
    ///
    /// Fails like [`Engine::open`], with [`CoreError::StoreUnavailable`].
    pub fn read_snapshot(config: &StoreConfig) -> CoreResult<Snapshot> {
        let image = match &config.location {
            StoreLocation::File(path) => FileBackend::open_existing(path)
                .and_then(|backend| backend.read_all())
                .map_err(|err| {
                    CoreError::store_unavailable(format!(
                        "cannot read {}: {err}",
                        config.location
                    ))
                })?,
            StoreLocation::Memory(_) => Vec::new(),
        };
        let crypto = config.encryption_key.as_ref().map(CryptoManager::new);
        let mut log = CommitLog::new(Box::new(InMemoryBackend::with_data(image)), crypto, false);
        Self::recover(&mut log, config)
    }

    fn recover(log: &mut CommitLog, config: &StoreConfig) -> CoreResult<Snapshot> {
        let image = log.read_all()?;
        let scan = scan_frames(&image)?;
        if let Some(torn) = &scan.torn_tail {
            warn!(
                location = %config.location,
                offset = torn.offset,
                reason = %torn.reason,
                "truncating torn tail of commit log"
            );
            log.truncate(scan.valid_len)?;
        }

        let mut frames = scan.frames.into_iter();
        let Some(first) = frames.next() else {
            log.write_header(&LogHeader {
                format_version: FORMAT_VERSION,
                schema_version: config.schema_version,
                encrypted: config.encryption_key.is_some(),
            })?;
            return Ok(Snapshot::default());
        };

        let header = decode_header(&first)?;
        if header.format_version != FORMAT_VERSION {
            return Err(CoreError::store_unavailable(format!(
                "unsupported log format version {}",
                header.format_version
            )));
        }
        if header.schema_version != config.schema_version {
            return Err(CoreError::store_unavailable(format!(
                "store has schema version {}, configuration expects {}",
                header.schema_version, config.schema_version
            )));
        }
        match (header.encrypted, config.encryption_key.is_some()) {
            (true, false) => {
                return Err(CoreError::store_unavailable(
                    "store is encrypted but no encryption key is configured",
                ))
            }
            (false, true) => {
                return Err(CoreError::store_unavailable(
                    "store is not encrypted but an encryption key is configured",
                ))
            }
            _ => {}
        }

        let mut snapshot = Snapshot::default();
        for frame in frames {
            let batch = log.decode_batch(&frame)?;
            for op in &batch.ops {
                snapshot.apply(op).map_err(|err| {
                    CoreError::store_unavailable(format!(
                        "cannot replay commit at offset {}: {err}",
                        frame.offset
                    ))
                })?;
            }
            snapshot.sequence = SequenceNumber::new(batch.sequence);
        }
        Ok(snapshot)
    }

    /// Returns this engine's process-local id.
    #[must_use]
    pub fn id(&self) -> StoreId {
        self.id
    }

    /// Returns where this store lives.
    #[must_use]
    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    /// Returns the current committed state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.state.read())
    }

    /// Returns whether a handle built for `config` may share this engine.
    pub(crate) fn accepts(&self, config: &StoreConfig) -> bool {
        self.schema_version == config.schema_version
            && self.encryption_key == config.encryption_key
    }

    /// Starts a write transaction, waiting for any other writer to finish.
    pub(crate) fn begin_write(&self) -> CoreResult<WriteTransaction<'_>> {
        let log = self.log.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::store_unavailable(format!(
                "store {} was closed",
                self.location
            )));
        }
        let working = Snapshot::clone(&self.state.read());
        Ok(WriteTransaction::new(self.id, log, &self.state, working))
    }

    /// Rejects further writes. Waits for an in-flight commit to finish.
    pub(crate) fn close(&self) {
        let _log = self.log.lock();
        self.closed.store(true, Ordering::Release);
        debug!(store = %self.id, location = %self.location, "store closed");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("schema_version", &self.schema_version)
            .finish_non_exhaustive()
    }
}
