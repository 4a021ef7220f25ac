//! Process-wide engine registry: one engine per store location.

use super::Engine;
use crate::config::{StoreConfig, StoreLocation};
use crate::error::{CoreError, CoreResult};
use crate::handle::writing_on_this_thread;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

fn engines() -> &'static Mutex<HashMap<StoreLocation, Arc<Engine>>> {
    static ENGINES: OnceLock<Mutex<HashMap<StoreLocation, Arc<Engine>>>> = OnceLock::new();
    ENGINES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Normalizes file paths so that `./a` and `/cwd/a` share an engine.
fn registry_key(location: &StoreLocation) -> CoreResult<StoreLocation> {
    match location {
        StoreLocation::File(path) => std::path::absolute(path)
            .map(StoreLocation::File)
            .map_err(|err| {
                CoreError::store_unavailable(format!(
                    "cannot resolve {}: {err}",
                    path.display()
                ))
            }),
        StoreLocation::Memory(_) => Ok(location.clone()),
    }
}

/// Returns the shared engine for `config`, opening it on first use.
///
/// # Errors
///
/// Returns [`CoreError::StoreUnavailable`] if the store cannot be opened,
/// or if it is already open with a different schema version or key.
pub(crate) fn acquire(config: &StoreConfig) -> CoreResult<Arc<Engine>> {
    let key = registry_key(&config.location)?;
    let mut engines = engines().lock();
    if let Some(engine) = engines.get(&key) {
        if !engine.accepts(config) {
            return Err(CoreError::store_unavailable(format!(
                "store {} is already open with a different schema version or key",
                config.location
            )));
        }
        return Ok(Arc::clone(engine));
    }

    let engine = Arc::new(Engine::open(config)?);
    engines.insert(key, Arc::clone(&engine));
    Ok(engine)
}

fn ensure_not_writing(engine: &Engine) -> CoreResult<()> {
    if writing_on_this_thread(engine.id()) {
        return Err(CoreError::reentrant_acquisition(format!(
            "cannot close {} from inside one of its write transactions",
            engine.location()
        )));
    }
    Ok(())
}

/// Closes and forgets the engine for `location`.
///
/// Handles still holding the engine keep reading their last snapshot but
/// can no longer write. The next acquisition reopens the store from its
/// log; an in-memory store starts out empty again.
///
/// # Errors
///
/// Returns [`CoreError::ReentrantAcquisition`] if this thread is inside a
/// write transaction on the store; nothing is closed then.
pub(crate) fn release(location: &StoreLocation) -> CoreResult<bool> {
    let key = registry_key(location)?;
    let engine = {
        let mut engines = engines().lock();
        if let Some(engine) = engines.get(&key) {
            ensure_not_writing(engine)?;
        }
        engines.remove(&key)
    };
    Ok(engine.map(|engine| engine.close()).is_some())
}

/// Closes every registered engine and returns how many there were.
///
/// # Errors
///
/// Returns [`CoreError::ReentrantAcquisition`] if this thread is inside a
/// write transaction on any of them; nothing is closed then.
pub(crate) fn release_all() -> CoreResult<usize> {
    let drained: Vec<_> = {
        let mut engines = engines().lock();
        for engine in engines.values() {
            ensure_not_writing(engine)?;
        }
        engines.drain().map(|(_, engine)| engine).collect()
    };
    for engine in &drained {
        engine.close();
    }
    debug!(closed = drained.len(), "released all stores");
    Ok(drained.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_location_shares_engine() {
        let config = StoreConfig::in_memory("registry-shared");
        let a = acquire(&config).unwrap();
        let b = acquire(&config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(release(&config.location).unwrap());
        assert!(!release(&config.location).unwrap());
    }

    #[test]
    fn conflicting_settings_are_rejected() {
        let config = StoreConfig::in_memory("registry-conflict").schema_version(1);
        let _engine = acquire(&config).unwrap();
        let err = acquire(&config.clone().schema_version(2)).unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable { .. }));
        release(&config.location).unwrap();
    }

    #[test]
    fn release_inside_write_is_rejected() {
        let config = StoreConfig::in_memory("registry-write-close");
        let handle = crate::handle::Handle::acquire(acquire(&config).unwrap()).unwrap();

        handle
            .write(|_| {
                assert!(matches!(
                    release(&config.location),
                    Err(CoreError::ReentrantAcquisition { .. })
                ));
                assert!(matches!(
                    release_all(),
                    Err(CoreError::ReentrantAcquisition { .. })
                ));
                Ok(())
            })
            .unwrap();

        drop(handle);
        assert!(release(&config.location).unwrap());
    }

    #[test]
    fn release_closes_engine() {
        let config = StoreConfig::in_memory("registry-close");
        let engine = acquire(&config).unwrap();
        release(&config.location).unwrap();
        assert!(engine.begin_write().is_err());

        let reopened = acquire(&config).unwrap();
        assert!(!Arc::ptr_eq(&engine, &reopened));
        assert!(reopened.begin_write().is_ok());
        release(&config.location).unwrap();
    }
}
