//! Store contexts and the process-wide default configuration.
//!
//! A [`StoreContext`] is the entry point for every operation: it carries
//! the [`StoreConfig`] that locates the store and the background pool used
//! by async calls. Contexts are cheap to clone and may be sent across
//! threads; the handles they open may not.
//!
//! ```rust,ignore
//! configure(StoreConfig::file("data/app.mslog"));
//! let ctx = StoreContext::global()?;
//! person.save(&ctx)?;
//! teardown()?;
//! ```

use crate::config::{StoreConfig, StoreLocation};
use crate::coordinator::BackgroundPool;
use crate::engine::registry;
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::debug;

static DEFAULT_CONFIG: RwLock<Option<StoreConfig>> = parking_lot::const_rwlock(None);
static SHARED_POOL: Mutex<Option<Arc<BackgroundPool>>> = parking_lot::const_mutex(None);

/// Sets the process-wide default store used by [`StoreContext::global`].
pub fn configure(config: StoreConfig) {
    debug!(location = %config.location, "default store configured");
    *DEFAULT_CONFIG.write() = Some(config);
}

/// Returns the process-wide default store configuration, if set.
#[must_use]
pub fn default_config() -> Option<StoreConfig> {
    DEFAULT_CONFIG.read().clone()
}

/// Clears the default configuration and closes every open store.
///
/// Handles that are still alive keep their last snapshot but can no longer
/// write. In-memory stores lose their contents. Returns how many stores
/// were closed.
///
/// # Errors
///
/// Returns [`CoreError::ReentrantAcquisition`] when called from inside a
/// write transaction; nothing is closed and the default stays set.
pub fn teardown() -> CoreResult<usize> {
    let closed = registry::release_all()?;
    DEFAULT_CONFIG.write().take();
    debug!(closed, "store configuration torn down");
    Ok(closed)
}

fn shared_pool(threads: usize) -> CoreResult<Arc<BackgroundPool>> {
    let mut shared = SHARED_POOL.lock();
    if let Some(pool) = shared.as_ref() {
        return Ok(Arc::clone(pool));
    }
    let pool = Arc::new(BackgroundPool::new(threads)?);
    *shared = Some(Arc::clone(&pool));
    Ok(pool)
}

/// Opens handles for one store configuration.
///
/// Background jobs carry this instead of a whole context, so they never
/// hold the pool they run on.
#[derive(Debug, Clone)]
pub(crate) struct HandleProvider {
    config: StoreConfig,
}

impl HandleProvider {
    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn open(&self) -> CoreResult<Handle> {
        Handle::acquire(registry::acquire(&self.config)?)
    }

    pub(crate) fn with_handle<T>(
        &self,
        body: impl FnOnce(&Handle) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let handle = self.open()?;
        body(&handle)
    }
}

/// Configuration plus background executor for store operations.
#[derive(Debug, Clone)]
pub struct StoreContext {
    provider: HandleProvider,
    pool: Arc<BackgroundPool>,
}

impl StoreContext {
    /// Creates a context with its own background pool.
    ///
    /// # Errors
    ///
    /// Fails if the pool's threads cannot be started.
    pub fn new(config: StoreConfig) -> CoreResult<Self> {
        let pool = Arc::new(BackgroundPool::new(config.background_threads)?);
        Ok(Self {
            provider: HandleProvider { config },
            pool,
        })
    }

    /// Creates a context for the default store set with [`configure`].
    ///
    /// Global contexts share one background pool for the life of the
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if nothing is configured.
    pub fn global() -> CoreResult<Self> {
        let config = default_config().ok_or_else(|| {
            CoreError::store_unavailable("no default store configured; call configure() first")
        })?;
        let pool = shared_pool(config.background_threads)?;
        Ok(Self {
            provider: HandleProvider { config },
            pool,
        })
    }

    /// Returns a context for another store that shares this one's pool.
    #[must_use]
    pub fn with_config(&self, config: StoreConfig) -> Self {
        Self {
            provider: HandleProvider { config },
            pool: Arc::clone(&self.pool),
        }
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        self.provider.config()
    }

    /// Returns the store location.
    #[must_use]
    pub fn location(&self) -> &StoreLocation {
        &self.provider.config().location
    }

    /// Opens a handle, runs `body` with it and releases it on every exit
    /// path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreUnavailable`] if the store cannot be
    /// opened, [`CoreError::ReentrantAcquisition`] if this thread already
    /// holds a handle for the store, or whatever `body` returns.
    pub fn with_handle<T>(&self, body: impl FnOnce(&Handle) -> CoreResult<T>) -> CoreResult<T> {
        self.provider.with_handle(body)
    }

    /// Opens a handle that stays open until dropped.
    ///
    /// Use a session to keep [`Results`](crate::Results) views or run
    /// several operations against one handle.
    pub fn session(&self) -> CoreResult<Handle> {
        self.provider.open()
    }

    /// Closes this context's store. The next operation reopens it; an
    /// in-memory store starts out empty. Returns whether it was open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReentrantAcquisition`] when called from inside a
    /// write transaction on this store.
    pub fn close(&self) -> CoreResult<bool> {
        registry::release(self.location())
    }

    /// Closes the store and deletes its file. In-memory stores are only
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn destroy(&self) -> CoreResult<()> {
        self.close()?;
        if let StoreLocation::File(path) = self.location() {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "store file removed"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub(crate) fn provider(&self) -> &HandleProvider {
        &self.provider
    }

    pub(crate) fn pool(&self) -> &BackgroundPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn with_handle_releases_on_error() {
        let ctx = StoreContext::new(StoreConfig::in_memory("ctx-release")).unwrap();
        let result: CoreResult<()> =
            ctx.with_handle(|_| Err(CoreError::invalid_operation("stop")));
        assert!(result.is_err());
        assert!(ctx.with_handle(|_| Ok(())).is_ok());
    }

    #[test]
    fn nested_acquisition_is_rejected() {
        let ctx = StoreContext::new(StoreConfig::in_memory("ctx-nested")).unwrap();
        let result = ctx.with_handle(|_| ctx.with_handle(|_| Ok(())));
        assert!(matches!(
            result,
            Err(CoreError::ReentrantAcquisition { .. })
        ));
    }

    #[test]
    fn different_stores_nest_fine() {
        let ctx = StoreContext::new(StoreConfig::in_memory("ctx-outer")).unwrap();
        let other = ctx.with_config(StoreConfig::in_memory("ctx-inner"));
        assert!(ctx.with_handle(|_| other.with_handle(|_| Ok(()))).is_ok());
    }

    #[test]
    fn session_holds_until_dropped() {
        let ctx = StoreContext::new(StoreConfig::in_memory("ctx-session")).unwrap();
        let session = ctx.session().unwrap();
        assert!(ctx.session().is_err());
        drop(session);
        assert!(ctx.session().is_ok());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let ctx = StoreContext::new(
            StoreConfig::file(dir.path().join("none.mslog")).create_if_missing(false),
        )
        .unwrap();
        assert!(matches!(
            ctx.with_handle(|_| Ok(())),
            Err(CoreError::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn destroy_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.mslog");
        let ctx = StoreContext::new(StoreConfig::file(&path)).unwrap();
        ctx.with_handle(|_| Ok(())).unwrap();
        assert!(path.exists());
        ctx.destroy().unwrap();
        assert!(!path.exists());
        ctx.destroy().unwrap();
    }
}
