//! Persistence methods available on every [`Persistable`] type.
//!
//! Synchronous methods open a handle for the duration of the call and
//! return owned values. The `_async` variants return immediately with an
//! [`AsyncCall`]; the callback later runs on the thread that owns the
//! given [`MainLoop`], exactly once, with either the result or the error.
//!
//! ```rust,ignore
//! let ctx = StoreContext::new(StoreConfig::file("app.mslog"))?;
//! Person { id: 1, name: "Ada".into() }.save(&ctx)?;
//!
//! let adults = Person::find_where(&ctx, Predicate::ge("age", 18))?;
//!
//! let main_loop = MainLoop::new();
//! let call = Person::first_item_async(&ctx, &main_loop, |first| {
//!     println!("{first:?}");
//! });
//! main_loop.wait_for(&call, Duration::from_secs(1));
//! ```

use crate::context::StoreContext;
use crate::coordinator::{resolve, submit, AsyncCall, MainLoop};
use crate::entity::Persistable;
use crate::error::CoreResult;
use crate::predicate::Query;
use crate::{mutation, query};

/// Store operations for [`Persistable`] types.
///
/// Implemented for every `Persistable`; import it to call the methods.
pub trait PersistableExt: Persistable {
    /// Inserts this entity. See [`mutation::create`].
    fn create(&self, ctx: &StoreContext) -> CoreResult<()> {
        ctx.with_handle(|handle| mutation::create(handle, self).map(drop))
    }

    /// Inserts or replaces this entity by primary key. See
    /// [`mutation::create_or_update`].
    fn create_or_update(&self, ctx: &StoreContext) -> CoreResult<()> {
        ctx.with_handle(|handle| mutation::create_or_update(handle, self).map(drop))
    }

    /// Upserts when the type has a primary key, inserts otherwise.
    fn save(&self, ctx: &StoreContext) -> CoreResult<()> {
        ctx.with_handle(|handle| mutation::save(handle, self).map(drop))
    }

    /// Saves all `entities` atomically.
    fn save_all(ctx: &StoreContext, entities: &[Self]) -> CoreResult<usize> {
        ctx.with_handle(|handle| mutation::save_all(handle, entities))
    }

    /// Removes every stored entity of this type.
    fn delete_all(ctx: &StoreContext) -> CoreResult<usize> {
        ctx.with_handle(mutation::delete_all::<Self>)
    }

    /// Removes the entities matching `query`.
    fn delete_where(ctx: &StoreContext, query: impl Into<Query>) -> CoreResult<usize> {
        let query = query.into();
        ctx.with_handle(|handle| mutation::delete_where::<Self>(handle, &query))
    }

    /// Returns the earliest stored entity.
    fn first_item(ctx: &StoreContext) -> CoreResult<Option<Self>> {
        ctx.with_handle(query::first_item::<Self>)
    }

    /// Returns the latest stored entity.
    fn last_item(ctx: &StoreContext) -> CoreResult<Option<Self>> {
        ctx.with_handle(query::last_item::<Self>)
    }

    /// Returns every stored entity in insertion order.
    fn all_items(ctx: &StoreContext) -> CoreResult<Vec<Self>> {
        ctx.with_handle(query::all_items::<Self>)
    }

    /// Returns the entities matching `query`.
    fn find_where(ctx: &StoreContext, query: impl Into<Query>) -> CoreResult<Vec<Self>> {
        let query = query.into();
        ctx.with_handle(|handle| query::find_where::<Self>(handle, &query))
    }

    /// Returns the first entity matching `query`.
    fn first_where(ctx: &StoreContext, query: impl Into<Query>) -> CoreResult<Option<Self>> {
        let query = query.into();
        ctx.with_handle(|handle| query::first_where::<Self>(handle, &query))
    }

    /// Returns the last entity matching `query`.
    fn last_where(ctx: &StoreContext, query: impl Into<Query>) -> CoreResult<Option<Self>> {
        let query = query.into();
        ctx.with_handle(|handle| query::last_where::<Self>(handle, &query))
    }

    /// Returns how many entities are stored.
    fn count(ctx: &StoreContext) -> CoreResult<usize> {
        ctx.with_handle(query::count::<Self>)
    }

    /// Returns how many entities match `query`.
    fn count_where(ctx: &StoreContext, query: impl Into<Query>) -> CoreResult<usize> {
        let query = query.into();
        ctx.with_handle(|handle| query::count_where::<Self>(handle, &query))
    }

    /// Background [`create`](Self::create).
    fn create_async(
        self,
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<()>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        submit(
            ctx,
            origin,
            move |handle| mutation::create(handle, &self).map(drop),
            callback,
        )
    }

    /// Background [`create_or_update`](Self::create_or_update).
    ///
    /// A type without a primary key fails through `callback`, like every
    /// other error, without queuing any work.
    fn create_or_update_async(
        self,
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<()>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        if let Err(err) = Self::descriptor().require_primary_key() {
            return resolve(origin, Err(err), callback);
        }
        submit(
            ctx,
            origin,
            move |handle| mutation::create_or_update(handle, &self).map(drop),
            callback,
        )
    }

    /// Background [`save`](Self::save).
    fn save_async(
        self,
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<()>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        submit(
            ctx,
            origin,
            move |handle| mutation::save(handle, &self).map(drop),
            callback,
        )
    }

    /// Background [`save_all`](Self::save_all).
    fn save_all_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        entities: Vec<Self>,
        callback: impl FnOnce(CoreResult<usize>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        submit(
            ctx,
            origin,
            move |handle| mutation::save_all(handle, &entities),
            callback,
        )
    }

    /// Background [`delete_all`](Self::delete_all).
    fn delete_all_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<usize>) + 'static,
    ) -> AsyncCall
    where
        Self: 'static,
    {
        submit(ctx, origin, mutation::delete_all::<Self>, callback)
    }

    /// Background [`delete_where`](Self::delete_where).
    fn delete_where_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        query: impl Into<Query>,
        callback: impl FnOnce(CoreResult<usize>) + 'static,
    ) -> AsyncCall
    where
        Self: 'static,
    {
        let query = query.into();
        submit(
            ctx,
            origin,
            move |handle| mutation::delete_where::<Self>(handle, &query),
            callback,
        )
    }

    /// Background [`first_item`](Self::first_item).
    fn first_item_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<Option<Self>>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        submit(ctx, origin, query::first_item::<Self>, callback)
    }

    /// Background [`last_item`](Self::last_item).
    fn last_item_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<Option<Self>>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        submit(ctx, origin, query::last_item::<Self>, callback)
    }

    /// Background [`all_items`](Self::all_items).
    fn all_items_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<Vec<Self>>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        submit(ctx, origin, query::all_items::<Self>, callback)
    }

    /// Background [`find_where`](Self::find_where).
    fn find_where_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        query: impl Into<Query>,
        callback: impl FnOnce(CoreResult<Vec<Self>>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        let query = query.into();
        submit(
            ctx,
            origin,
            move |handle| query::find_where::<Self>(handle, &query),
            callback,
        )
    }

    /// Background [`first_where`](Self::first_where).
    fn first_where_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        query: impl Into<Query>,
        callback: impl FnOnce(CoreResult<Option<Self>>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        let query = query.into();
        submit(
            ctx,
            origin,
            move |handle| query::first_where::<Self>(handle, &query),
            callback,
        )
    }

    /// Background [`last_where`](Self::last_where).
    fn last_where_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        query: impl Into<Query>,
        callback: impl FnOnce(CoreResult<Option<Self>>) + 'static,
    ) -> AsyncCall
    where
        Self: Send + 'static,
    {
        let query = query.into();
        submit(
            ctx,
            origin,
            move |handle| query::last_where::<Self>(handle, &query),
            callback,
        )
    }

    /// Background [`count`](Self::count).
    fn count_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        callback: impl FnOnce(CoreResult<usize>) + 'static,
    ) -> AsyncCall
    where
        Self: 'static,
    {
        submit(ctx, origin, query::count::<Self>, callback)
    }

    /// Background [`count_where`](Self::count_where).
    fn count_where_async(
        ctx: &StoreContext,
        origin: &MainLoop,
        query: impl Into<Query>,
        callback: impl FnOnce(CoreResult<usize>) + 'static,
    ) -> AsyncCall
    where
        Self: 'static,
    {
        let query = query.into();
        submit(
            ctx,
            origin,
            move |handle| query::count_where::<Self>(handle, &query),
            callback,
        )
    }
}

impl<T: Persistable> PersistableExt for T {}
