//! Async completion coordinator.
//!
//! An async call runs its synchronous counterpart on a [`BackgroundPool`]
//! thread, with a handle opened on that thread, and posts the outcome back
//! to the [`MainLoop`] it was submitted from. The loop runs the callback on
//! its own thread exactly once, whether the work succeeded, failed or
//! panicked.
//!
//! ```text
//! Pending --> Executing --> Completed
//!                      \--> Failed
//! ```

mod main_loop;
mod pool;

pub use main_loop::MainLoop;
pub(crate) use main_loop::{Completion, Dispatcher};
pub use pool::BackgroundPool;

use crate::context::StoreContext;
use crate::error::{CoreError, CoreResult};
use crate::handle::Handle;
use crate::types::CallId;
use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Lifecycle of an async call.
///
/// Every call passes through `Executing`, including calls whose outcome is
/// known up front and calls abandoned by a shutting-down pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallState {
    /// Submitted, not yet picked up by the pool.
    Pending = 0,
    /// Running on a background thread.
    Executing = 1,
    /// Finished with a value.
    Completed = 2,
    /// Finished with an error.
    Failed = 3,
}

impl CallState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CallState::Pending,
            1 => CallState::Executing,
            2 => CallState::Completed,
            _ => CallState::Failed,
        }
    }
}

#[derive(Debug)]
struct CallShared {
    state: AtomicU8,
    delivered: AtomicBool,
}

/// Observes one submitted async call.
#[derive(Debug, Clone)]
pub struct AsyncCall {
    id: CallId,
    shared: Arc<CallShared>,
}

impl AsyncCall {
    pub(crate) fn new() -> Self {
        Self {
            id: CallId::allocate(),
            shared: Arc::new(CallShared {
                state: AtomicU8::new(CallState::Pending as u8),
                delivered: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the call id.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CallState {
        CallState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Returns whether the work has finished, successfully or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state(), CallState::Completed | CallState::Failed)
    }

    /// Returns whether the callback has been run.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.shared.delivered.load(Ordering::Acquire)
    }

    fn set_state(&self, state: CallState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn mark_delivered(&self) {
        self.shared.delivered.store(true, Ordering::Release);
    }
}

/// The background side of one call. Posts exactly one outcome: the
/// work's result, or [`CoreError::ExecutorShutdown`] if dropped unsent.
struct Reply<R: Send + 'static> {
    call: AsyncCall,
    dispatcher: Arc<dyn Dispatcher>,
    sent: bool,
    _outcome: PhantomData<fn(R)>,
}

impl<R: Send + 'static> Reply<R> {
    fn new(call: AsyncCall, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            call,
            dispatcher,
            sent: false,
            _outcome: PhantomData,
        }
    }

    fn send(mut self, outcome: CoreResult<R>) {
        self.post(outcome);
    }

    fn post(&mut self, outcome: CoreResult<R>) {
        debug_assert_eq!(
            self.call.state(),
            CallState::Executing,
            "outcome posted for a call that never started executing"
        );
        self.sent = true;
        let state = if outcome.is_ok() {
            CallState::Completed
        } else {
            CallState::Failed
        };
        self.call.set_state(state);
        let id = self.call.id();
        if !self.dispatcher.dispatch(Completion::new(id, Box::new(outcome))) {
            warn!(call = %id, ?state, "origin loop is gone; outcome dropped");
        }
    }
}

impl<R: Send + 'static> Drop for Reply<R> {
    fn drop(&mut self) {
        if !self.sent {
            self.call.set_state(CallState::Executing);
            self.post(Err(CoreError::ExecutorShutdown));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Runs `work` in the background and delivers its outcome to `callback`
/// on `origin`.
pub(crate) fn submit<R, W, C>(
    context: &StoreContext,
    origin: &MainLoop,
    work: W,
    callback: C,
) -> AsyncCall
where
    R: Send + 'static,
    W: FnOnce(&Handle) -> CoreResult<R> + Send + 'static,
    C: FnOnce(CoreResult<R>) + 'static,
{
    let call = AsyncCall::new();
    origin.register(&call, callback);
    let reply = Reply::<R>::new(call.clone(), origin.dispatcher());
    let provider = context.provider().clone();
    debug!(call = %call.id(), location = %provider.config().location, "async call submitted");

    let job = move || {
        reply.call.set_state(CallState::Executing);
        trace!(call = %reply.call.id(), "async call executing");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| provider.with_handle(work)))
            .unwrap_or_else(|payload| {
                Err(CoreError::task_panicked(panic_message(payload.as_ref())))
            });
        reply.send(outcome);
    };
    if let Err(err) = context.pool().execute(job) {
        warn!(call = %call.id(), error = %err, "could not queue async call");
    }
    call
}

/// Delivers an outcome that is already known without touching the pool,
/// through the same path as background results.
pub(crate) fn resolve<R, C>(origin: &MainLoop, outcome: CoreResult<R>, callback: C) -> AsyncCall
where
    R: Send + 'static,
    C: FnOnce(CoreResult<R>) + 'static,
{
    let call = AsyncCall::new();
    origin.register(&call, callback);
    call.set_state(CallState::Executing);
    Reply::<R>::new(call.clone(), origin.dispatcher()).send(outcome);
    call
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn context(name: &str) -> StoreContext {
        StoreContext::new(StoreConfig::in_memory(name).background_threads(2)).unwrap()
    }

    #[test]
    fn success_moves_through_states() {
        let ctx = context("coord-success");
        let main_loop = MainLoop::new();
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);

        let call = submit(&ctx, &main_loop, |_| Ok(5_u32), move |outcome| {
            *slot.borrow_mut() = Some(outcome.unwrap());
        });
        assert!(main_loop.wait_for(&call, Duration::from_secs(5)));
        assert_eq!(call.state(), CallState::Completed);
        assert!(call.is_finished());
        assert_eq!(*result.borrow(), Some(5));
    }

    #[test]
    fn panic_becomes_failure() {
        let ctx = context("coord-panic");
        let main_loop = MainLoop::new();
        let result = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&result);

        let call = submit(
            &ctx,
            &main_loop,
            |_| -> CoreResult<()> { panic!("worker exploded") },
            move |outcome| *slot.borrow_mut() = Some(outcome),
        );
        assert!(main_loop.wait_for(&call, Duration::from_secs(5)));
        assert_eq!(call.state(), CallState::Failed);
        let outcome = result.borrow_mut().take().unwrap();
        match outcome {
            Err(CoreError::TaskPanicked { message }) => assert_eq!(message, "worker exploded"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn resolved_calls_deliver_through_the_loop() {
        let main_loop = MainLoop::new();
        let hits = Rc::new(RefCell::new(0));
        let seen = Rc::clone(&hits);
        let call = resolve(
            &main_loop,
            Err::<(), _>(CoreError::invalid_operation("no key")),
            move |outcome| {
                assert!(outcome.is_err());
                *seen.borrow_mut() += 1;
            },
        );
        assert!(!call.is_delivered());
        assert_eq!(call.state(), CallState::Failed);
        assert!(call.is_finished());
        assert_eq!(main_loop.run_pending(), 1);
        assert!(call.is_delivered());
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn dropped_reply_reports_shutdown() {
        let main_loop = MainLoop::new();
        let call = AsyncCall::new();
        let got = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&got);
        main_loop.register(&call, move |outcome: CoreResult<()>| {
            *slot.borrow_mut() = Some(outcome);
        });
        drop(Reply::<()>::new(call.clone(), main_loop.dispatcher()));
        main_loop.run_pending();
        assert!(matches!(
            got.borrow_mut().take(),
            Some(Err(CoreError::ExecutorShutdown))
        ));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "never started executing")]
    fn posting_without_executing_is_a_bug() {
        let main_loop = MainLoop::new();
        let call = AsyncCall::new();
        main_loop.register(&call, |_: CoreResult<()>| {});
        Reply::<()>::new(call, main_loop.dispatcher()).send(Ok(()));
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&7_u8), "non-string panic payload");
    }
}
