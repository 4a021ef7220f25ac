//! The origin side of async calls.

use super::AsyncCall;
use crate::error::CoreResult;
use crate::types::CallId;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// A finished call on its way back to the origin loop.
pub(crate) struct Completion {
    call: CallId,
    outcome: Box<dyn Any + Send>,
}

impl Completion {
    pub(crate) fn new(call: CallId, outcome: Box<dyn Any + Send>) -> Self {
        Self { call, outcome }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

/// Carries completions from background threads to an origin context.
pub(crate) trait Dispatcher: Send + Sync {
    /// Hands `completion` to its origin. Returns `false` if the origin is
    /// gone and the completion was dropped.
    fn dispatch(&self, completion: Completion) -> bool;
}

struct LoopDispatcher {
    sender: Sender<Completion>,
}

impl Dispatcher for LoopDispatcher {
    fn dispatch(&self, completion: Completion) -> bool {
        self.sender.send(completion).is_ok()
    }
}

type Deliver = Box<dyn FnOnce(Box<dyn Any + Send>)>;

/// An execution context that receives async completions.
///
/// The thread that owns a `MainLoop` is the origin of every call submitted
/// with it. Callbacks are kept here, never sent to another thread, and run
/// only from [`run_pending`](Self::run_pending),
/// [`wait_for`](Self::wait_for) or [`run_until_idle`](Self::run_until_idle)
/// on the owning thread. They may therefore capture `!Send` state.
pub struct MainLoop {
    dispatcher: Arc<LoopDispatcher>,
    receiver: Receiver<Completion>,
    pending: RefCell<HashMap<CallId, (AsyncCall, Deliver)>>,
    _thread_bound: PhantomData<*const ()>,
}

impl MainLoop {
    /// Creates a loop owned by the current thread.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            dispatcher: Arc::new(LoopDispatcher { sender }),
            receiver,
            pending: RefCell::new(HashMap::new()),
            _thread_bound: PhantomData,
        }
    }

    /// Returns a dispatcher that posts completions to this loop.
    #[must_use]
    pub(crate) fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.clone()
    }

    /// Returns how many callbacks are still waiting for delivery.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.borrow().len()
    }

    pub(crate) fn register<R: 'static>(
        &self,
        call: &AsyncCall,
        callback: impl FnOnce(CoreResult<R>) + 'static,
    ) {
        let id = call.id();
        let deliver: Deliver = Box::new(move |outcome| {
            match outcome.downcast::<CoreResult<R>>() {
                Ok(outcome) => callback(*outcome),
                Err(_) => error!(call = %id, "completion carried an unexpected outcome type"),
            }
        });
        self.pending.borrow_mut().insert(id, (call.clone(), deliver));
    }

    fn deliver(&self, completion: Completion) -> bool {
        let entry = self.pending.borrow_mut().remove(&completion.call);
        let Some((call, callback)) = entry else {
            warn!(call = %completion.call, "completion for an unknown or delivered call");
            return false;
        };
        call.mark_delivered();
        trace!(call = %completion.call, state = ?call.state(), "delivering");
        callback(completion.outcome);
        true
    }

    /// Delivers every completion that has already arrived, without
    /// blocking. Returns how many callbacks ran.
    pub fn run_pending(&self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            if self.deliver(completion) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Delivers completions until `call`'s callback has run or `timeout`
    /// elapses. Other calls completing meanwhile are delivered too.
    ///
    /// Returns whether `call` was delivered.
    pub fn wait_for(&self, call: &AsyncCall, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !call.is_delivered() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    self.deliver(completion);
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    return call.is_delivered();
                }
            }
        }
        true
    }

    /// Delivers completions until no callback is pending or `timeout`
    /// elapses. Returns whether the loop went idle.
    pub fn run_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending_calls() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(completion) => {
                    self.deliver(completion);
                }
                Err(_) => return self.pending_calls() == 0,
            }
        }
        true
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MainLoop {
    fn drop(&mut self) {
        let abandoned = self.pending.get_mut().len();
        if abandoned > 0 {
            warn!(abandoned, "main loop dropped with undelivered calls");
        }
    }
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop")
            .field("pending", &self.pending_calls())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::cell::Cell;
    use std::rc::Rc;

    fn post<R: Send + 'static>(main_loop: &MainLoop, call: &AsyncCall, outcome: CoreResult<R>) {
        main_loop
            .dispatcher()
            .dispatch(Completion::new(call.id(), Box::new(outcome)));
    }

    #[test]
    fn callback_runs_once_on_owner_thread() {
        let main_loop = MainLoop::new();
        let call = AsyncCall::new();
        let hits = Rc::new(Cell::new(0));
        let seen = Rc::clone(&hits);
        main_loop.register(&call, move |outcome: CoreResult<i32>| {
            assert_eq!(outcome.unwrap(), 7);
            seen.set(seen.get() + 1);
        });

        post(&main_loop, &call, Ok::<_, CoreError>(7));
        post(&main_loop, &call, Ok::<_, CoreError>(8));
        assert_eq!(main_loop.run_pending(), 1);
        assert_eq!(hits.get(), 1);
        assert!(call.is_delivered());
        assert_eq!(main_loop.pending_calls(), 0);
    }

    #[test]
    fn wait_for_times_out_without_completion() {
        let main_loop = MainLoop::new();
        let call = AsyncCall::new();
        main_loop.register(&call, |_: CoreResult<()>| {});
        assert!(!main_loop.wait_for(&call, Duration::from_millis(20)));
        assert!(!main_loop.run_until_idle(Duration::from_millis(20)));
    }

    #[test]
    fn completions_cross_threads() {
        let main_loop = MainLoop::new();
        let call = AsyncCall::new();
        let got = Rc::new(Cell::new(None));
        let slot = Rc::clone(&got);
        main_loop.register(&call, move |outcome: CoreResult<u64>| slot.set(outcome.ok()));

        let dispatcher = main_loop.dispatcher();
        let id = call.id();
        std::thread::spawn(move || {
            dispatcher.dispatch(Completion::new(id, Box::new(Ok::<u64, CoreError>(42))));
        });
        assert!(main_loop.wait_for(&call, Duration::from_secs(5)));
        assert_eq!(got.get(), Some(42));
    }

    #[test]
    fn dispatch_to_dropped_loop_reports_failure() {
        let main_loop = MainLoop::new();
        let dispatcher = main_loop.dispatcher();
        drop(main_loop);
        let call = AsyncCall::new();
        assert!(!dispatcher.dispatch(Completion::new(call.id(), Box::new(()))));
    }
}
