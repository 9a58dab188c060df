// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cords: OS threads hosting one cooperative scheduler each.
//!
//! A cord owns the event loop (a current-thread tokio runtime), the
//! fiber registry, the FIFO ready queue, and the dead-fiber pool. Fibers
//! never migrate between cords; the only cross-thread surfaces are the
//! posted-wakeup queue (the loop's async event source) and the one-shot
//! on-exit slot used by [`CordHandle::cojoin`].
//!
//! # Scheduling
//!
//! The loop drains the ready queue in one pass per iteration — the
//! "schedule list" — and resumes each fiber of the batch in FIFO order.
//! Fibers woken while the batch runs land in the next batch, preserving
//! wakeup order across iterations. When both queues are empty the loop
//! parks on the async event source until a timer or a cross-thread post
//! wakes it.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

use tokio::sync::Notify;
use tracing::{debug, error};

use crate::config::FiberConfig;
use crate::error::FiberError;
use crate::fiber::{self, Fiber, FiberState, TriggerKind, FIBER_ID_MAX_RESERVED, FIBER_ID_SCHED};
use crate::trigger::TriggerAction;

pub(crate) type FiberFuture = Pin<Box<dyn Future<Output = anyhow::Result<i64>>>>;

thread_local! {
    static CURRENT: RefCell<Option<Rc<CordInner>>> = const { RefCell::new(None) };
}

/// Cross-thread wakeup surface: ids posted here are converted into
/// ordinary wakeups by the owning loop at the top of each iteration.
pub(crate) struct PostedQueue {
    ids: Mutex<Vec<u64>>,
    notify: Notify,
}

impl PostedQueue {
    fn new() -> Self {
        Self {
            ids: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    pub(crate) fn post(&self, id: u64) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        self.notify.notify_one();
    }

    fn take(&self) -> Vec<u64> {
        std::mem::take(&mut *self.ids.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn is_empty(&self) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// Waker handed to fiber futures: waking re-posts the fiber onto its
/// cord's event source, so foreign futures (timers) integrate with the
/// ready queue like any explicit wakeup.
struct FiberWaker {
    id: u64,
    posted: Arc<PostedQueue>,
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.posted.post(self.id);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.posted.post(self.id);
    }
}

/// Per-thread scheduler state.
pub(crate) struct CordInner {
    name: String,
    pub(crate) config: FiberConfig,
    fibers: RefCell<HashMap<u64, Rc<RefCell<FiberState>>>>,
    ready: RefCell<VecDeque<u64>>,
    dead: RefCell<Vec<Rc<RefCell<FiberState>>>>,
    pub(crate) posted: Arc<PostedQueue>,
    current: Cell<u64>,
    next_fid: Cell<u64>,
    stop: Rc<Cell<bool>>,
}

impl CordInner {
    fn new(name: &str, config: FiberConfig) -> Rc<Self> {
        let inner = Rc::new(Self {
            name: name.to_string(),
            config,
            fibers: RefCell::new(HashMap::new()),
            ready: RefCell::new(VecDeque::new()),
            dead: RefCell::new(Vec::new()),
            posted: Arc::new(PostedQueue::new()),
            current: Cell::new(FIBER_ID_SCHED),
            next_fid: Cell::new(FIBER_ID_MAX_RESERVED),
            stop: Rc::new(Cell::new(false)),
        });
        // The scheduler occupies the first reserved id. It has no future:
        // it is the code running between fiber resumes.
        let sched = FiberState::sched(&inner.config);
        inner
            .fibers
            .borrow_mut()
            .insert(FIBER_ID_SCHED, Rc::new(RefCell::new(sched)));
        inner
    }

    pub(crate) fn try_current() -> Option<Rc<Self>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    pub(crate) fn current() -> Rc<Self> {
        Self::try_current().expect("no cord is running on this thread")
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn current_id(&self) -> u64 {
        self.current.get()
    }

    pub(crate) fn state(&self, id: u64) -> Option<Rc<RefCell<FiberState>>> {
        self.fibers.borrow().get(&id).cloned()
    }

    pub(crate) fn current_state(&self) -> Option<Rc<RefCell<FiberState>>> {
        self.state(self.current.get())
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_fid.get() + 1;
        if id <= FIBER_ID_MAX_RESERVED {
            id = FIBER_ID_MAX_RESERVED + 1;
        }
        self.next_fid.set(id);
        id
    }

    /// Create a fiber, recycling a pooled record when the default stack
    /// size is requested and the dead pool is not empty.
    pub(crate) fn spawn(
        &self,
        name: &str,
        stack_size: Option<usize>,
        future: FiberFuture,
    ) -> Result<Fiber, FiberError> {
        let stack_size = stack_size.unwrap_or(self.config.stack_size);
        if stack_size < self.config.stack_size_min {
            return Err(FiberError::IllegalParams(
                "stack size is too small".to_string(),
            ));
        }
        let custom_stack = stack_size != self.config.stack_size;
        let recycled = if custom_stack {
            None
        } else {
            self.dead.borrow_mut().pop()
        };
        let state = match recycled {
            Some(state) => state,
            None => Rc::new(RefCell::new(FiberState::fresh(
                stack_size,
                self.config.stack_watermark,
            ))),
        };
        let id = self.next_id();
        {
            let mut st = state.borrow_mut();
            st.id = id;
            st.custom_stack = custom_stack;
            st.set_name(name);
            st.future = Some(future);
        }
        self.fibers.borrow_mut().insert(id, Rc::clone(&state));
        Ok(Fiber::from_state(id, state))
    }

    /// Move a fiber to the tail of the ready queue.
    ///
    /// No-op when the fiber is already ready or dead: a wakeup is a
    /// request to schedule, and one pending request is enough. The
    /// first enqueue of an iteration posts one event on the loop's
    /// async source so an idle loop starts a new iteration.
    pub(crate) fn wakeup(&self, id: u64) {
        let Some(fiber) = self.state(id) else {
            return;
        };
        {
            let mut st = fiber.borrow_mut();
            if st.ready || st.dead {
                return;
            }
            st.ready = true;
        }
        let mut ready = self.ready.borrow_mut();
        if ready.is_empty() {
            self.posted.notify.notify_one();
        }
        ready.push_back(id);
    }

    /// Poll a fiber's future until its next suspension point.
    pub(crate) fn resume(self: &Rc<Self>, id: u64) {
        let Some(fiber) = self.state(id) else {
            return;
        };
        let mut future = {
            let mut st = fiber.borrow_mut();
            if st.dead || !st.ready {
                return;
            }
            st.ready = false;
            st.csw += 1;
            match st.future.take() {
                Some(f) => f,
                None => return,
            }
        };
        let prev = self.current.replace(id);
        let waker = Waker::from(Arc::new(FiberWaker {
            id,
            posted: Arc::clone(&self.posted),
        }));
        let mut cx = Context::from_waker(&waker);
        let poll = future.as_mut().poll(&mut cx);
        self.current.set(prev);
        match poll {
            Poll::Pending => {
                fiber.borrow_mut().future = Some(future);
            }
            Poll::Ready(result) => self.finish(&fiber, result),
        }
    }

    /// Terminal path of a fiber: store the diagnostic, wake joiners,
    /// run `on_stop`, recycle when nobody will join.
    fn finish(self: &Rc<Self>, fiber: &Rc<RefCell<FiberState>>, result: anyhow::Result<i64>) {
        let (name, cancelled, joinable) = {
            let mut st = fiber.borrow_mut();
            match result {
                Ok(value) => {
                    st.result = value;
                    st.diag = None;
                }
                Err(err) => {
                    st.result = -1;
                    st.diag = Some(err);
                }
            }
            st.dead = true;
            st.ready = false;
            (st.name.clone(), st.cancelled, st.joinable)
        };
        let waiters: Vec<u64> = fiber.borrow_mut().wake.drain(..).collect();
        for waiter in waiters {
            self.wakeup(waiter);
        }
        fiber::run_triggers(fiber, TriggerKind::OnStop, "on_stop");
        if !joinable {
            if let Some(err) = fiber.borrow_mut().diag.take() {
                if !cancelled {
                    error!(fiber = %name, error = %err, "fiber terminated with error");
                }
            }
            self.recycle(fiber);
        }
    }

    /// Prepare a dead fiber record for reuse and pool it (default stack
    /// size) or drop it (custom stack size).
    pub(crate) fn recycle(&self, fiber: &Rc<RefCell<FiberState>>) {
        let (id, custom_stack) = {
            let mut st = fiber.borrow_mut();
            if st.id == 0 {
                // Already recycled through another handle.
                return;
            }
            debug_assert!(st.diag.is_none(), "recycling a fiber with a diagnostic");
            let id = st.id;
            let custom_stack = st.custom_stack;
            st.reset();
            st.region.recycle();
            st.id = 0;
            (id, custom_stack)
        };
        self.fibers.borrow_mut().remove(&id);
        if !custom_stack {
            self.dead.borrow_mut().push(Rc::clone(fiber));
        }
    }

    /// Number of pooled dead fibers, exposed for runtime introspection.
    pub(crate) fn dead_pool_len(&self) -> usize {
        self.dead.borrow().len()
    }

    async fn run_loop(self: &Rc<Self>) {
        loop {
            for id in self.posted.take() {
                self.wakeup(id);
            }
            let batch: Vec<u64> = self.ready.borrow_mut().drain(..).collect();
            for id in batch {
                self.resume(id);
            }
            if self.stop.get() {
                break;
            }
            if self.ready.borrow().is_empty() && self.posted.is_empty() {
                self.posted.notify.notified().await;
            }
        }
    }
}

/// Restores the thread-local cord slot even when the hosted future
/// panics out of `block_on`.
struct CordGuard;

impl Drop for CordGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.borrow_mut().take());
    }
}

/// Entry points for hosting a scheduler.
pub struct Cord;

impl Cord {
    /// Host a scheduler on the current thread and run `main_fn` as its
    /// main fiber until it terminates. Returns the main fiber's result.
    pub fn run<F>(name: &str, main_fn: F) -> anyhow::Result<i64>
    where
        F: Future<Output = anyhow::Result<i64>> + 'static,
    {
        Self::run_with_config(name, FiberConfig::default(), main_fn)
    }

    /// [`Cord::run`] with an explicit [`FiberConfig`].
    pub fn run_with_config<F>(name: &str, config: FiberConfig, main_fn: F) -> anyhow::Result<i64>
    where
        F: Future<Output = anyhow::Result<i64>> + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| FiberError::System(format!("failed to build event loop: {err}")))?;
        let inner = CordInner::new(name, config);
        let installed = CURRENT.with(|c| {
            let mut slot = c.borrow_mut();
            if slot.is_some() {
                return false;
            }
            *slot = Some(Rc::clone(&inner));
            true
        });
        if !installed {
            return Err(FiberError::IllegalParams(
                "a cord is already running on this thread".to_string(),
            )
            .into());
        }
        let _guard = CordGuard;
        debug!(cord = name, "cord started");
        let result = runtime.block_on(async {
            let main = Fiber::new("main", main_fn)?;
            main.set_joinable(true);
            let stop = Rc::clone(&inner.stop);
            main.on_stop(move || {
                stop.set(true);
                Ok(TriggerAction::Remove)
            });
            main.start();
            inner.run_loop().await;
            main.take_result(&inner)
        });
        debug!(cord = name, "cord finished");
        result
    }

    /// Name of the cord hosted by the current thread.
    pub fn name() -> String {
        CordInner::current().name().to_string()
    }
}

const EXIT_EMPTY: u8 = 0;
const EXIT_INSTALLED: u8 = 1;
const EXIT_WONT_RUN: u8 = 2;

/// One-shot on-exit slot shared between a cord's thread and at most one
/// cojoiner. The state machine resolves the race between "handler
/// installed before the thread exits" and "thread exits first": the
/// loser of the compare-exchange learns what happened.
struct ExitSlot {
    state: AtomicU8,
    handler: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ExitSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EXIT_EMPTY),
            handler: Mutex::new(None),
        }
    }

    /// Install the handler. Returns false when the thread already
    /// exited (the handler will never run).
    fn install(&self, handler: Box<dyn FnOnce() + Send>) -> bool {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        match self.state.compare_exchange(
            EXIT_EMPTY,
            EXIT_INSTALLED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(observed) => {
                debug_assert_eq!(observed, EXIT_WONT_RUN);
                self.handler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                false
            }
        }
    }

    /// Called by the exiting thread: claim the slot or run the
    /// installed handler.
    fn fire(&self) {
        let claimed = self.state.compare_exchange(
            EXIT_EMPTY,
            EXIT_WONT_RUN,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if claimed.is_err() {
            if let Some(handler) = self
                .handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                handler();
            }
        }
    }
}

/// Handle to a started cord. Dropping the handle without joining
/// detaches the thread.
pub struct CordHandle {
    name: String,
    thread: Option<std::thread::JoinHandle<anyhow::Result<i64>>>,
    on_exit: Arc<ExitSlot>,
}

impl CordHandle {
    /// The cord's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block the calling OS thread until the cord exits. Not a
    /// cooperative wait: other fibers of the calling cord (if any) do
    /// not run meanwhile.
    pub fn join(mut self) -> anyhow::Result<i64> {
        self.join_inner()
    }

    /// Cooperative join: park the calling fiber until the cord's
    /// thread is about to exit, then reap it. Other fibers of the
    /// calling cord keep running during the wait. The wait is
    /// non-cancellable; the prior cancellable state is restored on
    /// completion.
    pub async fn cojoin(mut self) -> anyhow::Result<i64> {
        let cord = CordInner::try_current().ok_or(FiberError::NoCord)?;
        let me = cord.current_id();
        let complete = Arc::new(AtomicBool::new(false));
        let handler = {
            let complete = Arc::clone(&complete);
            let posted = Arc::clone(&cord.posted);
            Box::new(move || {
                complete.store(true, Ordering::Release);
                posted.post(me);
            })
        };
        if self.on_exit.install(handler) {
            let prev = fiber::set_cancellable(false);
            while !complete.load(Ordering::Acquire) {
                fiber::yield_now().await;
            }
            fiber::set_cancellable(prev);
        }
        self.join_inner()
    }

    fn join_inner(&mut self) -> anyhow::Result<i64> {
        let handle = self
            .thread
            .take()
            .ok_or_else(|| FiberError::System("cord already joined".to_string()))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(FiberError::System(format!("cord '{}' panicked", self.name)).into()),
        }
    }
}

/// Start a new cord: an OS thread hosting its own scheduler, event
/// loop, and fiber registry, running `entry` as the main fiber.
///
/// `entry` is a factory so the future itself does not have to be
/// `Send`; it is constructed on the new thread.
pub fn start<F, Fut>(name: &str, entry: F) -> Result<CordHandle, FiberError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<i64>> + 'static,
{
    let on_exit = Arc::new(ExitSlot::new());
    let slot = Arc::clone(&on_exit);
    let thread_name = name.to_string();
    let thread = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = Cord::run(&thread_name, entry());
            // Runs after the scheduler is torn down, right before the
            // thread exits: this publishes termination to a cojoiner.
            slot.fire();
            result
        })
        .map_err(|err| FiberError::System(format!("failed to create thread: {err}")))?;
    Ok(CordHandle {
        name: name.to_string(),
        thread: Some(thread),
        on_exit,
    })
}
