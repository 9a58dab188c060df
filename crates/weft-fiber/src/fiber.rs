// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fibers: cooperative units of execution.
//!
//! A fiber is a named task with its own region allocator, diagnostic
//! slot, trigger lists, and flags, scheduled cooperatively by the cord
//! that created it. Control is transferred only at suspension points:
//! [`yield_now`], [`sleep`], [`yield_timeout`], [`Fiber::join`], and the
//! cojoin wait. Everything else runs to completion without preemption.
//!
//! Cancellation is asynchronous-set, synchronous-observe: [`Fiber::cancel`]
//! marks the fiber and wakes it if it is cancellable, and the fiber
//! notices at its next suspension point or [`testcancel`] call. A fiber
//! protects a critical section by turning [`set_cancellable`] off and
//! restoring the previous value afterwards.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use crate::cord::{CordInner, FiberFuture};
use crate::error::FiberError;
use crate::region::Region;
use crate::trigger::{TriggerAction, TriggerId, TriggerList};

/// Fiber id of the scheduler itself.
pub const FIBER_ID_SCHED: u64 = 1;

/// Ids at or below this value are reserved; user fibers start above it.
pub const FIBER_ID_MAX_RESERVED: u64 = 100;

/// Longest fiber name kept; longer names are truncated.
pub const FIBER_NAME_MAX: usize = 64;

/// Which trigger list of a fiber to run.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TriggerKind {
    OnYield,
    OnStop,
}

/// Mutable record of one fiber, owned by its cord's registry and, after
/// death, by the dead pool.
pub(crate) struct FiberState {
    /// Current id; 0 between recycle and the next reuse.
    pub(crate) id: u64,
    pub(crate) name: String,
    /// Queued for execution in the ready queue.
    pub(crate) ready: bool,
    pub(crate) dead: bool,
    pub(crate) cancelled: bool,
    pub(crate) cancellable: bool,
    pub(crate) joinable: bool,
    /// Created with a non-default stack size; excluded from pooling.
    pub(crate) custom_stack: bool,
    pub(crate) future: Option<FiberFuture>,
    /// The diagnostic slot: at most one current error.
    pub(crate) diag: Option<anyhow::Error>,
    /// Return value slot, valid once dead.
    pub(crate) result: i64,
    pub(crate) region: Rc<Region>,
    /// Fibers blocked in join on this one.
    pub(crate) wake: VecDeque<u64>,
    pub(crate) on_yield: TriggerList,
    pub(crate) on_stop: TriggerList,
    /// Context switch counter; survives recycling.
    pub(crate) csw: u64,
}

impl FiberState {
    pub(crate) fn fresh(stack_size: usize, watermark: usize) -> Self {
        Self {
            id: 0,
            name: String::new(),
            ready: false,
            dead: false,
            cancelled: false,
            cancellable: true,
            joinable: false,
            custom_stack: false,
            future: None,
            diag: None,
            result: 0,
            region: Rc::new(Region::new(stack_size, watermark)),
            wake: VecDeque::new(),
            on_yield: TriggerList::default(),
            on_stop: TriggerList::default(),
            csw: 0,
        }
    }

    pub(crate) fn sched(config: &crate::config::FiberConfig) -> Self {
        let mut state = Self::fresh(config.stack_size, config.stack_watermark);
        state.id = FIBER_ID_SCHED;
        state.name = "sched".to_string();
        state
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        let mut take = name.len().min(FIBER_NAME_MAX);
        while !name.is_char_boundary(take) {
            take -= 1;
        }
        self.name.push_str(&name[..take]);
    }

    /// Reset everything that belongs to the terminated occupant.
    pub(crate) fn reset(&mut self) {
        self.name.clear();
        self.ready = false;
        self.dead = false;
        self.cancelled = false;
        self.cancellable = true;
        self.joinable = false;
        self.future = None;
        self.diag = None;
        self.result = 0;
        self.wake.clear();
        self.on_yield = TriggerList::default();
        self.on_stop = TriggerList::default();
    }

    fn triggers_mut(&mut self, kind: TriggerKind) -> &mut TriggerList {
        match kind {
            TriggerKind::OnYield => &mut self.on_yield,
            TriggerKind::OnStop => &mut self.on_stop,
        }
    }
}

/// Run one of a fiber's trigger lists. The list is detached while it
/// runs so callbacks may touch the fiber freely; registrations made
/// from inside a callback are spliced back afterwards.
pub(crate) fn run_triggers(state: &Rc<RefCell<FiberState>>, kind: TriggerKind, context: &str) {
    let mut list = {
        let mut st = state.borrow_mut();
        if st.triggers_mut(kind).is_empty() {
            return;
        }
        std::mem::take(st.triggers_mut(kind))
    };
    list.run(context);
    let mut st = state.borrow_mut();
    list.merge_back(std::mem::take(st.triggers_mut(kind)));
    *st.triggers_mut(kind) = list;
}

/// Creation attributes for a fiber.
#[derive(Debug, Clone, Default)]
pub struct FiberAttr {
    stack_size: Option<usize>,
}

impl FiberAttr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a specific region reservation. Sizes other than the
    /// cord's default mark the fiber as custom-stack, excluding it from
    /// the dead pool. Validated against the configured minimum at
    /// creation time.
    pub fn set_stack_size(&mut self, stack_size: usize) -> &mut Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }
}

/// Handle to a fiber.
///
/// Handles are cheap to clone and stay valid after the fiber dies;
/// operations on a handle whose fiber was recycled are no-ops (the
/// handle remembers the id it was created for and recognizes reuse).
#[derive(Clone)]
pub struct Fiber {
    id: u64,
    state: Rc<RefCell<FiberState>>,
}

impl Fiber {
    /// Create a fiber on the current cord. The fiber does not run until
    /// [`Fiber::start`] or a wakeup schedules it.
    ///
    /// Reuses a record from the cord's dead pool when one is available
    /// and the default stack size is used.
    pub fn new<F>(name: &str, future: F) -> Result<Self, FiberError>
    where
        F: Future<Output = anyhow::Result<i64>> + 'static,
    {
        Self::with_attr(name, &FiberAttr::default(), future)
    }

    /// [`Fiber::new`] with explicit attributes.
    pub fn with_attr<F>(name: &str, attr: &FiberAttr, future: F) -> Result<Self, FiberError>
    where
        F: Future<Output = anyhow::Result<i64>> + 'static,
    {
        let cord = CordInner::try_current().ok_or(FiberError::NoCord)?;
        cord.spawn(name, attr.stack_size, Box::pin(future))
    }

    pub(crate) fn from_state(id: u64, state: Rc<RefCell<FiberState>>) -> Self {
        Self { id, state }
    }

    /// The fiber's id, unique within its cord.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The fiber's name.
    pub fn name(&self) -> String {
        let st = self.state.borrow();
        if st.id == self.id {
            st.name.clone()
        } else {
            String::new()
        }
    }

    /// Context switches performed by this fiber record.
    pub fn csw(&self) -> u64 {
        self.state.borrow().csw
    }

    /// Whether the fiber terminated (or was recycled already).
    pub fn is_dead(&self) -> bool {
        let st = self.state.borrow();
        st.id != self.id || st.dead
    }

    /// Whether a cancellation request is pending on the fiber.
    pub fn is_cancelled(&self) -> bool {
        let st = self.state.borrow();
        st.id == self.id && st.cancelled
    }

    /// Transfer control to the fiber immediately. The creator resumes
    /// when the started fiber reaches its first suspension point or
    /// terminates.
    ///
    /// # Panics
    ///
    /// Panics when called on a thread that hosts no cord.
    pub fn start(&self) {
        let cord = CordInner::current();
        if let Some(caller) = cord.current_state() {
            run_triggers(&caller, TriggerKind::OnYield, "on_yield");
        }
        {
            let mut st = self.state.borrow_mut();
            if st.id != self.id || st.dead || st.ready {
                return;
            }
            st.ready = true;
        }
        cord.resume(self.id);
    }

    /// Move the fiber to the tail of the ready queue unless it is
    /// already scheduled or dead.
    pub fn wakeup(&self) {
        let Some(cord) = CordInner::try_current() else {
            return;
        };
        if self.state.borrow().id != self.id {
            return;
        }
        cord.wakeup(self.id);
    }

    /// Request cancellation.
    ///
    /// Asynchronous: the target observes the request at its next
    /// suspension point, and only if it is cancellable. Dead fibers are
    /// left alone so their cause of death is not lost.
    pub fn cancel(&self) {
        let Some(cord) = CordInner::try_current() else {
            return;
        };
        {
            let mut st = self.state.borrow_mut();
            if st.id != self.id || st.dead {
                return;
            }
            st.cancelled = true;
        }
        let cancellable = self.state.borrow().cancellable;
        if cord.current_id() != self.id && cancellable {
            cord.wakeup(self.id);
        }
    }

    /// Mark the fiber joinable: its record and diagnostic are held
    /// after death until some fiber consumes them with [`Fiber::join`].
    pub fn set_joinable(&self, yesno: bool) {
        let mut st = self.state.borrow_mut();
        if st.id == self.id {
            st.joinable = yesno;
        }
    }

    /// Wait until the fiber is dead and take its result, transferring
    /// the fiber's diagnostic to the caller. Recycles the fiber.
    ///
    /// Tolerates spurious wakeups: the caller re-registers on the
    /// target's wake list and checks again.
    pub async fn join(&self) -> anyhow::Result<i64> {
        let cord = CordInner::try_current().ok_or(FiberError::NoCord)?;
        {
            let st = self.state.borrow();
            if st.id != self.id || !st.joinable {
                return Err(FiberError::NotJoinable.into());
            }
        }
        let me = cord.current_id();
        if me == self.id {
            return Err(FiberError::JoinSelf.into());
        }
        loop {
            {
                let mut st = self.state.borrow_mut();
                if st.id != self.id {
                    // Someone else consumed the fiber between wakeups.
                    return Err(FiberError::NotJoinable.into());
                }
                if st.dead {
                    break;
                }
                // Re-register before parking: a spurious wakeup means
                // this turn's registration was consumed or bypassed.
                if !st.wake.contains(&me) {
                    st.wake.push_back(me);
                }
            }
            yield_now().await;
        }
        let (diag, value) = {
            let mut st = self.state.borrow_mut();
            (st.diag.take(), st.result)
        };
        cord.recycle(&self.state);
        match diag {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    /// Take the result of an already-dead fiber without yielding.
    pub(crate) fn take_result(&self, cord: &CordInner) -> anyhow::Result<i64> {
        debug_assert!(self.is_dead());
        let (diag, value) = {
            let mut st = self.state.borrow_mut();
            if st.id != self.id {
                // Consumed and recycled already (the fiber was made
                // non-joinable); the value is gone.
                return Ok(0);
            }
            (st.diag.take(), st.result)
        };
        cord.recycle(&self.state);
        match diag {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    /// Register a trigger run at every yield of this fiber.
    pub fn on_yield<F>(&self, run: F) -> TriggerId
    where
        F: FnMut() -> anyhow::Result<TriggerAction> + 'static,
    {
        self.state.borrow_mut().on_yield.add(run)
    }

    /// Register a trigger run exactly once when this fiber terminates.
    pub fn on_stop<F>(&self, run: F) -> TriggerId
    where
        F: FnMut() -> anyhow::Result<TriggerAction> + 'static,
    {
        self.state.borrow_mut().on_stop.add(run)
    }

    /// Unregister an `on_yield` trigger.
    pub fn clear_on_yield(&self, id: TriggerId) {
        self.state.borrow_mut().on_yield.clear(id);
    }

    /// Unregister an `on_stop` trigger.
    pub fn clear_on_stop(&self, id: TriggerId) {
        self.state.borrow_mut().on_stop.clear(id);
    }

    /// The fiber's region allocator.
    pub fn region(&self) -> Rc<Region> {
        Rc::clone(&self.state.borrow().region)
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("dead", &self.is_dead())
            .finish()
    }
}

/// Handle to the currently running fiber.
///
/// # Panics
///
/// Panics outside of a cord.
pub fn current() -> Fiber {
    let cord = CordInner::current();
    let id = cord.current_id();
    let state = cord.current_state().expect("current fiber not registered");
    Fiber::from_state(id, state)
}

/// Look a live fiber up by id. Reserved ids resolve to nothing.
pub fn find(id: u64) -> Option<Fiber> {
    if id <= FIBER_ID_MAX_RESERVED {
        return None;
    }
    let cord = CordInner::try_current()?;
    let state = cord.state(id)?;
    Some(Fiber::from_state(id, state))
}

/// Return control to the scheduler until some wakeup reschedules the
/// calling fiber. Runs the fiber's `on_yield` triggers first.
pub async fn yield_now() {
    let cord = CordInner::current();
    if let Some(me) = cord.current_state() {
        run_triggers(&me, TriggerKind::OnYield, "on_yield");
    }
    let mut parked = false;
    std::future::poll_fn(move |_cx| {
        if parked {
            Poll::Ready(())
        } else {
            parked = true;
            Poll::Pending
        }
    })
    .await
}

/// Yield with a one-shot timer. Returns true when the timer fired and
/// false when an explicit wakeup arrived first (the timer is stopped).
pub async fn yield_timeout(delay: Duration) -> bool {
    let cord = CordInner::current();
    if let Some(me) = cord.current_state() {
        run_triggers(&me, TriggerKind::OnYield, "on_yield");
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    let mut parked = false;
    let mut fired = false;
    std::future::poll_fn(move |cx| {
        if !parked {
            parked = true;
            if sleep.as_mut().poll(cx).is_ready() {
                // Zero or already-elapsed delay: still go through one
                // loop iteration instead of completing inline.
                fired = true;
                cx.waker().wake_by_ref();
            }
            return Poll::Pending;
        }
        if fired {
            return Poll::Ready(true);
        }
        Poll::Ready(sleep.as_mut().poll(cx).is_ready())
    })
    .await
}

/// Yield for at least `delay`. A zero delay forces exactly one trip
/// through the event loop, giving timers and posted wakeups a chance to
/// run. An explicit wakeup (cancellation included) ends the sleep early.
pub async fn sleep(delay: Duration) {
    let _ = yield_timeout(delay).await;
}

/// Move the calling fiber to the tail of the ready queue and yield:
/// equivalent to a self-wakeup followed by [`yield_now`].
pub async fn reschedule() {
    let cord = CordInner::current();
    cord.wakeup(cord.current_id());
    yield_now().await;
}

/// Change the current fiber's cancellable flag, returning the previous
/// value. Not a cancellation point.
pub fn set_cancellable(yesno: bool) -> bool {
    let cord = CordInner::current();
    let state = cord.current_state().expect("current fiber not registered");
    let mut st = state.borrow_mut();
    let prev = st.cancellable;
    st.cancellable = yesno;
    prev
}

/// Whether a cancellation request is pending on the current fiber.
pub fn is_cancelled() -> bool {
    let cord = CordInner::current();
    cord.current_state()
        .map(|state| state.borrow().cancelled)
        .unwrap_or(false)
}

/// Fail with [`FiberError::Cancelled`] when the current fiber has a
/// pending cancellation request.
pub fn testcancel() -> Result<(), FiberError> {
    if is_cancelled() {
        return Err(FiberError::Cancelled);
    }
    Ok(())
}

/// Rename the current fiber.
pub fn set_name(name: &str) {
    let cord = CordInner::current();
    if let Some(state) = cord.current_state() {
        state.borrow_mut().set_name(name);
    }
}

/// The current fiber's region allocator.
pub fn region() -> Rc<Region> {
    let cord = CordInner::current();
    let state = cord.current_state().expect("current fiber not registered");
    let region = Rc::clone(&state.borrow().region);
    region
}

/// Number of recycled fibers waiting in the current cord's dead pool.
pub fn dead_pool_len() -> usize {
    CordInner::current().dead_pool_len()
}
