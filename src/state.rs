//! Observable state cells.
//!
//! A [`State`] holds one value and notifies listeners with `(old, new)` whenever the value is
//! replaced by one its [`MutationPolicy`] does not consider equivalent. Each accepted mutation
//! is bracketed by begin and end hooks.
//!
//! # Invariants
//! 1. Listeners run in registration order, and all of them finish before `set` returns.
//! 2. Setting an equivalent value is a no-op: no version bump, no hooks, no listeners.
//! 3. `version` increments exactly once per accepted mutation.
//! 4. A `set` issued from inside the state's own dispatch is rejected; a `schedule`d value is
//!    applied once the current dispatch has finished.
//! 5. Dropping a [`Subscription`] removes its callback before the next dispatch.
//! 6. A thread that is dispatching never blocks on another state's dispatch lock. Writes from a
//!    listener to a state another thread is dispatching are deferred (`schedule`) or rejected
//!    (`set`), so listeners of different states may write to each other from any thread.

use crate::error::StateError;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};
use uuid::Uuid;

/// Decides whether a new value is equivalent to the current one.
pub trait MutationPolicy<T>: Send + Sync {
    fn equivalent(&self, current: &T, new: &T) -> bool;
}

/// Structural equality via `PartialEq`. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Structural;

impl<T: PartialEq> MutationPolicy<T> for Structural {
    fn equivalent(&self, current: &T, new: &T) -> bool {
        current == new
    }
}

/// Every assignment counts as a change.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverEqual;

impl<T> MutationPolicy<T> for NeverEqual {
    fn equivalent(&self, _current: &T, _new: &T) -> bool {
        false
    }
}

/// A unique identifier for a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> SubscriptionId {
        SubscriptionId(Uuid::new_v4())
    }
}

/// Keeps a callback registered; dropping it deregisters the callback.
#[must_use = "dropping a Subscription immediately deregisters its callback"]
pub struct Subscription {
    id: SubscriptionId,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Subscription {
            id,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Keeps the callback registered for as long as its source lives.
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.release.is_some())
            .finish()
    }
}

type Listener<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;
type Hook = Arc<dyn Fn() + Send + Sync>;

struct StateInner<T> {
    value: Mutex<Arc<T>>,
    policy: Box<dyn MutationPolicy<T>>,
    version: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
    begin_hooks: Mutex<Vec<(SubscriptionId, Hook)>>,
    end_hooks: Mutex<Vec<(SubscriptionId, Hook)>>,
    /// Held for the whole of `set`; the flag is true while listeners run.
    dispatch: ReentrantMutex<Cell<bool>>,
    deferred_send: Sender<T>,
    deferred_recv: Receiver<T>,
}

#[derive(Debug, Clone, Copy)]
enum HookKind {
    Begin,
    End,
}

impl<T> StateInner<T> {
    fn hooks(&self, kind: HookKind) -> &Mutex<Vec<(SubscriptionId, Hook)>> {
        match kind {
            HookKind::Begin => &self.begin_hooks,
            HookKind::End => &self.end_hooks,
        }
    }
}

thread_local! {
    /// Number of dispatches running on this thread, across all states.
    static DISPATCH_DEPTH: Cell<usize> = Cell::new(0);
}

fn thread_is_dispatching() -> bool {
    DISPATCH_DEPTH.with(|depth| depth.get() > 0)
}

/// Resets the dispatch flag even if a listener panics.
struct Dispatching<'a>(&'a Cell<bool>);

impl<'a> Dispatching<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Dispatching(flag)
    }
}

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|depth| depth.set(depth.get() - 1));
        self.0.set(false);
    }
}

type DispatchGuard<'a> = ReentrantMutexGuard<'a, Cell<bool>>;

/// An observable value.
///
/// Cloning a `State` creates another handle to the same value.
pub struct State<T> {
    inner: Arc<StateInner<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        State {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for State<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for State<T> {}

impl<T: fmt::Debug> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("State")
            .field("value", &*self.inner.value.lock())
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: PartialEq + Send + Sync + 'static> State<T> {
    /// Creates a state that compares values structurally.
    pub fn new(value: T) -> Self {
        State::with_policy(value, Structural)
    }
}

impl<T: Send + Sync + 'static> State<T> {
    pub fn with_policy(value: T, policy: impl MutationPolicy<T> + 'static) -> Self {
        let (deferred_send, deferred_recv) = channel::unbounded();
        State {
            inner: Arc::new(StateInner {
                value: Mutex::new(Arc::new(value)),
                policy: Box::new(policy),
                version: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
                begin_hooks: Mutex::new(Vec::new()),
                end_hooks: Mutex::new(Vec::new()),
                dispatch: ReentrantMutex::new(Cell::new(false)),
                deferred_send,
                deferred_recv,
            }),
        }
    }

    /// Returns a clone of the current value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        T::clone(&*self.snapshot())
    }

    /// Calls `f` with the current value.
    ///
    /// The value is not locked while `f` runs, so `f` may read or write this state freely.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.snapshot();
        f(&*value)
    }

    fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.inner.value.lock())
    }

    /// Number of accepted mutations so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Returns true while this state's listeners are running on the current thread.
    pub fn is_dispatching(&self) -> bool {
        match self.inner.dispatch.try_lock() {
            Some(flag) => flag.get(),
            // held by another thread, so not dispatching on this one
            None => false,
        }
    }

    /// Replaces the value.
    ///
    /// Returns `Ok(false)` if the new value was equivalent to the current one and nothing was
    /// dispatched, and `Ok(true)` once every hook and listener has run.
    ///
    /// # Errors
    /// - [`StateError::ReentrantWrite`] if called from within this state's own dispatch.
    /// - [`StateError::Contended`] if called from a listener while another thread is writing
    ///   this state. Waiting could deadlock, so the write is dropped; use
    ///   [`schedule`](State::schedule) for writes that must land.
    pub fn set(&self, value: T) -> Result<bool, StateError> {
        let dispatch = match self.acquire() {
            Some(dispatch) => dispatch,
            None => {
                warn!("rejected write to state held by another dispatching thread");
                return Err(StateError::Contended);
            }
        };
        if dispatch.get() {
            warn!("rejected reentrant write to state during dispatch");
            return Err(StateError::ReentrantWrite);
        }

        let changed = self.apply(&dispatch, value);
        self.drain(dispatch);
        Ok(changed)
    }

    /// Mutates a copy of the value in place and sets it.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StateError>
    where
        T: Clone,
    {
        let mut value = self.get();
        let result = f(&mut value);
        self.set(value)?;
        Ok(result)
    }

    /// Sets the value, or, when called from one of this state's listeners, queues it to be set
    /// once the current dispatch has finished.
    ///
    /// When called from any listener while another thread is writing this state, the value is
    /// queued for that thread to apply.
    pub fn schedule(&self, value: T) {
        let dispatch = match self.acquire() {
            Some(dispatch) => dispatch,
            None => {
                trace!("deferring state write to the dispatching thread");
                self.defer(value);
                // the holder may have released the lock before the value was queued
                if let Some(dispatch) = self.inner.dispatch.try_lock() {
                    self.drain(dispatch);
                }
                return;
            }
        };
        if dispatch.get() {
            trace!("deferring state write until dispatch finishes");
            self.defer(value);
            return;
        }
        self.apply(&dispatch, value);
        self.drain(dispatch);
    }

    /// Takes the dispatch lock, without waiting if this thread is running a listener.
    fn acquire(&self) -> Option<DispatchGuard<'_>> {
        if thread_is_dispatching() {
            self.inner.dispatch.try_lock()
        } else {
            Some(self.inner.dispatch.lock())
        }
    }

    fn defer(&self, value: T) {
        // the receiver lives as long as the sender, both being owned by `inner`
        let _ = self.inner.deferred_send.send(value);
    }

    /// Applies deferred writes, then releases the dispatch lock.
    ///
    /// Values queued by other threads just before the lock is released are picked up by
    /// retaking it; if that fails, whoever holds it now drains them.
    fn drain<'a>(&'a self, mut dispatch: DispatchGuard<'a>) {
        loop {
            while let Ok(value) = self.inner.deferred_recv.try_recv() {
                trace!("applying deferred state write");
                self.apply(&dispatch, value);
            }
            drop(dispatch);
            if self.inner.deferred_recv.is_empty() {
                return;
            }
            dispatch = match self.inner.dispatch.try_lock() {
                Some(dispatch) => dispatch,
                None => return,
            };
        }
    }

    fn apply(&self, dispatch: &Cell<bool>, value: T) -> bool {
        let (old, new) = {
            let mut current = self.inner.value.lock();
            if self.inner.policy.equivalent(&current, &value) {
                return false;
            }
            let new = Arc::new(value);
            let old = std::mem::replace(&mut *current, Arc::clone(&new));
            (old, new)
        };
        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;

        let begin_hooks = snapshot_callbacks(&self.inner.begin_hooks);
        let listeners = snapshot_callbacks(&self.inner.listeners);
        let end_hooks = snapshot_callbacks(&self.inner.end_hooks);
        trace!(version, listeners = listeners.len(), "dispatching state change");

        let _dispatching = Dispatching::enter(dispatch);
        for hook in begin_hooks {
            hook();
        }
        for listener in listeners {
            listener(&old, &new);
        }
        for hook in end_hooks {
            hook();
        }
        true
    }

    /// Registers a listener called with `(old, new)` after every accepted mutation.
    pub fn listen(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        let id = SubscriptionId::new();
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        let weak = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().retain(|(i, _)| *i != id);
            }
        })
    }

    /// Registers a hook called before the listeners of every accepted mutation.
    pub fn on_begin(&self, hook: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.register_hook(HookKind::Begin, Arc::new(hook))
    }

    /// Registers a hook called after the listeners of every accepted mutation.
    pub fn on_end(&self, hook: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.register_hook(HookKind::End, Arc::new(hook))
    }

    fn register_hook(&self, kind: HookKind, hook: Hook) -> Subscription {
        let id = SubscriptionId::new();
        self.inner.hooks(kind).lock().push((id, hook));
        let weak: Weak<StateInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.hooks(kind).lock().retain(|(i, _)| *i != id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

fn snapshot_callbacks<C: Clone>(list: &Mutex<Vec<(SubscriptionId, C)>>) -> Vec<C> {
    list.lock().iter().map(|(_, c)| c.clone()).collect()
}
