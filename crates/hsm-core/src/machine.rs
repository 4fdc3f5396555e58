//! Machine lifecycle, dispatch, transitions, bubbling, and timers.
//!
//! A [`Machine`] binds a name, a current state, a state registry, an
//! execution context, an optional parent link, and a timer table. The handle
//! is a cheap clone over an `Arc`; dropping the last handle tears the machine
//! down (cancels timers, stops a privately owned context, joins the worker).
//!
//! Threading contract: handlers, transitions, and timer callbacks run on the
//! machine's context thread, one at a time. `post`, `change_state`,
//! `schedule_timer`, `cancel_timer`, `stop`, and `current_state` may be
//! called from any thread. Queue items hold only weak references back to the
//! machine, so a machine whose last handle is dropped dies even with events
//! still queued — those dispatches become no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::context::ExecContext;
use crate::error::HsmError;
use crate::event::{Event, EventKind};
use crate::state::{Handler, StateRegistry};
use crate::timer::TimerToken;

pub(crate) struct MachineInner {
    name: String,
    /// Guarded separately from the dispatch loop so any thread can snapshot
    /// without serializing through the worker. Transitions commit under this
    /// same lock.
    current_state: Mutex<Option<String>>,
    states: Mutex<StateRegistry>,
    ctx: Arc<ExecContext>,
    owns_context: bool,
    parent: Mutex<Weak<MachineInner>>,
    timers: Mutex<HashMap<i64, TimerToken>>,
    next_timer_id: AtomicI64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a hierarchical state machine instance.
#[derive(Clone)]
pub struct Machine {
    inner: Arc<MachineInner>,
}

impl Machine {
    /// Create a machine with a private execution context.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), ExecContext::new(), true)
    }

    /// Create a machine attached to a caller-shared execution context.
    /// Several machines may share one context; whoever drives it (via any
    /// sharing machine's [`run`](Self::run) or [`start`](Self::start)) drives
    /// them all, and stopping it stops them all.
    pub fn with_context(name: impl Into<String>, ctx: Arc<ExecContext>) -> Self {
        Self::build(name.into(), ctx, false)
    }

    fn build(name: String, ctx: Arc<ExecContext>, owns_context: bool) -> Self {
        debug!(target: "hsm.machine", machine = %name, private_context = owns_context, "created");
        Self {
            inner: Arc::new(MachineInner {
                name,
                current_state: Mutex::new(None),
                states: Mutex::new(StateRegistry::new()),
                ctx,
                owns_context,
                parent: Mutex::new(Weak::new()),
                timers: Mutex::new(HashMap::new()),
                next_timer_id: AtomicI64::new(1),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Install the parent used for event bubbling. The link is non-owning:
    /// it does not keep the parent alive, and bubbling to a parent that has
    /// already been dropped discards the event.
    pub fn set_parent(&self, parent: &Machine) {
        *self.inner.parent.lock().expect("parent lock poisoned") = Arc::downgrade(&parent.inner);
    }

    /// The current parent, if set and still alive.
    pub fn parent(&self) -> Option<Machine> {
        self.inner
            .parent
            .lock()
            .expect("parent lock poisoned")
            .upgrade()
            .map(|inner| Machine { inner })
    }

    /// Register (or replace) the handler for a state name. May be called at
    /// any time, including from inside a running handler; it affects
    /// subsequent dispatches.
    pub fn register(
        &self,
        state: impl Into<String>,
        handler: impl Fn(&Machine, &str, &Event) -> bool + Send + Sync + 'static,
    ) {
        let state = state.into();
        if state.is_empty() {
            return;
        }
        let handler: Handler = Arc::new(handler);
        self.inner
            .states
            .lock()
            .expect("states lock poisoned")
            .insert(&state, handler);
        trace!(target: "hsm.machine", machine = %self.inner.name, state = %state, "state registered");
    }

    /// Request a transition. Executes synchronously when the caller is
    /// already on this machine's context thread, otherwise the request is
    /// posted and runs asynchronously.
    pub fn change_state(&self, new_state: impl Into<String>) {
        let new_state = new_state.into();
        if new_state.is_empty() {
            return;
        }
        if self.inner.ctx.is_current() {
            MachineInner::transition(&self.inner, &new_state);
        } else {
            self.post_change_state(new_state);
        }
    }

    /// Transition immediately. Callers must already be on this machine's
    /// context thread (handlers and timer callbacks are).
    pub fn change_state_now(&self, new_state: impl Into<String>) {
        let new_state = new_state.into();
        if new_state.is_empty() {
            return;
        }
        debug_assert!(
            self.inner.ctx.is_current(),
            "change_state_now called off-context for machine `{}`",
            self.inner.name
        );
        MachineInner::transition(&self.inner, &new_state);
    }

    /// Queue a transition unconditionally, even when already on-context.
    /// Ordering holds relative to items this caller posted earlier; a posted
    /// event and a posted transition from different threads may interleave.
    pub fn post_change_state(&self, new_state: impl Into<String>) {
        let new_state = new_state.into();
        if new_state.is_empty() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.ctx.post(move || {
            if let Some(inner) = weak.upgrade() {
                MachineInner::transition(&inner, &new_state);
            }
        });
    }

    /// Post an event for asynchronous dispatch. Takes ownership; the event
    /// is consumed by the handler chain (or dropped if the machine dies
    /// first).
    pub fn post(&self, event: Event) {
        MachineInner::enqueue_dispatch(&self.inner, event);
    }

    /// Schedule a one-shot timer. After `delay`, a `TIMEOUT` event with
    /// `name = "TIMER_EXPIRED"`, `source` = this machine's name, and `seq` =
    /// the returned id is posted to this machine. Returns the timer id;
    /// ids are unique for the machine's lifetime and never reused.
    pub fn schedule_timer(&self, delay: Duration) -> i64 {
        let inner = &self.inner;
        let id = inner.next_timer_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = TimerToken::new();
        inner
            .timers
            .lock()
            .expect("timer lock poisoned")
            .insert(id, token.clone());

        let weak = Arc::downgrade(inner);
        inner.ctx.schedule(
            delay,
            token,
            Box::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                inner.timers.lock().expect("timer lock poisoned").remove(&id);
                trace!(target: "hsm.timer", machine = %inner.name, timer_id = id, "fired");
                let ev = Event::new(EventKind::Timeout)
                    .with_name("TIMER_EXPIRED")
                    .with_source(inner.name.clone())
                    .with_seq(id);
                MachineInner::enqueue_dispatch(&inner, ev);
            }),
        );
        trace!(
            target: "hsm.timer",
            machine = %inner.name,
            timer_id = id,
            delay_ms = delay.as_millis() as u64,
            "scheduled"
        );
        id
    }

    /// Cancel a live timer. Returns `true` when `id` was live, `false` when
    /// unknown or already fired. Safe from any thread. A `TIMEOUT` already
    /// posted but not yet dispatched can still be observed after a successful
    /// cancel; handlers must tolerate stray sequence numbers.
    pub fn cancel_timer(&self, id: i64) -> bool {
        let token = self
            .inner
            .timers
            .lock()
            .expect("timer lock poisoned")
            .remove(&id);
        match token {
            Some(token) => {
                token.cancel();
                trace!(target: "hsm.timer", machine = %self.inner.name, timer_id = id, "cancelled");
                true
            }
            None => false,
        }
    }

    /// Start draining this machine's context. With `own_thread`, a worker
    /// thread named after the machine is spawned; otherwise this returns
    /// immediately and the caller is expected to invoke [`run`](Self::run).
    /// Starting twice with a live worker is a no-op.
    pub fn start(&self, own_thread: bool) -> Result<(), HsmError> {
        if !own_thread {
            return Ok(());
        }
        let mut worker = self.inner.worker.lock().expect("worker lock poisoned");
        if worker.is_some() {
            return Ok(());
        }
        let ctx = Arc::clone(&self.inner.ctx);
        let name = self.inner.name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Err(err) = ctx.run() {
                    warn!(target: "hsm.machine", machine = %name, %err, "worker could not drive context");
                }
            })
            .map_err(|source| HsmError::Spawn {
                name: self.inner.name.clone(),
                source,
            })?;
        *worker = Some(handle);
        debug!(target: "hsm.machine", machine = %self.inner.name, "worker started");
        Ok(())
    }

    /// Drain this machine's context on the calling thread, blocking until
    /// [`stop`](Self::stop). Fails with [`HsmError::ContextBusy`] when the
    /// context is already being driven.
    pub fn run(&self) -> Result<(), HsmError> {
        self.inner.ctx.run()
    }

    /// Ask the context to exit after the item in flight returns. Pending
    /// items are discarded. May be called from inside a handler. Stopping a
    /// shared context stops every machine attached to it.
    pub fn stop(&self) {
        debug!(target: "hsm.machine", machine = %self.inner.name, "stop");
        self.inner.ctx.stop();
    }

    /// Owned snapshot of the current state name, empty when no transition has
    /// committed yet. Readable from any thread.
    pub fn current_state(&self) -> String {
        self.inner
            .current_state
            .lock()
            .expect("state lock poisoned")
            .clone()
            .unwrap_or_default()
    }
}

impl MachineInner {
    /// Queue a dispatch for `event` onto this machine's context.
    fn enqueue_dispatch(inner: &Arc<MachineInner>, event: Event) {
        let weak = Arc::downgrade(inner);
        inner.ctx.post(move || {
            if let Some(inner) = weak.upgrade() {
                MachineInner::dispatch(&inner, event);
            }
        });
    }

    /// Runs on the context thread: look up the current state's handler,
    /// invoke it, and bubble the event to the parent when unhandled.
    fn dispatch(inner: &Arc<MachineInner>, event: Event) {
        let state = inner
            .current_state
            .lock()
            .expect("state lock poisoned")
            .clone();
        let handler = state
            .as_deref()
            .and_then(|s| inner.states.lock().expect("states lock poisoned").lookup(s));

        let handled = match (state.as_deref(), handler) {
            (Some(state), Some(handler)) => {
                let machine = Machine {
                    inner: Arc::clone(inner),
                };
                let handled = handler(&machine, state, &event);
                trace!(
                    target: "hsm.machine",
                    machine = %inner.name,
                    state = %state,
                    kind = %event.kind(),
                    seq = event.seq(),
                    handled,
                    "dispatched"
                );
                handled
            }
            // No committed state or no handler registered for it: the event
            // can only bubble or drop.
            _ => false,
        };

        if handled {
            return;
        }

        // ENTRY/EXIT are synthesized locally and never reach this path, so
        // everything here is eligible to bubble.
        let parent = inner.parent.lock().expect("parent lock poisoned").upgrade();
        match parent {
            Some(parent) => {
                trace!(
                    target: "hsm.machine",
                    machine = %inner.name,
                    parent = %parent.name,
                    kind = %event.kind(),
                    "bubbling"
                );
                MachineInner::enqueue_dispatch(&parent, event);
            }
            None => {
                trace!(
                    target: "hsm.machine",
                    machine = %inner.name,
                    kind = %event.kind(),
                    "unhandled event dropped"
                );
            }
        }
    }

    /// Runs on the context thread: EXIT old state, commit, ENTRY new state.
    /// Same-state requests are a no-op. A transition to an unregistered name
    /// commits but skips ENTRY, parking the machine until re-transitioned.
    fn transition(inner: &Arc<MachineInner>, new_state: &str) {
        let old = inner
            .current_state
            .lock()
            .expect("state lock poisoned")
            .clone();
        if old.as_deref() == Some(new_state) {
            return;
        }

        let machine = Machine {
            inner: Arc::clone(inner),
        };

        if let Some(old_name) = old.as_deref() {
            // Clone the handler out and release the registry lock before the
            // call; the handler may register states or transition again.
            let handler = inner
                .states
                .lock()
                .expect("states lock poisoned")
                .lookup(old_name);
            if let Some(handler) = handler {
                let ev = Event::new(EventKind::Exit).with_source(inner.name.clone());
                // Return value ignored for EXIT/ENTRY.
                let _ = handler(&machine, old_name, &ev);
            }
        }

        *inner.current_state.lock().expect("state lock poisoned") = Some(new_state.to_string());
        debug!(
            target: "hsm.machine",
            machine = %inner.name,
            from = old.as_deref().unwrap_or(""),
            to = %new_state,
            "transition"
        );

        let handler = inner
            .states
            .lock()
            .expect("states lock poisoned")
            .lookup(new_state);
        if let Some(handler) = handler {
            let ev = Event::new(EventKind::Entry).with_source(inner.name.clone());
            let _ = handler(&machine, new_state, &ev);
        }
    }
}

impl Drop for MachineInner {
    fn drop(&mut self) {
        for (_, token) in self.timers.lock().expect("timer lock poisoned").drain() {
            token.cancel();
        }
        if self.owns_context {
            self.ctx.stop();
        }
        if let Some(handle) = self.worker.lock().expect("worker lock poisoned").take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        debug!(target: "hsm.machine", machine = %self.name, "destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_machine_has_empty_state() {
        let m = Machine::new("m");
        assert_eq!(m.current_state(), "");
    }

    #[test]
    fn parent_link_is_non_owning() {
        let child = Machine::new("child");
        {
            let parent = Machine::new("parent");
            child.set_parent(&parent);
            assert_eq!(child.parent().unwrap().name(), "parent");
        }
        // Parent dropped: the weak link no longer upgrades.
        assert!(child.parent().is_none());
    }

    #[test]
    fn timer_ids_are_strictly_increasing() {
        let m = Machine::new("m");
        let a = m.schedule_timer(Duration::from_secs(60));
        let b = m.schedule_timer(Duration::from_secs(60));
        let c = m.schedule_timer(Duration::from_secs(60));
        assert!(a < b && b < c);
        assert!(a > 0);
        assert!(m.cancel_timer(a));
        // A second mint never reuses the cancelled id.
        let d = m.schedule_timer(Duration::from_secs(60));
        assert!(d > c);
    }

    #[test]
    fn cancel_unknown_timer_returns_false() {
        let m = Machine::new("m");
        assert!(!m.cancel_timer(999));
        let id = m.schedule_timer(Duration::from_secs(60));
        assert!(m.cancel_timer(id));
        assert!(!m.cancel_timer(id));
    }

    #[test]
    fn empty_state_name_is_rejected() {
        let m = Machine::new("m");
        m.change_state("");
        m.register("", |_, _, _| true);
        assert_eq!(m.current_state(), "");
    }
}
