//! Serialized single-consumer execution context.
//!
//! An [`ExecContext`] provides one primitive: post a closure to be run later,
//! in order, on exactly one thread. Everything the runtime does — event
//! dispatch, synthesized transitions, timer firing, cross-machine bubbling —
//! goes through it.
//!
//! Channel policy: the work queue is an unbounded crossbeam channel. Producers
//! never block or drop; the single consumer drains in arrival order. One-shot
//! timer entries are carried on the same channel and parked in a deadline heap
//! owned by the drain loop, which waits with `recv_deadline` so timer firing
//! interleaves with work items on the consumer thread only. That keeps the
//! serialization guarantee airtight: at most one item (work or timer callback)
//! executes at a time, and all of them on the driving thread.
//!
//! Contexts are refcounted (`Arc`) and may be shared by several machines; a
//! machine created without a private context attaches to whatever context the
//! caller hands it. Exactly one thread drives a context at a time — a second
//! `run` fails with [`HsmError::ContextBusy`]. `stop` lets the item in flight
//! finish, then the loop exits and pending items are discarded.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace};

use crate::error::HsmError;
use crate::timer::TimerToken;

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

enum Item {
    /// Deferred closure: a dispatch, a posted transition, a bubble.
    Work(Task),
    /// Schedule request; parked in the drain loop's deadline heap.
    Timer(TimerRequest),
    /// No-op used to interrupt a blocking wait (stop).
    Wake,
}

struct TimerRequest {
    deadline: Instant,
    token: TimerToken,
    fire: Task,
}

/// Heap entry ordered earliest-deadline-first (ties broken by arrival order).
struct PendingTimer {
    deadline: Instant,
    order: u64,
    token: TimerToken,
    fire: Task,
}

impl PartialEq for PendingTimer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.order == other.order
    }
}

impl Eq for PendingTimer {}

impl PartialOrd for PendingTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline wins.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Serialized executor for one or more machines. See the module docs.
pub struct ExecContext {
    tx: Sender<Item>,
    rx: Receiver<Item>,
    stopped: AtomicBool,
    driver: Mutex<Option<ThreadId>>,
    run_lock: Mutex<()>,
}

impl ExecContext {
    /// Create a fresh context. Wrap in `Arc` so machines can share it.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self {
            tx,
            rx,
            stopped: AtomicBool::new(false),
            driver: Mutex::new(None),
            run_lock: Mutex::new(()),
        })
    }

    /// True while the calling thread is the one draining this context.
    pub(crate) fn is_current(&self) -> bool {
        let driver = self.driver.lock().expect("driver lock poisoned");
        *driver == Some(thread::current().id())
    }

    /// Enqueue a closure. Callable from any thread; FIFO per producer. A
    /// closure posted by an item already running here executes after that
    /// item returns.
    pub(crate) fn post(&self, f: impl FnOnce() + Send + 'static) {
        // Send can only fail once the channel is torn down; late posts to a
        // dying context are silently dropped, matching stop semantics.
        let _ = self.tx.send(Item::Work(Box::new(f)));
    }

    /// Enqueue a one-shot timer. `fire` runs on the driving thread once
    /// `delay` has elapsed, unless the token is cancelled first.
    pub(crate) fn schedule(&self, delay: Duration, token: TimerToken, fire: Task) {
        let deadline = Instant::now() + delay;
        let _ = self.tx.send(Item::Timer(TimerRequest {
            deadline,
            token,
            fire,
        }));
    }

    /// Signal the drain loop to exit after the item in flight returns.
    /// Pending items are discarded. Idempotent; once stopped a context stays
    /// stopped.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.tx.send(Item::Wake);
        // If nothing is (or ever was) draining, clear the queue here so
        // undispatched items don't outlive their machines.
        if let Ok(_guard) = self.run_lock.try_lock() {
            self.drain_queue();
        }
        trace!(target: "hsm.context", "stop requested");
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Drain the queue on the calling thread until [`stop`](Self::stop).
    ///
    /// Returns [`HsmError::ContextBusy`] when another thread is already
    /// draining. Returns normally once stopped; queued items left over are
    /// dropped.
    pub(crate) fn run(&self) -> Result<(), HsmError> {
        let _guard = self.run_lock.try_lock().map_err(|_| HsmError::ContextBusy)?;
        *self.driver.lock().expect("driver lock poisoned") = Some(thread::current().id());
        debug!(target: "hsm.context", "drain loop entered");

        let mut timers: BinaryHeap<PendingTimer> = BinaryHeap::new();
        let mut next_order: u64 = 0;

        while !self.is_stopped() {
            let item = match timers.peek().map(|t| t.deadline) {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(item) => Some(item),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(item) => Some(item),
                    Err(_) => break,
                },
            };

            match item {
                Some(Item::Work(f)) => f(),
                Some(Item::Timer(req)) => {
                    next_order += 1;
                    timers.push(PendingTimer {
                        deadline: req.deadline,
                        order: next_order,
                        token: req.token,
                        fire: req.fire,
                    });
                }
                Some(Item::Wake) => {}
                None => {
                    // Deadline reached: fire everything due, skipping
                    // cancelled entries. A fired handler may stop us.
                    let now = Instant::now();
                    while let Some(head) = timers.peek() {
                        if head.deadline > now || self.is_stopped() {
                            break;
                        }
                        let entry = timers.pop().expect("peeked entry present");
                        if !entry.token.is_cancelled() {
                            (entry.fire)();
                        }
                    }
                }
            }
        }

        *self.driver.lock().expect("driver lock poisoned") = None;
        self.drain_queue();
        debug!(target: "hsm.context", "drain loop exited");
        Ok(())
    }

    fn drain_queue(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}
