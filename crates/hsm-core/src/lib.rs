//! Thread-aware hierarchical state machine runtime.
//!
//! Hierarchy here is between machine *instances* — a child machine bubbles
//! events it does not consume to its parent — not between states inside one
//! machine. Each machine owns a flat registry of named states and runs its
//! handlers, transitions, and timers on a serialized execution context:
//! either a private context (optionally driven by a dedicated worker thread)
//! or a context shared with other machines and driven by the caller.
//!
//! ```no_run
//! use hsm_core::{Event, EventKind, Machine};
//! use std::time::Duration;
//!
//! let m = Machine::new("demo");
//! m.register("idle", |m, _state, ev| match ev.kind() {
//!     EventKind::Start => {
//!         m.schedule_timer(Duration::from_millis(100));
//!         true
//!     }
//!     EventKind::Timeout => {
//!         m.stop();
//!         true
//!     }
//!     _ => false,
//! });
//! m.change_state("idle");
//! m.post(Event::new(EventKind::Start).with_source("main"));
//! m.start(false).unwrap();
//! m.run().unwrap();
//! ```
//!
//! Guarantees, in brief: per-machine dispatch is single-threaded and FIFO per
//! producer; transitions bracket the state change with synthetic `EXIT` and
//! `ENTRY` handler calls; unconsumed events are re-posted to the parent's
//! context; one-shot timers fire on the owning context and deliver exactly
//! one `TIMEOUT` unless cancelled first.

mod context;
mod error;
mod event;
mod machine;
mod state;
mod timer;

pub use context::ExecContext;
pub use error::HsmError;
pub use event::{Event, EventKind, Payload};
pub use machine::Machine;
pub use state::Handler;
