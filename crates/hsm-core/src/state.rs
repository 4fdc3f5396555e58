//! Per-machine state registry.
//!
//! States are keyed by name — states are authored and logged by name, so the
//! string key stays the public currency. Registration inserts or replaces;
//! there is no deregistration, entries live until the machine goes away.
//! What C-style APIs pass as `user_data` travels in the handler's closure
//! capture here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::event::Event;
use crate::machine::Machine;

/// State handler callback. Receives the machine, the current state's name,
/// and the event (borrowed for the duration of the call). Returns `true` to
/// consume the event, `false` to let it bubble to the parent machine.
pub type Handler = Arc<dyn Fn(&Machine, &str, &Event) -> bool + Send + Sync>;

pub(crate) struct StateEntry {
    pub(crate) handler: Handler,
}

#[derive(Default)]
pub(crate) struct StateRegistry {
    states: HashMap<String, StateEntry>,
}

impl StateRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `name`. Takes effect for subsequent
    /// dispatches, including those queued behind the caller.
    pub(crate) fn insert(&mut self, name: &str, handler: Handler) {
        self.states.insert(name.to_string(), StateEntry { handler });
    }

    /// Pure read; clones the handler handle out so no registry lock is held
    /// while the handler runs.
    pub(crate) fn lookup(&self, name: &str) -> Option<Handler> {
        self.states.get(name).map(|e| Arc::clone(&e.handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn handler(ret: bool) -> Handler {
        Arc::new(move |_m: &Machine, _s: &str, _e: &Event| ret)
    }

    #[test]
    fn lookup_misses_unregistered_names() {
        let reg = StateRegistry::new();
        assert!(reg.lookup("idle").is_none());
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut reg = StateRegistry::new();
        reg.insert("idle", handler(false));
        reg.insert("idle", handler(true));
        let m = Machine::new("probe");
        let ev = Event::new(EventKind::Step);
        let h = reg.lookup("idle").expect("registered");
        assert!(h(&m, "idle", &ev));
    }
}
