//! Event values dispatched to machines.
//!
//! An [`Event`] is an immutable-after-construction message: a kind from the
//! closed [`EventKind`] set, an optional short name, an optional source tag
//! (usually the producing machine's name), a signed sequence number (timer id
//! or caller-chosen tag), and an opaque payload handle.
//!
//! Ownership rules are deliberately simple: posting an event moves it into the
//! runtime, so a producer cannot touch it afterwards. Bubbling to a parent
//! machine clones the event — strings deeply, the payload handle shallowly.
//! The runtime never inspects, duplicates, or frees payload contents; their
//! lifetime is the caller's contract.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque payload handle carried by an event. Cloning clones the handle, not
/// the contents.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Closed set of event kinds understood by the runtime.
///
/// `Entry` and `Exit` are synthesized during transitions and never bubble;
/// `Timeout` is produced by the timer service; the rest come from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Step,
    ResultOk,
    ResultError,
    Timeout,
    TimeoutHandled,
    Cancel,
    Entry,
    Exit,
}

impl EventKind {
    /// Stable uppercase name, used in logs and demo traces.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "START",
            EventKind::Step => "STEP",
            EventKind::ResultOk => "RESULT_OK",
            EventKind::ResultError => "RESULT_ERROR",
            EventKind::Timeout => "TIMEOUT",
            EventKind::TimeoutHandled => "TIMEOUT_HANDLED",
            EventKind::Cancel => "CANCEL",
            EventKind::Entry => "ENTRY",
            EventKind::Exit => "EXIT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed message delivered to a state handler.
#[derive(Clone)]
pub struct Event {
    kind: EventKind,
    name: Option<String>,
    source: Option<String>,
    seq: i64,
    payload: Option<Payload>,
}

impl Event {
    /// Create an event of `kind` with no name, no source, seq 0, no payload.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            name: None,
            source: None,
            seq: 0,
            payload: None,
        }
    }

    /// Attach a short name (copied into event-owned storage).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Tag the producing machine or module.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the sequence number (timer id or caller-chosen tag).
    pub fn with_seq(mut self, seq: i64) -> Self {
        self.seq = seq;
        self
    }

    /// Attach an opaque payload handle.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Borrowed for the event's lifetime.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Borrowed for the event's lifetime.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn seq(&self) -> i64 {
        self.seq
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Downcast the payload to a concrete type. Returns `None` when there is
    /// no payload or the type does not match.
    pub fn payload_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("seq", &self.seq)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fields_round_trip() {
        let ev = Event::new(EventKind::Step)
            .with_name("go")
            .with_source("modA")
            .with_seq(7);
        assert_eq!(ev.kind(), EventKind::Step);
        assert_eq!(ev.name(), Some("go"));
        assert_eq!(ev.source(), Some("modA"));
        assert_eq!(ev.seq(), 7);
        assert!(ev.payload().is_none());
    }

    #[test]
    fn defaults_are_empty() {
        let ev = Event::new(EventKind::Entry);
        assert_eq!(ev.name(), None);
        assert_eq!(ev.source(), None);
        assert_eq!(ev.seq(), 0);
    }

    #[test]
    fn payload_downcast() {
        let ev = Event::new(EventKind::Step).with_payload(Arc::new(41_u32));
        assert_eq!(ev.payload_as::<u32>(), Some(&41));
        assert_eq!(ev.payload_as::<String>(), None);
    }

    #[test]
    fn clone_shares_payload_handle() {
        let payload: Payload = Arc::new(String::from("data"));
        let ev = Event::new(EventKind::ResultOk).with_payload(Arc::clone(&payload));
        let copy = ev.clone();
        // Same allocation behind both handles: the bubble copy is shallow.
        assert!(Arc::ptr_eq(ev.payload().unwrap(), copy.payload().unwrap()));
        assert_eq!(copy.payload_as::<String>().unwrap(), "data");
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(EventKind::ResultError.as_str(), "RESULT_ERROR");
        assert_eq!(EventKind::Timeout.to_string(), "TIMEOUT");
    }
}
