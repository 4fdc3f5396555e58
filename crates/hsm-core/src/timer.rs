//! Cancel tokens for one-shot timers.
//!
//! A token is shared between the machine's timer table and the pending entry
//! in the context's deadline heap. Cancellation flips an atomic from any
//! thread; the drain loop checks it immediately before firing. A `TIMEOUT`
//! that was already posted when the cancel landed can still reach the handler
//! — handlers tolerate stray sequence numbers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct TimerToken {
    cancelled: Arc<AtomicBool>,
}

impl TimerToken {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_sticky_and_visible_through_clones() {
        let token = TimerToken::new();
        let peer = token.clone();
        assert!(!peer.is_cancelled());
        token.cancel();
        assert!(peer.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
