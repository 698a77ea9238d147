//! Asynchronous events raised by an SRQ.
use crate::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The number of queued WQEs dropped below `srq_limit`.
    SrqLimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncEvent {
    pub kind: EventKind,
    /// The SRQ that raised the event.
    pub srq: Handle,
    /// The `srq_context` the SRQ was created with.
    pub srq_context: u64,
}

/// Receiver of SRQ events.
///
/// # Locking
///
/// `deliver` is invoked synchronously from `Srq::pop` while that SRQ's lock is
/// still held, so the event is observed no later than the pop that caused it.
/// Implementations must not block and must not call back into the same SRQ
/// (`post_recv`, `pop`, `modify`, `query`, `destroy`); doing so deadlocks.
/// Forwarding the event to a channel is the expected pattern.
pub trait EventHandler: Send + Sync {
    fn deliver(&self, event: AsyncEvent);
}

impl EventHandler for crossbeam::channel::Sender<AsyncEvent> {
    fn deliver(&self, event: AsyncEvent) {
        // A disconnected receiver means nobody is listening anymore.
        let _ = self.try_send(event);
    }
}
