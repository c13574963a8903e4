//! Per-search append-only event channel.
//!
//! All producers (driver, tools, loggers) emit here; the SSE gateway and
//! the audit writer consume. One internal lock protects both the pending
//! queue and the full log; the cancellation and done flags are latched
//! atomics so hot-path checks never contend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use braid_domain::error::{Error, Result};
use braid_domain::{Event, EventKind};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

/// Single append-only event channel for one search.
pub struct EventBus {
    inner: Mutex<Queues>,
    cancelled: AtomicBool,
    done: AtomicBool,
}

#[derive(Default)]
struct Queues {
    /// Pending events, cleared by `drain`.
    queue: Vec<Event>,
    /// Every event ever emitted, kept for replay.
    log: Vec<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Queues::default()),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    /// Append a typed event. Emitting a terminal kind latches `is_done`.
    pub fn emit(&self, kind: EventKind, data: Value) {
        let event = Event::new(kind, data);
        let mut inner = self.inner.lock();
        inner.queue.push(event.clone());
        inner.log.push(event);
        if kind.is_terminal() {
            self.done.store(true, Ordering::Release);
        }
    }

    /// Return and clear pending events, in emission order.
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut self.inner.lock().queue)
    }

    /// Return all events ever emitted (for reconnection). Does not clear.
    pub fn replay(&self) -> Vec<Event> {
        self.inner.lock().log.clone()
    }

    /// Signal cancellation. The next `raise_if_cancelled` will fail.
    /// Does not emit anything by itself.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Checked at iteration boundaries and between tool calls.
    pub fn raise_if_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BusHandle — the session's pointer to its *current* bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Swappable pointer to the bus of the search currently running on a
/// session.
///
/// Follow-up searches get a fresh `EventBus`, but the sandbox tools were
/// wired once at session creation. They hold a `BusHandle` instead of a
/// bus, so re-pointing the session at a new bus re-points every producer
/// at once.
#[derive(Clone)]
pub struct BusHandle {
    current: Arc<RwLock<Arc<EventBus>>>,
}

impl BusHandle {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            current: Arc::new(RwLock::new(bus)),
        }
    }

    /// The bus currently attached to the session.
    pub fn bus(&self) -> Arc<EventBus> {
        self.current.read().clone()
    }

    /// Re-point all producers at a new bus (follow-up search).
    pub fn swap(&self, bus: Arc<EventBus>) {
        *self.current.write() = bus;
    }

    pub fn emit(&self, kind: EventKind, data: Value) {
        self.bus().emit(kind, data);
    }

    pub fn raise_if_cancelled(&self) -> Result<()> {
        self.bus().raise_if_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emission_order_is_preserved() {
        let bus = EventBus::new();
        bus.emit(EventKind::Metadata, json!({"n": 0}));
        bus.emit(EventKind::Iteration, json!({"n": 1}));
        bus.emit(EventKind::Progress, json!({"n": 2}));

        let events = bus.drain();
        let ns: Vec<i64> = events.iter().map(|e| e.data["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[test]
    fn drain_clears_pending_but_replay_keeps_everything() {
        let bus = EventBus::new();
        bus.emit(EventKind::Metadata, json!({}));
        bus.emit(EventKind::Iteration, json!({"i": 1}));

        let first = bus.drain();
        assert_eq!(first.len(), 2);
        assert!(bus.drain().is_empty());

        bus.emit(EventKind::Iteration, json!({"i": 2}));

        // Replay is a superset of every previous drain, in original order.
        let replay = bus.replay();
        assert_eq!(replay.len(), 3);
        assert_eq!(replay[0].kind, EventKind::Metadata);
        assert_eq!(replay[1].data["i"], 1);
        assert_eq!(replay[2].data["i"], 2);

        // Replay does not clear the pending queue.
        assert_eq!(bus.drain().len(), 1);
    }

    #[test]
    fn terminal_event_latches_done() {
        let bus = EventBus::new();
        assert!(!bus.is_done());
        bus.emit(EventKind::Done, json!({"answer": "x"}));
        assert!(bus.is_done());
        // Latched: further non-terminal emission does not clear it.
        bus.emit(EventKind::Progress, json!({}));
        assert!(bus.is_done());
    }

    #[test]
    fn cancel_is_latched_and_raises() {
        let bus = EventBus::new();
        assert!(bus.raise_if_cancelled().is_ok());
        bus.cancel();
        assert!(bus.is_cancelled());
        assert!(matches!(
            bus.raise_if_cancelled(),
            Err(Error::Cancelled)
        ));
        // Cancel does not emit.
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn concurrent_producers_keep_all_events() {
        let bus = Arc::new(EventBus::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let bus = bus.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    bus.emit(EventKind::Progress, json!({"t": t, "i": i}));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(bus.replay().len(), 200);
    }

    #[test]
    fn handle_swap_repoints_producers() {
        let first = Arc::new(EventBus::new());
        let handle = BusHandle::new(first.clone());
        handle.emit(EventKind::Progress, json!({"on": "first"}));

        let second = Arc::new(EventBus::new());
        handle.swap(second.clone());
        handle.emit(EventKind::Progress, json!({"on": "second"}));

        assert_eq!(first.replay().len(), 1);
        assert_eq!(second.replay().len(), 1);
        assert_eq!(second.replay()[0].data["on"], "second");
    }
}
