use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bus::event::{Prioritized, Priority};
use crate::error::TorqueError;

/// Default number of queued events before eviction starts.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// An event the bus refused. The caller keeps it and may retry.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected<E> {
    pub event: E,
    pub error: TorqueError,
}

/// Bounded multi-producer event queue.
/// Any thread posts; the tick thread drains everything each tick.
pub struct EventBus<E> {
    events: Arc<Mutex<VecDeque<E>>>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            dropped: Arc::clone(&self.dropped),
            capacity: self.capacity,
        }
    }
}

impl<E: Prioritized> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(4096)))),
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    /// Queue an event. When full, the oldest droppable event is evicted, then
    /// the oldest normal one. Critical events are never evicted.
    pub fn post(&self, event: E) -> Result<(), Rejected<E>> {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            let victim = oldest_with(&events, Priority::Droppable)
                .or_else(|| oldest_with(&events, Priority::Normal));
            let Some(idx) = victim else {
                return Err(Rejected {
                    event,
                    error: TorqueError::Backpressure,
                });
            };
            events.remove(idx);
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!("{}", TorqueError::QueueOverflow { dropped });
        }
        events.push_back(event);
        Ok(())
    }

    /// Take every queued event in FIFO order.
    pub fn drain(&self) -> Vec<E> {
        let mut events = self.events.lock();
        std::mem::take(&mut *events).into()
    }

    /// Evictions since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<E: Prioritized> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

fn oldest_with<E: Prioritized>(events: &VecDeque<E>, priority: Priority) -> Option<usize> {
    events.iter().position(|e| e.priority() == priority)
}
