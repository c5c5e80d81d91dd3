//! In-memory feed of human-readable status lines for an external observer.
//!
//! Producers are the acceptor and every session; the single consumer polls
//! with [`EventSink::drain`]. Pushing never waits on the consumer: once the
//! buffer is full the oldest entry is dropped.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::SystemTime,
};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// LogEvent is one status line together with the time it was recorded
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: SystemTime,
    pub message: String,
}

struct Inner {
    events: VecDeque<LogEvent>,
    capacity: usize,
    dropped: u64,
}

/// EventSink is a cheaply cloneable handle onto a shared, bounded queue
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<Mutex<Inner>>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

/// EventSink implementation block
impl EventSink {
    /// with_capacity creates a sink holding at most `capacity` undrained events
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY)),
                capacity,
                dropped: 0,
            })),
        }
    }

    /// push appends a message stamped with the current time
    pub fn push(&self, message: impl Into<String>) {
        let event = LogEvent {
            timestamp: SystemTime::now(),
            message: message.into(),
        };

        // A panic elsewhere while holding the lock leaves the queue intact
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.events.len() == inner.capacity {
            inner.events.pop_front();
            inner.dropped += 1;
        }
        inner.events.push_back(event);
    }

    /// drain hands every pending event to the caller in insertion order.
    /// Each event is returned by exactly one drain.
    pub fn drain(&self) -> Vec<LogEvent> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// dropped counts events discarded because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }
}
