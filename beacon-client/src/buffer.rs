use std::mem;

use beacon_protocol::{EventBatch, TelemetryEvent};
use parking_lot::Mutex;

/// The result of adding an event to a [`BatchBuffer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Push {
    /// The event was buffered. Holds the number of buffered events afterwards.
    Buffered(usize),
    /// The buffer is at capacity and the event was dropped.
    Full,
}

/// Accumulates events until they are flushed.
///
/// Taking events out empties the buffer in the same critical section, so an event is handed to
/// exactly one flush.
#[derive(Debug)]
pub struct BatchBuffer {
    events: Mutex<Vec<TelemetryEvent>>,
    capacity: usize,
}

impl BatchBuffer {
    /// Creates a buffer holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Appends an event unless the buffer is full.
    pub fn push(&self, event: TelemetryEvent) -> Push {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            return Push::Full;
        }

        events.push(event);
        Push::Buffered(events.len())
    }

    /// Removes all buffered events and splits them into batches of at most `batch_size` events.
    pub fn take_batches(&self, batch_size: usize) -> Vec<EventBatch> {
        let events = mem::take(&mut *self.events.lock());

        let mut batches = Vec::new();
        let mut events = events.into_iter().peekable();
        while events.peek().is_some() {
            batches.push(EventBatch::new(
                events.by_ref().take(batch_size.max(1)).collect(),
            ));
        }
        batches
    }

    /// Returns the number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns `true` if no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
