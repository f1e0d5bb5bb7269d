//! Test utilities shared by unit tests, integration tests and benchmarks
//!
//! Frame builders, image patterns and an event recorder usable as a stream
//! event handler.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;

use parking_lot::Mutex;

use crate::notify::EventHandler;
use crate::pool::BufferPool;
use crate::transport::packetize;
use crate::types::{Buffer, BufferId, BufferStatus, DataUnit, FrameInfo, StreamEvent};

/// Deterministic image content for a frame.
pub fn pattern(len: usize, seed: u64) -> Vec<u8> {
    (0..len).map(|i| (i as u64).wrapping_mul(31).wrapping_add(seed) as u8).collect()
}

/// Units of one frame, leader to trailer.
pub fn frame_units(frame_id: u64, info: FrameInfo, image: &[u8], packet_size: usize) -> Vec<DataUnit> {
    packetize(frame_id, info, image.to_vec(), packet_size)
}

/// `count` zeroed buffers of `capacity` bytes.
pub fn buffers(count: usize, capacity: usize) -> Vec<Buffer> {
    (0..count).map(|_| Buffer::new(capacity)).collect()
}

/// Take every queued buffer back out of `pool`.
pub fn drain_input(pool: &BufferPool) -> Vec<Buffer> {
    pool.drain()
}

/// One event as seen by a [`EventRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: StreamEvent,
    pub buffer: Option<BufferId>,
    pub status: Option<BufferStatus>,
    pub frame_id: Option<u64>,
}

/// Shared view of the events recorded so far.
#[derive(Debug, Clone, Default)]
pub struct RecordedEvents(Arc<Mutex<Vec<RecordedEvent>>>);

impl RecordedEvents {
    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.0.lock().clone()
    }

    pub fn count(&self, event: StreamEvent) -> usize {
        self.0.lock().iter().filter(|e| e.event == event).count()
    }

    pub fn kinds(&self) -> Vec<StreamEvent> {
        self.0.lock().iter().map(|e| e.event).collect()
    }
}

/// Handler recording every event it receives.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: RecordedEvents,
}

impl EventRecorder {
    pub fn pair() -> (Self, RecordedEvents) {
        let events = RecordedEvents::default();
        (Self { events: events.clone() }, events)
    }
}

impl EventHandler for EventRecorder {
    fn on_event(&mut self, event: StreamEvent, buffer: Option<&Buffer>) {
        self.events.0.lock().push(RecordedEvent {
            event,
            buffer: buffer.map(Buffer::id),
            status: buffer.map(Buffer::status),
            frame_id: buffer.and_then(Buffer::frame_id),
        });
    }
}
