//! Input/output buffer queues shared by the application and the acquisition thread.
//!
//! The application pushes empty buffers into the input queue and pops filled
//! buffers from the output queue. The acquisition thread takes buffers from the
//! input queue and completes them into the output queue. Both queues live behind
//! one mutex; a condition variable wakes blocked poppers when a buffer is
//! completed or when the stream stops.
//!
//! Buffers are moved by value, so a buffer is always in exactly one place: a
//! queue, an in-flight frame, or the caller's hands.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::PushError;
use crate::types::{Buffer, BufferStatus, Membership};
use crate::{Result, StreamError};

/// Number of buffers waiting in each queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferCounts {
    pub input: usize,
    pub output: usize,
}

#[derive(Debug)]
struct Queues {
    input: VecDeque<Buffer>,
    output: VecDeque<Buffer>,
    payload_size: usize,
    streaming: bool,
    closed: bool,
    /// Bumped on every stop so waiters started before it return `Cancelled`
    cancel_epoch: u64,
}

/// Synchronized pair of buffer queues.
#[derive(Debug)]
pub struct BufferPool {
    queues: Mutex<Queues>,
    output_ready: Condvar,
}

impl BufferPool {
    /// Create an empty pool validating pushes against `payload_size`.
    pub fn new(payload_size: usize) -> Self {
        Self {
            queues: Mutex::new(Queues {
                input: VecDeque::new(),
                output: VecDeque::new(),
                payload_size,
                streaming: false,
                closed: false,
                cancel_epoch: 0,
            }),
            output_ready: Condvar::new(),
        }
    }

    /// Create a pool ready to be shared with a stream and its event handler.
    pub fn shared(payload_size: usize) -> Arc<Self> {
        Arc::new(Self::new(payload_size))
    }

    pub fn payload_size(&self) -> usize {
        self.queues.lock().payload_size
    }

    /// Queue an empty buffer for acquisition.
    ///
    /// The buffer is handed back inside the error when its capacity is below the
    /// payload size or the session was closed.
    pub fn push(&self, mut buffer: Buffer) -> std::result::Result<(), PushError> {
        let mut queues = self.queues.lock();
        if queues.closed {
            return Err(PushError::new(buffer, StreamError::SessionClosed));
        }
        if buffer.capacity() < queues.payload_size {
            let error = StreamError::InvalidBuffer {
                capacity: buffer.capacity(),
                payload_size: queues.payload_size,
            };
            return Err(PushError::new(buffer, error));
        }
        buffer.recycle();
        buffer.set_membership(Membership::Input);
        trace!(buffer = %buffer.id(), input = queues.input.len() + 1, "Buffer pushed");
        queues.input.push_back(buffer);
        Ok(())
    }

    /// Take the oldest completed buffer.
    ///
    /// - `Some(Duration::ZERO)` polls: `Timeout` when the output queue is empty
    /// - `Some(timeout)` waits up to `timeout`, or until the stream stops
    /// - `None` waits until a buffer is completed or the stream stops
    ///
    /// A stop while waiting, or a wait on a pool that is not streaming, yields
    /// `Cancelled` instead of data.
    pub fn pop(&self, timeout: Option<Duration>) -> Result<Buffer> {
        let mut queues = self.queues.lock();
        let epoch = queues.cancel_epoch;
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            if let Some(mut buffer) = queues.output.pop_front() {
                buffer.set_membership(Membership::CallerHeld);
                trace!(buffer = %buffer.id(), status = ?buffer.status(), "Buffer popped");
                return Ok(buffer);
            }

            if let (Some(timeout), Some(deadline)) = (timeout, deadline) {
                if Instant::now() >= deadline {
                    return Err(StreamError::Timeout { duration: timeout });
                }
            }

            if !queues.streaming || queues.cancel_epoch != epoch {
                return Err(StreamError::Cancelled);
            }

            match deadline {
                Some(deadline) => {
                    self.output_ready.wait_until(&mut queues, deadline);
                }
                None => self.output_ready.wait(&mut queues),
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Result<Buffer> {
        self.pop(Some(Duration::ZERO))
    }

    pub fn counts(&self) -> BufferCounts {
        let queues = self.queues.lock();
        BufferCounts { input: queues.input.len(), output: queues.output.len() }
    }

    pub fn is_closed(&self) -> bool {
        self.queues.lock().closed
    }

    pub fn is_streaming(&self) -> bool {
        self.queues.lock().streaming
    }

    /// Take a free buffer for a new frame. An empty input queue is an underrun.
    pub(crate) fn take_free(&self) -> Result<Buffer> {
        let mut queues = self.queues.lock();
        let mut buffer = queues.input.pop_front().ok_or(StreamError::NoBuffersAvailable)?;
        buffer.set_membership(Membership::Filling);
        Ok(buffer)
    }

    /// Stamp a filled buffer and append it to the output queue.
    ///
    /// `before_enqueue` runs without the lock held, after stamping and before the
    /// buffer becomes visible to poppers.
    pub(crate) fn complete(
        &self,
        mut buffer: Buffer,
        status: BufferStatus,
        before_enqueue: impl FnOnce(&Buffer),
    ) {
        buffer.finish(status);
        before_enqueue(&buffer);

        buffer.set_membership(Membership::Output);
        let mut queues = self.queues.lock();
        queues.output.push_back(buffer);
        drop(queues);
        self.output_ready.notify_one();
    }

    /// Change the payload size, evicting input buffers that became too small.
    pub(crate) fn set_payload_size(&self, payload_size: usize) -> Vec<Buffer> {
        let mut queues = self.queues.lock();
        queues.payload_size = payload_size;

        let (kept, evicted): (VecDeque<Buffer>, VecDeque<Buffer>) =
            queues.input.drain(..).partition(|buffer| buffer.capacity() >= payload_size);
        queues.input = kept;
        drop(queues);

        let evicted: Vec<Buffer> = evicted
            .into_iter()
            .map(|mut buffer| {
                buffer.set_membership(Membership::CallerHeld);
                buffer
            })
            .collect();
        if !evicted.is_empty() {
            debug!(payload_size, evicted = evicted.len(), "Evicted undersized input buffers");
        }
        evicted
    }

    /// Move completed buffers back to the input queue.
    ///
    /// Buffers too small for the current payload size stay in the output queue.
    pub(crate) fn flush(&self) -> usize {
        let mut queues = self.queues.lock();
        let payload_size = queues.payload_size;
        let mut kept = VecDeque::new();
        let mut moved = 0;
        while let Some(mut buffer) = queues.output.pop_front() {
            if buffer.capacity() >= payload_size {
                buffer.recycle();
                buffer.set_membership(Membership::Input);
                queues.input.push_back(buffer);
                moved += 1;
            } else {
                kept.push_back(buffer);
            }
        }
        queues.output = kept;
        debug!(moved, "Flushed output queue into input queue");
        moved
    }

    /// Remove every queued buffer, input first.
    pub(crate) fn drain(&self) -> Vec<Buffer> {
        let mut queues = self.queues.lock();
        let mut buffers: Vec<Buffer> = queues.input.drain(..).collect();
        buffers.extend(queues.output.drain(..));
        drop(queues);
        for buffer in &mut buffers {
            buffer.set_membership(Membership::CallerHeld);
        }
        buffers
    }

    /// Mark the stream as running or stopped; stopping cancels blocked poppers.
    pub(crate) fn set_streaming(&self, streaming: bool) {
        let mut queues = self.queues.lock();
        queues.streaming = streaming;
        if !streaming {
            queues.cancel_epoch = queues.cancel_epoch.wrapping_add(1);
            drop(queues);
            self.output_ready.notify_all();
        }
    }

    /// Permanently reject pushes and cancel blocked poppers.
    pub(crate) fn close(&self) {
        let mut queues = self.queues.lock();
        queues.closed = true;
        queues.streaming = false;
        queues.cancel_epoch = queues.cancel_epoch.wrapping_add(1);
        drop(queues);
        self.output_ready.notify_all();
    }
}
