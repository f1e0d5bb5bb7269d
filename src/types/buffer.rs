//! Application-owned image buffers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::FrameInfo;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique buffer identity, stable while the buffer cycles through a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of the last acquisition into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferStatus {
    /// Every byte of the payload arrived
    Success,
    /// The frame saw no activity within its timeout, or its trailer never arrived
    Timeout,
    /// Not acquired yet (fresh or recycled buffer)
    Unknown,
    /// Currently owned by the acquisition thread
    Filling,
    /// A unit carried a sequence number that cannot belong to the frame
    WrongPacketId,
    /// Received byte count differs from the expected payload size
    SizeMismatch,
    /// The stream stopped while the frame was in flight
    Aborted,
}

impl BufferStatus {
    /// Whether this status can be observed on a buffer handed back to the caller.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BufferStatus::Filling | BufferStatus::Unknown)
    }
}

/// Where a buffer currently lives.
///
/// Ownership already guarantees a buffer sits in a single place; this value
/// records which one for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    /// Waiting in the input queue
    Input,
    /// Owned by an in-flight frame
    Filling,
    /// Waiting in the output queue
    Output,
    /// Held by the application
    CallerHeld,
}

/// A memory region the engine fills with one frame.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    data: Vec<u8>,
    status: BufferStatus,
    membership: Membership,
    frame_id: Option<u64>,
    info: Option<FrameInfo>,
    payload_len: usize,
    received: usize,
    completed_at: Option<SystemTime>,
}

impl Buffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self::from_vec(vec![0; capacity])
    }

    /// Wrap caller-allocated memory. The vector length is the buffer capacity.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            id: BufferId::next(),
            data,
            status: BufferStatus::Unknown,
            membership: Membership::CallerHeld,
            frame_id: None,
            info: None,
            payload_len: 0,
            received: 0,
            completed_at: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    /// Frame identifier of the last acquisition, if any.
    pub fn frame_id(&self) -> Option<u64> {
        self.frame_id
    }

    /// Geometry snapshot from the frame leader, if the leader was received.
    pub fn frame_info(&self) -> Option<&FrameInfo> {
        self.info.as_ref()
    }

    /// Payload bytes actually written during the last acquisition.
    pub fn received_bytes(&self) -> usize {
        self.received
    }

    /// System time at which the buffer was completed.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.completed_at
    }

    /// The whole data region.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The image bytes of the last acquisition (expected payload size).
    pub fn image_data(&self) -> &[u8] {
        &self.data[..self.payload_len.min(self.data.len())]
    }

    pub fn is_success(&self) -> bool {
        self.status == BufferStatus::Success
    }

    /// Release the underlying memory.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub(crate) fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    /// Clear acquisition state before the buffer re-enters the input queue.
    pub(crate) fn recycle(&mut self) {
        self.status = BufferStatus::Unknown;
        self.frame_id = None;
        self.info = None;
        self.payload_len = 0;
        self.received = 0;
        self.completed_at = None;
    }

    pub(crate) fn begin_fill(&mut self, frame_id: u64, payload_len: usize) {
        self.recycle();
        self.status = BufferStatus::Filling;
        self.frame_id = Some(frame_id);
        self.payload_len = payload_len;
    }

    pub(crate) fn set_frame_info(&mut self, info: FrameInfo) {
        self.info = Some(info);
    }

    /// Copy `bytes` at `offset`. Returns `false` when the write does not fit.
    pub(crate) fn write_at(&mut self, offset: usize, bytes: &[u8]) -> bool {
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        if end > self.payload_len || end > self.data.len() {
            return false;
        }
        self.data[offset..end].copy_from_slice(bytes);
        self.received += bytes.len();
        true
    }

    pub(crate) fn finish(&mut self, status: BufferStatus) {
        self.status = status;
        self.completed_at = Some(SystemTime::now());
    }
}
