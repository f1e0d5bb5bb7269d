//! Transport-level data units and resend requests

use std::time::Instant;

use bytes::Bytes;

use super::FrameInfo;

/// Role of a unit inside a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// First unit of a frame (sequence 0), carries the geometry snapshot
    Leader(FrameInfo),
    /// Image bytes to place at the unit offset
    Payload,
    /// Last unit of a frame
    Trailer,
}

/// One inbound packet, already decoded by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUnit {
    /// Frame this unit belongs to
    pub frame_id: u64,
    /// Position of the unit inside the frame (leader is 0)
    pub sequence: u32,
    /// Byte offset of `payload` inside the frame image
    pub offset: usize,
    /// Image bytes (empty for leader and trailer)
    pub payload: Bytes,
    pub kind: UnitKind,
}

impl DataUnit {
    pub fn leader(frame_id: u64, info: FrameInfo) -> Self {
        Self { frame_id, sequence: 0, offset: 0, payload: Bytes::new(), kind: UnitKind::Leader(info) }
    }

    pub fn payload(frame_id: u64, sequence: u32, offset: usize, payload: impl Into<Bytes>) -> Self {
        Self { frame_id, sequence, offset, payload: payload.into(), kind: UnitKind::Payload }
    }

    pub fn trailer(frame_id: u64, sequence: u32) -> Self {
        Self { frame_id, sequence, offset: 0, payload: Bytes::new(), kind: UnitKind::Trailer }
    }

    pub fn is_trailer(&self) -> bool {
        matches!(self.kind, UnitKind::Trailer)
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.kind, UnitKind::Leader(_))
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Inclusive range of unit sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceRange {
    pub first: u32,
    pub last: u32,
}

impl SequenceRange {
    pub fn new(first: u32, last: u32) -> Self {
        debug_assert!(first <= last, "inverted sequence range {first}..={last}");
        Self { first, last }
    }

    pub fn single(sequence: u32) -> Self {
        Self { first: sequence, last: sequence }
    }

    pub fn contains(&self, sequence: u32) -> bool {
        (self.first..=self.last).contains(&sequence)
    }

    /// Number of sequences covered. A range always holds at least one.
    pub fn count(&self) -> u32 {
        self.last - self.first + 1
    }
}

impl std::fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}..={}", self.first, self.last)
        }
    }
}

/// Retransmission request for a missing range of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendRequest {
    pub frame_id: u64,
    /// Missing sequences
    pub range: SequenceRange,
    /// When the request is considered unanswered
    pub deadline: Instant,
    /// Number of times the request was issued, including this one
    pub attempts: u32,
}
