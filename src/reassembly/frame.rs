//! Reassembly context of one in-flight frame.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::resend::{self, Expiry};
use crate::config::ResendPolicy;
use crate::statistics::StreamStatistics;
use crate::types::{Buffer, BufferStatus, DataUnit, ResendRequest, SequenceRange, UnitKind};

/// Per-session rules every frame is judged against.
#[derive(Debug, Clone)]
pub(crate) struct FrameRules {
    pub payload_size: usize,
    pub frame_timeout: Duration,
    pub resend: ResendPolicy,
}

impl FrameRules {
    /// Highest sequence a frame of this payload size can use: one byte per
    /// payload unit, plus the trailer.
    fn max_sequence(&self) -> u32 {
        u32::try_from(self.payload_size).unwrap_or(u32::MAX).saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FrameState {
    /// Collecting units, trailer not seen yet
    Waiting { requests: Vec<ResendRequest> },
    /// Trailer seen, missing units still requested
    AwaitingResend { requests: Vec<ResendRequest> },
    Complete { status: BufferStatus },
}

impl FrameState {
    pub(crate) fn requests(&self) -> &[ResendRequest] {
        match self {
            FrameState::Waiting { requests } | FrameState::AwaitingResend { requests } => requests,
            FrameState::Complete { .. } => &[],
        }
    }

    fn requests_mut(&mut self) -> Option<&mut Vec<ResendRequest>> {
        match self {
            FrameState::Waiting { requests } | FrameState::AwaitingResend { requests } => Some(requests),
            FrameState::Complete { .. } => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct InFlightFrame {
    frame_id: u64,
    buffer: Buffer,
    next_sequence: u32,
    trailer_sequence: Option<u32>,
    received: HashSet<u32>,
    state: FrameState,
    last_activity: Instant,
}

impl InFlightFrame {
    pub(crate) fn new(frame_id: u64, mut buffer: Buffer, payload_size: usize, now: Instant) -> Self {
        buffer.begin_fill(frame_id, payload_size);
        Self {
            frame_id,
            buffer,
            next_sequence: 0,
            trailer_sequence: None,
            received: HashSet::new(),
            state: FrameState::Waiting { requests: Vec::new() },
            last_activity: now,
        }
    }

    pub(crate) fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub(crate) fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &FrameState {
        &self.state
    }

    pub(crate) fn status(&self) -> Option<BufferStatus> {
        match self.state {
            FrameState::Complete { status } => Some(status),
            _ => None,
        }
    }

    /// Status to force on a frame that must leave before it finished.
    pub(crate) fn forced_status(&self) -> BufferStatus {
        if self.trailer_sequence.is_some() { BufferStatus::SizeMismatch } else { BufferStatus::Timeout }
    }

    pub(crate) fn into_buffer(self) -> Buffer {
        self.buffer
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub(crate) fn next_deadline(&self, rules: &FrameRules) -> Option<Instant> {
        if self.status().is_some() {
            return None;
        }
        let timeout = self.last_activity + rules.frame_timeout;
        let request = self.state.requests().iter().map(|r| r.deadline).min();
        Some(request.map_or(timeout, |r| r.min(timeout)))
    }

    /// Feed one unit. Requests to send are appended to `requests`.
    pub(crate) fn accept(
        &mut self,
        unit: DataUnit,
        now: Instant,
        rules: &FrameRules,
        statistics: &StreamStatistics,
        requests: &mut Vec<ResendRequest>,
    ) {
        if self.status().is_some() {
            return;
        }
        self.last_activity = now;
        let sequence = unit.sequence;

        if self.received.contains(&sequence) {
            statistics.record_duplicate_units(1);
            trace!(frame_id = self.frame_id, sequence, "Duplicate unit ignored");
            return;
        }
        if sequence > rules.max_sequence() {
            return self.finish(BufferStatus::WrongPacketId);
        }

        match unit.kind {
            UnitKind::Leader(info) => {
                if sequence != 0 {
                    return self.finish(BufferStatus::WrongPacketId);
                }
                self.buffer.set_frame_info(info);
            }
            UnitKind::Payload => {
                let beyond_trailer = self.trailer_sequence.is_some_and(|t| sequence >= t);
                if sequence == 0 || beyond_trailer {
                    return self.finish(BufferStatus::WrongPacketId);
                }
                if !self.buffer.write_at(unit.offset, &unit.payload) {
                    debug!(
                        frame_id = self.frame_id,
                        sequence,
                        offset = unit.offset,
                        len = unit.payload.len(),
                        "Unit overflows the payload"
                    );
                    return self.finish(BufferStatus::SizeMismatch);
                }
            }
            UnitKind::Trailer => {
                if sequence == 0 || sequence < self.next_sequence || self.trailer_sequence.is_some() {
                    return self.finish(BufferStatus::WrongPacketId);
                }
                self.trailer_sequence = Some(sequence);
            }
        }

        self.received.insert(sequence);
        self.resolve(sequence);
        if sequence > self.next_sequence {
            let gap = SequenceRange::new(self.next_sequence, sequence - 1);
            self.open_gap(gap, now, rules, statistics, requests);
        }
        if sequence >= self.next_sequence {
            self.next_sequence = sequence.saturating_add(1);
        }
        self.settle(rules);
    }

    /// Service timers: inactivity timeout, then request deadlines.
    pub(crate) fn poll(
        &mut self,
        now: Instant,
        rules: &FrameRules,
        statistics: &StreamStatistics,
        reissued: &mut Vec<ResendRequest>,
    ) {
        if self.status().is_some() {
            return;
        }
        if now.saturating_duration_since(self.last_activity) >= rules.frame_timeout {
            debug!(
                frame_id = self.frame_id,
                received = self.buffer.received_bytes(),
                pending = self.state.requests().len(),
                "Frame timed out"
            );
            return self.finish(BufferStatus::Timeout);
        }

        let received = &self.received;
        let Some(requests) = self.state.requests_mut() else {
            return;
        };
        let mut exhausted = 0;
        requests.retain_mut(|request| {
            if request.deadline > now {
                return true;
            }
            match resend::refresh(request, received, now, &rules.resend) {
                Expiry::Reissued => {
                    reissued.push(request.clone());
                    true
                }
                Expiry::Resolved => false,
                Expiry::Exhausted => {
                    debug!(frame_id = request.frame_id, range = %request.range, "Resend attempts exhausted");
                    exhausted += 1;
                    false
                }
            }
        });
        statistics.record_resend_exhausted(exhausted);
        self.settle(rules);
    }

    pub(crate) fn terminate(&mut self, status: BufferStatus) {
        if self.status().is_none() {
            self.finish(status);
        }
    }

    fn open_gap(
        &mut self,
        gap: SequenceRange,
        now: Instant,
        rules: &FrameRules,
        statistics: &StreamStatistics,
        requests: &mut Vec<ResendRequest>,
    ) {
        if !rules.resend.enabled {
            trace!(frame_id = self.frame_id, range = %gap, "Missing units, resend disabled");
            statistics.record_resend_exhausted(1);
            return;
        }
        let request = resend::open(self.frame_id, gap, now, &rules.resend);
        trace!(frame_id = self.frame_id, range = %gap, "Missing units requested");
        requests.push(request.clone());
        if let Some(pending) = self.state.requests_mut() {
            pending.push(request);
        }
    }

    /// Drop requests whose whole range has now arrived.
    fn resolve(&mut self, sequence: u32) {
        let received = &self.received;
        if let Some(requests) = self.state.requests_mut() {
            requests.retain(|r| !r.range.contains(sequence) || resend::still_missing(r.range, received).is_some());
        }
    }

    fn settle(&mut self, rules: &FrameRules) {
        if self.trailer_sequence.is_none() || self.status().is_some() {
            return;
        }
        if self.state.requests().is_empty() {
            let status = if self.buffer.received_bytes() == rules.payload_size {
                BufferStatus::Success
            } else {
                BufferStatus::SizeMismatch
            };
            self.finish(status);
        } else if let FrameState::Waiting { requests } = &mut self.state {
            let requests = std::mem::take(requests);
            self.state = FrameState::AwaitingResend { requests };
        }
    }

    fn finish(&mut self, status: BufferStatus) {
        trace!(
            frame_id = self.frame_id,
            buffer = %self.buffer.id(),
            ?status,
            received = self.buffer.received_bytes(),
            "Frame finished"
        );
        self.state = FrameState::Complete { status };
    }
}
