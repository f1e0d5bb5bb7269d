//! Acquisition counters shared between the worker and the application

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::BufferStatus;

/// Live counters, updated by the acquisition thread without locking.
#[derive(Debug, Default)]
pub struct StreamStatistics {
    completed_buffers: AtomicU64,
    failures: AtomicU64,
    underruns: AtomicU64,
    timeouts: AtomicU64,
    size_mismatches: AtomicU64,
    wrong_packet_ids: AtomicU64,
    aborted: AtomicU64,
    resend_requests: AtomicU64,
    resend_exhausted: AtomicU64,
    ignored_units: AtomicU64,
    duplicate_units: AtomicU64,
    transport_errors: AtomicU64,
    handler_faults: AtomicU64,
}

/// Point-in-time copy of [`StreamStatistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Buffers completed with SUCCESS
    pub completed_buffers: u64,
    /// Buffers completed with any other status
    pub failures: u64,
    /// Frames dropped because the input queue was empty
    pub underruns: u64,
    pub timeouts: u64,
    pub size_mismatches: u64,
    pub wrong_packet_ids: u64,
    pub aborted: u64,
    /// Resend requests handed to the transport, re-issues included
    pub resend_requests: u64,
    /// Missing ranges given up after the retry cap
    pub resend_exhausted: u64,
    /// Units for frames that are no longer in flight
    pub ignored_units: u64,
    pub duplicate_units: u64,
    pub transport_errors: u64,
    /// Panics caught from the event handler
    pub handler_faults: u64,
}

impl StreamStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_completion(&self, status: BufferStatus) {
        if status == BufferStatus::Success {
            self.completed_buffers.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        let counter = match status {
            BufferStatus::Timeout => &self.timeouts,
            BufferStatus::SizeMismatch => &self.size_mismatches,
            BufferStatus::WrongPacketId => &self.wrong_packet_ids,
            BufferStatus::Aborted => &self.aborted,
            BufferStatus::Success | BufferStatus::Unknown | BufferStatus::Filling => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resend_requests(&self, count: u64) {
        self.resend_requests.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_resend_exhausted(&self, count: u64) {
        self.resend_exhausted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_ignored_unit(&self) {
        self.ignored_units.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate_units(&self, count: u64) {
        self.duplicate_units.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_handler_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            completed_buffers: self.completed_buffers.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            size_mismatches: self.size_mismatches.load(Ordering::Relaxed),
            wrong_packet_ids: self.wrong_packet_ids.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            resend_requests: self.resend_requests.load(Ordering::Relaxed),
            resend_exhausted: self.resend_exhausted.load(Ordering::Relaxed),
            ignored_units: self.ignored_units.load(Ordering::Relaxed),
            duplicate_units: self.duplicate_units.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            handler_faults: self.handler_faults.load(Ordering::Relaxed),
        }
    }
}

impl StatisticsSnapshot {
    /// Buffers delivered to the output queue, whatever their status.
    pub fn delivered(&self) -> u64 {
        self.completed_buffers + self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_statuses_are_split() {
        let stats = StreamStatistics::new();
        stats.record_completion(BufferStatus::Success);
        stats.record_completion(BufferStatus::Success);
        stats.record_completion(BufferStatus::Timeout);
        stats.record_completion(BufferStatus::SizeMismatch);
        stats.record_completion(BufferStatus::Aborted);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed_buffers, 2);
        assert_eq!(snapshot.failures, 3);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.size_mismatches, 1);
        assert_eq!(snapshot.aborted, 1);
        assert_eq!(snapshot.delivered(), 5);
    }

    #[test]
    fn counters_accumulate() {
        let stats = StreamStatistics::new();
        stats.record_underrun();
        stats.record_resend_requests(3);
        stats.record_resend_exhausted(1);
        stats.record_ignored_unit();
        stats.record_duplicate_units(2);
        stats.record_transport_error();
        stats.record_handler_fault();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.underruns, 1);
        assert_eq!(snapshot.resend_requests, 3);
        assert_eq!(snapshot.resend_exhausted, 1);
        assert_eq!(snapshot.ignored_units, 1);
        assert_eq!(snapshot.duplicate_units, 2);
        assert_eq!(snapshot.transport_errors, 1);
        assert_eq!(snapshot.handler_faults, 1);
    }
}
