//! Packet reassembly: turns data units into completed buffers.
//!
//! The reassembler keeps one [`InFlightFrame`](frame::InFlightFrame) per frame
//! being filled. It performs no I/O and reads no clock: the acquisition thread
//! passes `now` in, sends the returned resend requests and completes the
//! returned buffers into the output queue in the order they are handed back.
//!
//! Per frame:
//!
//! - a unit at the expected sequence is written at its offset and the counter
//!   advances; a unit ahead of it is written too, and the skipped range is
//!   requested again
//! - the trailer finishes the frame once no request is outstanding: SUCCESS when
//!   the received byte count equals the payload size, SIZE_MISMATCH otherwise
//! - an overflowing unit ends the frame with SIZE_MISMATCH, an impossible
//!   sequence with WRONG_PACKET_ID
//! - no unit within the frame timeout ends it with TIMEOUT
//! - unanswered requests are re-issued with backoff until the retry cap, then
//!   given up
//!
//! Frame ids are not assumed to increase. Only ids among the last
//! [`FINISHED_HISTORY`] finished or dropped frames count as stale, so a block id
//! that wraps or restarts begins new frames again.

mod frame;
mod resend;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::config::StreamConfig;
use crate::statistics::StreamStatistics;
use crate::types::{Buffer, BufferStatus, DataUnit, ResendRequest};

use frame::{FrameRules, InFlightFrame};
#[cfg(test)]
use frame::FrameState;

/// Finished or dropped frame ids remembered for routing late units.
pub const FINISHED_HISTORY: usize = 32;

/// Where a unit belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The frame is being reassembled
    InFlight,
    /// First unit seen for a frame that is neither in flight nor finished
    NewFrame,
    /// The frame recently completed or was dropped
    Stale,
}

/// A frame that left reassembly, with the status its buffer completes with.
#[derive(Debug)]
pub struct CompletedFrame {
    pub buffer: Buffer,
    pub status: BufferStatus,
}

/// Work produced by one reassembler call.
#[derive(Debug, Default)]
pub struct Progress {
    /// Requests to hand to the transport, first issues and re-issues
    pub requests: Vec<ResendRequest>,
    /// Frames in completion order
    pub completed: Vec<CompletedFrame>,
}

impl Progress {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.completed.is_empty()
    }
}

/// I/O free reassembly state for every in-flight frame of a stream.
#[derive(Debug)]
pub struct PacketReassembler {
    rules: FrameRules,
    max_in_flight: usize,
    /// Oldest first
    frames: VecDeque<InFlightFrame>,
    /// Most recent last
    finished: VecDeque<u64>,
    statistics: Arc<StreamStatistics>,
}

impl PacketReassembler {
    pub fn new(config: &StreamConfig, statistics: Arc<StreamStatistics>) -> Self {
        Self {
            rules: FrameRules {
                payload_size: config.payload_size,
                frame_timeout: config.frame_timeout(),
                resend: config.resend.clone(),
            },
            max_in_flight: config.max_frames_in_flight.max(1),
            frames: VecDeque::with_capacity(config.max_frames_in_flight),
            finished: VecDeque::with_capacity(FINISHED_HISTORY),
            statistics,
        }
    }

    pub fn route(&self, frame_id: u64) -> Route {
        if self.frames.iter().any(|f| f.frame_id() == frame_id) {
            Route::InFlight
        } else if self.finished.contains(&frame_id) {
            Route::Stale
        } else {
            Route::NewFrame
        }
    }

    /// Start reassembling `frame_id` into `buffer`.
    ///
    /// When the in-flight limit is reached the oldest frame is forced out first
    /// and returned in `completed`. `frame_id` must route as [`Route::NewFrame`].
    pub fn begin_frame(&mut self, frame_id: u64, buffer: Buffer, now: Instant) -> Progress {
        debug_assert_eq!(self.route(frame_id), Route::NewFrame);
        let mut progress = Progress::default();

        while self.frames.len() >= self.max_in_flight {
            let Some(mut oldest) = self.frames.pop_front() else {
                break;
            };
            let status = oldest.forced_status();
            debug!(
                frame_id = oldest.frame_id(),
                next_frame = frame_id,
                ?status,
                "Too many frames in flight, forcing out the oldest"
            );
            oldest.terminate(status);
            self.remember(oldest.frame_id());
            progress.completed.push(CompletedFrame { status, buffer: oldest.into_buffer() });
        }

        trace!(frame_id, buffer = %buffer.id(), "Frame started");
        self.frames.push_back(InFlightFrame::new(frame_id, buffer, self.rules.payload_size, now));
        progress
    }

    /// Record a frame dropped for lack of a buffer, so its later units are stale.
    pub fn skip_frame(&mut self, frame_id: u64) {
        self.remember(frame_id);
    }

    /// Buffer currently filled for `frame_id`.
    pub fn buffer(&self, frame_id: u64) -> Option<&Buffer> {
        self.frames.iter().find(|f| f.frame_id() == frame_id).map(InFlightFrame::buffer)
    }

    /// Feed one unit to its frame. Units without an in-flight frame are counted
    /// and dropped.
    pub fn on_unit(&mut self, unit: DataUnit, now: Instant) -> Progress {
        let mut progress = Progress::default();
        let Some(index) = self.frames.iter().position(|f| f.frame_id() == unit.frame_id) else {
            trace!(frame_id = unit.frame_id, sequence = unit.sequence, "Unit for no in-flight frame");
            self.statistics.record_ignored_unit();
            return progress;
        };

        let frame = &mut self.frames[index];
        frame.accept(unit, now, &self.rules, &self.statistics, &mut progress.requests);
        if frame.status().is_some() {
            self.take_completed(index, &mut progress);
        }
        progress
    }

    /// Service frame timeouts and resend deadlines up to `now`.
    pub fn poll(&mut self, now: Instant) -> Progress {
        let mut progress = Progress::default();
        for frame in self.frames.iter_mut() {
            frame.poll(now, &self.rules, &self.statistics, &mut progress.requests);
        }
        let mut index = 0;
        while index < self.frames.len() {
            if self.frames[index].status().is_some() {
                self.take_completed(index, &mut progress);
            } else {
                index += 1;
            }
        }
        progress
    }

    /// End every in-flight frame as ABORTED, dropping its pending requests.
    pub fn abort_all(&mut self) -> Vec<CompletedFrame> {
        let mut aborted = Vec::with_capacity(self.frames.len());
        while let Some(mut frame) = self.frames.pop_front() {
            frame.terminate(BufferStatus::Aborted);
            let status = frame.status().unwrap_or(BufferStatus::Aborted);
            self.remember(frame.frame_id());
            aborted.push(CompletedFrame { status, buffer: frame.into_buffer() });
        }
        aborted
    }

    /// Earliest frame timeout or request deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.frames.iter().filter_map(|f| f.next_deadline(&self.rules)).min()
    }

    pub fn in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn payload_size(&self) -> usize {
        self.rules.payload_size
    }

    fn take_completed(&mut self, index: usize, progress: &mut Progress) {
        if let Some(frame) = self.frames.remove(index) {
            let status = frame.status().unwrap_or(BufferStatus::Unknown);
            debug!(frame_id = frame.frame_id(), buffer = %frame.buffer().id(), ?status, "Frame completed");
            self.remember(frame.frame_id());
            progress.completed.push(CompletedFrame { status, buffer: frame.into_buffer() });
        }
    }

    fn remember(&mut self, frame_id: u64) {
        if self.finished.contains(&frame_id) {
            return;
        }
        if self.finished.len() == FINISHED_HISTORY {
            self.finished.pop_front();
        }
        self.finished.push_back(frame_id);
    }

    #[cfg(test)]
    fn state_of(&self, frame_id: u64) -> Option<&FrameState> {
        self.frames.iter().find(|f| f.frame_id() == frame_id).map(InFlightFrame::state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResendPolicy;
    use crate::test_utils::{frame_units, pattern};
    use crate::types::{FrameInfo, PixelFormat, SequenceRange};
    use std::time::Duration;

    const PAYLOAD: usize = 12;

    fn config() -> StreamConfig {
        StreamConfig::new(PAYLOAD)
            .with_packet_size(4)
            .with_frame_timeout(Duration::from_millis(100))
            .with_resend(ResendPolicy {
                max_attempts: 3,
                initial_timeout_ms: 10,
                backoff_factor: 2.0,
                max_timeout_ms: 40,
                ..ResendPolicy::default()
            })
    }

    fn reassembler(config: &StreamConfig) -> (PacketReassembler, Arc<StreamStatistics>) {
        let statistics = Arc::new(StreamStatistics::new());
        (PacketReassembler::new(config, Arc::clone(&statistics)), statistics)
    }

    /// leader, three 4-byte payload units, trailer at sequence 4
    fn units(frame_id: u64) -> Vec<DataUnit> {
        frame_units(frame_id, FrameInfo::new(3, 4, PixelFormat::MONO_8), &pattern(PAYLOAD, frame_id), 4)
    }

    fn feed(r: &mut PacketReassembler, units: Vec<DataUnit>, now: Instant) -> Progress {
        let mut all = Progress::default();
        for unit in units {
            if r.route(unit.frame_id) == Route::NewFrame {
                let started = r.begin_frame(unit.frame_id, Buffer::new(PAYLOAD), now);
                all.completed.extend(started.completed);
            }
            let progress = r.on_unit(unit, now);
            all.requests.extend(progress.requests);
            all.completed.extend(progress.completed);
        }
        all
    }

    #[test]
    fn in_order_frame_succeeds() {
        let _ = tracing_subscriber::fmt::try_init();
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();

        let progress = feed(&mut r, units(1), now);
        assert!(progress.requests.is_empty());
        assert_eq!(progress.completed.len(), 1);
        let done = &progress.completed[0];
        assert_eq!(done.status, BufferStatus::Success);
        assert_eq!(done.buffer.image_data(), pattern(PAYLOAD, 1).as_slice());
        assert_eq!(done.buffer.frame_info().map(|i| i.width), Some(3));
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn gap_is_requested_and_filled() {
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();
        let mut units = units(1);
        let missing = units.remove(2);

        let progress = feed(&mut r, units, now);
        assert_eq!(progress.requests.len(), 1);
        assert_eq!(progress.requests[0].range, SequenceRange::single(2));
        assert_eq!(progress.requests[0].attempts, 1);
        assert!(progress.completed.is_empty());
        assert!(matches!(r.state_of(1), Some(FrameState::AwaitingResend { .. })));

        let progress = r.on_unit(missing, now + Duration::from_millis(5));
        assert_eq!(progress.completed.len(), 1);
        assert_eq!(progress.completed[0].status, BufferStatus::Success);
    }

    #[test]
    fn exhausted_requests_end_in_size_mismatch() {
        let (mut r, statistics) = reassembler(&config());
        let t0 = Instant::now();
        let mut units = units(1);
        units.remove(2);

        let mut issued = feed(&mut r, units, t0).requests.len();
        assert_eq!(r.next_deadline(), Some(t0 + Duration::from_millis(10)));

        let progress = r.poll(t0 + Duration::from_millis(10));
        issued += progress.requests.len();
        assert_eq!(progress.requests[0].attempts, 2);
        let progress = r.poll(t0 + Duration::from_millis(30));
        issued += progress.requests.len();
        assert_eq!(progress.requests[0].attempts, 3);

        let progress = r.poll(t0 + Duration::from_millis(70));
        assert!(progress.requests.is_empty());
        assert_eq!(progress.completed.len(), 1);
        assert_eq!(progress.completed[0].status, BufferStatus::SizeMismatch);
        assert_eq!(progress.completed[0].buffer.received_bytes(), 8);
        assert_eq!(issued, 3);
        assert_eq!(statistics.snapshot().resend_exhausted, 1);
    }

    #[test]
    fn disabled_resend_gives_up_at_once() {
        let config = config().with_resend(ResendPolicy::disabled());
        let (mut r, statistics) = reassembler(&config);
        let mut units = units(1);
        units.remove(1);

        let progress = feed(&mut r, units, Instant::now());
        assert!(progress.requests.is_empty());
        assert_eq!(progress.completed[0].status, BufferStatus::SizeMismatch);
        assert_eq!(statistics.snapshot().resend_exhausted, 1);
    }

    #[test]
    fn overflowing_unit_is_a_size_mismatch() {
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();
        let mut units = units(1);
        units[3] = DataUnit::payload(1, 3, 10, vec![0u8; 4]);

        let progress = feed(&mut r, units, now);
        assert_eq!(progress.completed.len(), 1);
        assert_eq!(progress.completed[0].status, BufferStatus::SizeMismatch);
        // trailer of a finished frame is stale
        assert_eq!(r.route(1), Route::Stale);
    }

    #[test]
    fn impossible_sequences_are_wrong_packet_ids() {
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();
        let info = FrameInfo::new(3, 4, PixelFormat::MONO_8);

        let mut leader = DataUnit::leader(1, info);
        leader.sequence = 2;
        let progress = feed(&mut r, vec![leader], now);
        assert_eq!(progress.completed[0].status, BufferStatus::WrongPacketId);

        let progress = feed(
            &mut r,
            vec![DataUnit::leader(2, info), DataUnit::trailer(2, 2), DataUnit::payload(2, 3, 0, vec![1u8])],
            now,
        );
        assert_eq!(progress.completed.len(), 1);
        assert_eq!(progress.completed[0].status, BufferStatus::WrongPacketId);
    }

    #[test]
    fn duplicates_are_counted_once() {
        let (mut r, statistics) = reassembler(&config());
        let now = Instant::now();
        let mut units = units(1);
        let repeated = units[1].clone();
        units.insert(2, repeated);

        let progress = feed(&mut r, units, now);
        assert_eq!(progress.completed[0].status, BufferStatus::Success);
        assert_eq!(statistics.snapshot().duplicate_units, 1);
    }

    #[test]
    fn silent_frame_times_out() {
        let (mut r, _) = reassembler(&config());
        let t0 = Instant::now();
        let mut units = units(1);
        units.truncate(2);
        feed(&mut r, units, t0);

        assert!(r.poll(t0 + Duration::from_millis(99)).completed.is_empty());
        let progress = r.poll(t0 + Duration::from_millis(100));
        assert_eq!(progress.completed[0].status, BufferStatus::Timeout);
    }

    #[test]
    fn oldest_frame_is_forced_out() {
        let config = config().with_max_frames_in_flight(2);
        let (mut r, _) = reassembler(&config);
        let now = Instant::now();
        let mut first = units(1);
        first.truncate(2);
        let mut second = units(2);
        second.truncate(2);

        assert!(feed(&mut r, first, now).completed.is_empty());
        assert!(feed(&mut r, second, now).completed.is_empty());
        let progress = feed(&mut r, units(3), now);
        assert_eq!(progress.completed.len(), 2);
        assert_eq!(progress.completed[0].buffer.frame_id(), Some(1));
        assert_eq!(progress.completed[0].status, BufferStatus::Timeout);
        assert_eq!(progress.completed[1].buffer.frame_id(), Some(3));
        assert_eq!(r.in_flight(), 1);
    }

    #[test]
    fn stale_and_skipped_frames_are_ignored() {
        let (mut r, statistics) = reassembler(&config());
        let now = Instant::now();
        feed(&mut r, units(1), now);
        r.skip_frame(2);

        assert_eq!(r.route(1), Route::Stale);
        assert_eq!(r.route(2), Route::Stale);
        assert_eq!(r.route(3), Route::NewFrame);
        assert!(r.on_unit(DataUnit::trailer(2, 4), now).is_empty());
        assert_eq!(statistics.snapshot().ignored_units, 1);
    }

    #[test]
    fn wrapped_frame_ids_start_new_frames() {
        let (mut r, statistics) = reassembler(&config());
        let now = Instant::now();

        let mut completed = feed(&mut r, units(65535), now).completed;
        for frame_id in 1..=3 {
            completed.extend(feed(&mut r, units(frame_id), now).completed);
        }
        let ids: Vec<Option<u64>> = completed.iter().map(|c| c.buffer.frame_id()).collect();
        assert_eq!(ids, vec![Some(65535), Some(1), Some(2), Some(3)]);
        assert!(completed.iter().all(|c| c.status == BufferStatus::Success));
        assert_eq!(statistics.snapshot().ignored_units, 0);
        assert_eq!(r.route(65535), Route::Stale);
    }

    #[test]
    fn finished_history_is_bounded() {
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();
        for frame_id in 1..=FINISHED_HISTORY as u64 {
            feed(&mut r, units(frame_id), now);
        }
        assert_eq!(r.route(1), Route::Stale);

        r.skip_frame(1000);
        assert_eq!(r.route(1000), Route::Stale);
        assert_eq!(r.route(1), Route::NewFrame);
        assert_eq!(r.route(2), Route::Stale);
    }

    #[test]
    fn abort_discards_pending_requests() {
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();
        let mut units = units(1);
        units.remove(1);
        feed(&mut r, units, now);

        let aborted = r.abort_all();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].status, BufferStatus::Aborted);
        assert_eq!(r.next_deadline(), None);
        assert!(r.poll(now + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn completion_order_ignores_resend_activity() {
        let (mut r, _) = reassembler(&config());
        let now = Instant::now();
        let mut first = units(1);
        let late = first.remove(2);

        feed(&mut r, first, now);
        let progress = feed(&mut r, units(2), now);
        assert_eq!(progress.completed[0].buffer.frame_id(), Some(2));

        let progress = r.on_unit(late, now);
        assert_eq!(progress.completed[0].buffer.frame_id(), Some(1));
        assert_eq!(progress.completed[0].status, BufferStatus::Success);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
          #[test]
          fn every_started_frame_completes_exactly_once(
            frames in 1u64..6,
            drops in prop::collection::vec(any::<bool>(), 30),
            steps in 0u64..12
          ) {
            let (mut r, _) = reassembler(&config());
            let t0 = Instant::now();
            let mut drops = drops.into_iter().cycle();
            let mut started = HashSet::new();
            let mut completed = Vec::new();

            for frame_id in 1..=frames {
                let kept: Vec<DataUnit> = units(frame_id)
                    .into_iter()
                    .filter(|_| !drops.next().unwrap_or(false))
                    .collect();
                for unit in kept {
                    if r.route(unit.frame_id) == Route::NewFrame {
                        started.insert(unit.frame_id);
                        completed.extend(r.begin_frame(unit.frame_id, Buffer::new(PAYLOAD), t0).completed);
                    }
                    completed.extend(r.on_unit(unit, t0).completed);
                }
            }
            for step in 1..=steps {
                completed.extend(r.poll(t0 + Duration::from_millis(step * 10)).completed);
            }
            completed.extend(r.abort_all());

            let ids: Vec<u64> = completed.iter().filter_map(|c| c.buffer.frame_id()).collect();
            let unique: HashSet<u64> = ids.iter().copied().collect();
            prop_assert_eq!(ids.len(), unique.len());
            prop_assert_eq!(unique, started);
            prop_assert!(completed.iter().all(|c| c.status.is_terminal()));
            prop_assert!(completed
                .iter()
                .filter(|c| c.status == BufferStatus::Success)
                .all(|c| c.buffer.received_bytes() == PAYLOAD));
          }
        }
    }
}
