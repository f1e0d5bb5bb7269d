//! Simulated camera: a paced frame generator with packet loss.
//!
//! Frames are generated at `frame_rate`, packetized at `packet_size` and handed
//! out unit by unit. Sequences listed in `drop_sequences` are withheld from the
//! first transmission of every frame; a resend request for them re-emits the
//! units ahead of any new traffic, as a device answering a resend would.

use std::collections::{HashMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Transport, packetize};
use crate::Result;
use crate::types::{DataUnit, FrameInfo, PixelFormat, ResendRequest};

/// Frames kept around for answering resend requests.
const RETAINED_FRAMES: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedCameraConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Image bytes per payload unit
    pub packet_size: usize,
    /// Frames per second; 0 generates frames back to back
    pub frame_rate: f64,
    /// Stop generating after this many frames
    pub frame_count: Option<u64>,
    /// Sequences withheld from the first transmission of each frame
    pub drop_sequences: Vec<u32>,
    pub answer_resends: bool,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            pixel_format: PixelFormat::MONO_8,
            packet_size: 1400,
            frame_rate: 25.0,
            frame_count: None,
            drop_sequences: Vec::new(),
            answer_resends: true,
        }
    }
}

impl SimulatedCameraConfig {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self { width, height, pixel_format, ..Self::default() }
    }

    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo::new(self.width, self.height, self.pixel_format)
    }

    /// Byte length of one generated image.
    pub fn payload_size(&self) -> usize {
        self.frame_info().payload_size()
    }
}

/// Transport generating synthetic frames in-process.
#[derive(Debug)]
pub struct SimulatedCamera {
    config: SimulatedCameraConfig,
    started: Instant,
    next_frame_id: u64,
    next_frame_at: Instant,
    queue: VecDeque<DataUnit>,
    retained: HashMap<u64, Vec<DataUnit>>,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Self {
        let now = Instant::now();
        debug!(
            width = config.width,
            height = config.height,
            frame_rate = config.frame_rate,
            payload_size = config.payload_size(),
            "Simulated camera created"
        );
        Self {
            config,
            started: now,
            next_frame_id: 1,
            next_frame_at: now,
            queue: VecDeque::new(),
            retained: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SimulatedCameraConfig {
        &self.config
    }

    /// Frames generated so far.
    pub fn frames_generated(&self) -> u64 {
        self.next_frame_id - 1
    }

    /// Image content of `frame_id`: a diagonal gradient shifted by the frame id.
    pub fn image(&self, frame_id: u64) -> Vec<u8> {
        let width = self.config.width.max(1) as usize;
        (0..self.config.payload_size())
            .map(|i| ((i % width) + (i / width) + frame_id as usize) as u8)
            .collect()
    }

    fn period(&self) -> Duration {
        if self.config.frame_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.config.frame_rate)
        } else {
            Duration::ZERO
        }
    }

    fn finished(&self) -> bool {
        self.config.frame_count.is_some_and(|count| self.frames_generated() >= count)
    }

    fn generate_frame(&mut self) {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        // late frames shift the schedule instead of bursting to catch up
        self.next_frame_at = Instant::now().max(self.next_frame_at) + self.period();

        let mut info = self.config.frame_info();
        info.timestamp_ns = self.started.elapsed().as_nanos() as u64;
        let units = packetize(frame_id, info, self.image(frame_id), self.config.packet_size);

        let dropped = &self.config.drop_sequences;
        self.queue.extend(units.iter().filter(|u| !dropped.contains(&u.sequence)).cloned());
        trace!(frame_id, units = units.len(), "Frame generated");

        self.retained.insert(frame_id, units);
        if let Some(expired) = frame_id.checked_sub(RETAINED_FRAMES as u64) {
            self.retained.remove(&expired);
        }
    }
}

impl Transport for SimulatedCamera {
    fn receive(&mut self, timeout: Duration) -> Result<Option<DataUnit>> {
        if let Some(unit) = self.queue.pop_front() {
            return Ok(Some(unit));
        }
        if self.finished() {
            thread::sleep(timeout);
            return Ok(None);
        }

        let wait = self.next_frame_at.saturating_duration_since(Instant::now());
        if wait > timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        thread::sleep(wait);
        self.generate_frame();
        Ok(self.queue.pop_front())
    }

    fn request_resend(&mut self, request: &ResendRequest) -> Result<()> {
        if !self.config.answer_resends {
            return Ok(());
        }
        let Some(units) = self.retained.get(&request.frame_id) else {
            debug!(frame_id = request.frame_id, "Resend requested for a forgotten frame");
            return Ok(());
        };
        let resent: Vec<DataUnit> = units.iter().filter(|u| request.range.contains(u.sequence)).cloned().collect();
        trace!(frame_id = request.frame_id, range = %request.range, units = resent.len(), "Resending units");
        for unit in resent.into_iter().rev() {
            self.queue.push_front(unit);
        }
        Ok(())
    }
}
