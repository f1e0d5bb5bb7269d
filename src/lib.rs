//! Buffer acquisition and streaming engine for machine-vision cameras.
//!
//! camstream moves image frames arriving over a packetized transport (GigE
//! Vision or USB3 Vision style) into application-owned buffers in real time. It
//! tolerates packet loss through bounded resend requests and supports payload
//! size changes between acquisitions without recreating buffers that still fit.
//!
//! # Features
//!
//! - **Zero-copy hand-off**: buffers move between the application and the
//!   acquisition thread by ownership, never by copy
//! - **Loss recovery**: missing units are requested again with backoff, then
//!   given up with a SIZE_MISMATCH status instead of stalling the stream
//! - **Callbacks**: INIT, START_BUFFER, BUFFER_DONE and EXIT delivered in order on
//!   the acquisition thread, with handler panics contained
//! - **Async**: tokio helpers for popping buffers without blocking a runtime
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use camstream::transport::SimulatedCameraConfig;
//! use camstream::{Buffer, Camstream, NoopHandler, PixelFormat};
//!
//! # fn main() -> camstream::Result<()> {
//! let camera = SimulatedCameraConfig {
//!     frame_rate: 100.0,
//!     ..SimulatedCameraConfig::new(320, 240, PixelFormat::MONO_8)
//! };
//! let mut stream = Camstream::simulated(camera, NoopHandler)?;
//! for _ in 0..4 {
//!     stream.push_buffer(Buffer::new(stream.payload_size()))?;
//! }
//!
//! stream.start()?;
//! let buffer = stream.timeout_pop_buffer(Duration::from_secs(1))?;
//! println!("frame {:?}: {:?}", buffer.frame_id(), buffer.status());
//! stream.push_buffer(buffer)?;
//! stream.stop(false)?;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
pub mod config;
mod error;
pub mod statistics;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Streaming engine
mod acquisition;
pub mod controller;
pub mod notify;
pub mod pool;
pub mod reassembly;
pub mod transport;

// Core exports
pub use config::{ResendPolicy, StreamConfig};
pub use error::*;
pub use statistics::{StatisticsSnapshot, StreamStatistics};
pub use types::*;

// Main API exports
pub use controller::StreamController;
pub use notify::{ContextHandler, EventHandler, NoopHandler, with_context};
pub use pool::{BufferCounts, BufferPool};

use transport::{ChannelTransport, SimulatedCamera, SimulatedCameraConfig, TransportFeed};

/// Entry point for stream sessions over the in-process transports.
///
/// Sessions over a device transport are created with
/// [`StreamController::create`] directly.
pub struct Camstream;

impl Camstream {
    /// Session fed unit by unit through the returned [`TransportFeed`].
    ///
    /// ```rust
    /// use camstream::{Camstream, NoopHandler, StreamConfig};
    ///
    /// # fn main() -> camstream::Result<()> {
    /// let (stream, feed) = Camstream::channel(StreamConfig::new(4096), NoopHandler)?;
    /// # let _ = (stream, feed);
    /// # Ok(())
    /// # }
    /// ```
    pub fn channel<H: EventHandler>(config: StreamConfig, handler: H) -> Result<(StreamController, TransportFeed)> {
        let (transport, feed) = ChannelTransport::pair();
        let stream = StreamController::create(config, transport, handler)?;
        Ok((stream, feed))
    }

    /// Session over a simulated camera, sized for its geometry.
    pub fn simulated<H: EventHandler>(camera: SimulatedCameraConfig, handler: H) -> Result<StreamController> {
        let config = StreamConfig::new(camera.payload_size()).with_packet_size(camera.packet_size);
        StreamController::create(config, SimulatedCamera::new(camera), handler)
    }
}
