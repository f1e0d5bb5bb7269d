//! Transport boundary between the acquisition thread and the camera link.
//!
//! A transport hands over decoded [`DataUnit`]s and accepts
//! [`ResendRequest`]s. Wire decoding (GVSP, UVSP) lives behind this trait and is
//! not part of the engine. Two in-process implementations are provided:
//!
//! - [`ChannelTransport`], fed unit by unit through a [`TransportFeed`]
//! - [`SimulatedCamera`], a paced frame generator that drops and resends units

mod channel;
mod packetize;
mod simulated;

use std::time::Duration;

use crate::Result;
use crate::types::{DataUnit, ResendRequest};

pub use channel::{ChannelTransport, TransportFeed};
pub use packetize::packetize;
pub use simulated::{SimulatedCamera, SimulatedCameraConfig};

/// Source of data units for one stream session.
///
/// The transport is moved onto the acquisition thread at `start` and handed
/// back at `stop`, so implementations only need to be `Send`.
pub trait Transport: Send + 'static {
    /// Wait up to `timeout` for the next unit.
    ///
    /// Returns:
    /// - `Ok(Some(unit))` - A unit arrived
    /// - `Ok(None)` - Nothing arrived within `timeout`
    /// - `Err(e)` - Transient failure, or [`StreamError::TransportLost`](crate::StreamError::TransportLost)
    ///   when the link is gone for good
    fn receive(&mut self, timeout: Duration) -> Result<Option<DataUnit>>;

    /// Ask the device to retransmit a missing range.
    fn request_resend(&mut self, request: &ResendRequest) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn receive(&mut self, timeout: Duration) -> Result<Option<DataUnit>> {
        (**self).receive(timeout)
    }

    fn request_resend(&mut self, request: &ResendRequest) -> Result<()> {
        (**self).request_resend(request)
    }
}
