//! In-process transport backed by crossbeam channels

use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::debug;

use super::{Transport, packetize};
use crate::types::{DataUnit, FrameInfo, ResendRequest};
use crate::{Result, StreamError};

#[derive(Debug)]
enum Inbound {
    Unit(DataUnit),
    Error(String),
}

/// Stream side of an in-process link.
///
/// Dropping the paired [`TransportFeed`] is seen as a fatal transport loss once
/// the units already sent have been received.
#[derive(Debug)]
pub struct ChannelTransport {
    inbound: Receiver<Inbound>,
    resends: Sender<ResendRequest>,
}

/// Device side of an in-process link: sends units, receives resend requests.
#[derive(Debug, Clone)]
pub struct TransportFeed {
    inbound: Sender<Inbound>,
    resends: Receiver<ResendRequest>,
}

impl ChannelTransport {
    /// Unbounded link.
    pub fn pair() -> (ChannelTransport, TransportFeed) {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let (resend_tx, resend_rx) = crossbeam_channel::unbounded();
        Self::assemble(inbound_tx, inbound_rx, resend_tx, resend_rx)
    }

    /// Link holding at most `capacity` undelivered units; the feed blocks when full.
    pub fn bounded(capacity: usize) -> (ChannelTransport, TransportFeed) {
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(capacity);
        let (resend_tx, resend_rx) = crossbeam_channel::unbounded();
        Self::assemble(inbound_tx, inbound_rx, resend_tx, resend_rx)
    }

    fn assemble(
        inbound_tx: Sender<Inbound>,
        inbound_rx: Receiver<Inbound>,
        resend_tx: Sender<ResendRequest>,
        resend_rx: Receiver<ResendRequest>,
    ) -> (ChannelTransport, TransportFeed) {
        (
            ChannelTransport { inbound: inbound_rx, resends: resend_tx },
            TransportFeed { inbound: inbound_tx, resends: resend_rx },
        )
    }
}

impl Transport for ChannelTransport {
    fn receive(&mut self, timeout: Duration) -> Result<Option<DataUnit>> {
        match self.inbound.recv_timeout(timeout) {
            Ok(Inbound::Unit(unit)) => Ok(Some(unit)),
            Ok(Inbound::Error(reason)) => Err(StreamError::transport(reason)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Transport feed dropped");
                Err(StreamError::transport_lost("transport feed dropped"))
            }
        }
    }

    fn request_resend(&mut self, request: &ResendRequest) -> Result<()> {
        self.resends
            .send(request.clone())
            .map_err(|_| StreamError::transport_lost("transport feed dropped"))
    }
}

impl TransportFeed {
    /// Deliver one unit to the stream.
    pub fn send(&self, unit: DataUnit) -> Result<()> {
        self.inbound.send(Inbound::Unit(unit)).map_err(|_| StreamError::transport("stream side closed"))
    }

    /// Packetize and deliver a whole frame.
    pub fn send_frame(
        &self,
        frame_id: u64,
        info: FrameInfo,
        image: impl Into<Bytes>,
        packet_size: usize,
    ) -> Result<()> {
        for unit in packetize(frame_id, info, image, packet_size) {
            self.send(unit)?;
        }
        Ok(())
    }

    /// Make the next receive fail with a transient transport error.
    pub fn inject_error(&self, reason: impl Into<String>) -> Result<()> {
        self.inbound
            .send(Inbound::Error(reason.into()))
            .map_err(|_| StreamError::transport("stream side closed"))
    }

    /// Next pending resend request, if any.
    pub fn try_recv_resend(&self) -> Option<ResendRequest> {
        match self.resends.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for a resend request.
    pub fn recv_resend_timeout(&self, timeout: Duration) -> Option<ResendRequest> {
        self.resends.recv_timeout(timeout).ok()
    }

    /// Units sent but not yet received by the stream.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }
}
