//! Core data types shared by the pool, the reassembler and the controller.
//!
//! - [`Buffer`] is the application-owned memory a frame is written into
//! - [`DataUnit`] is one decoded packet handed over by a transport
//! - [`ResendRequest`] asks the transport to retransmit a missing range
//! - [`StreamEvent`] and [`ThreadState`] describe the acquisition lifecycle

mod buffer;
mod event;
mod frame;
mod state;
mod unit;

pub use buffer::{Buffer, BufferId, BufferStatus, Membership};
pub use event::StreamEvent;
pub use frame::{FrameInfo, PixelFormat};
pub use state::ThreadState;
pub use unit::{DataUnit, ResendRequest, SequenceRange, UnitKind};
