//! Stream notification kinds

use serde::{Deserialize, Serialize};

/// Event delivered to the stream callback on the acquisition thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamEvent {
    /// The acquisition thread started (no buffer)
    Init,
    /// A buffer was taken from the input queue for a new frame
    StartBuffer,
    /// A buffer reached a terminal status and is about to enter the output queue
    BufferDone,
    /// The acquisition thread is exiting (no buffer)
    Exit,
}

impl StreamEvent {
    /// Whether this event carries a buffer.
    pub fn has_buffer(self) -> bool {
        matches!(self, StreamEvent::StartBuffer | StreamEvent::BufferDone)
    }
}

impl std::fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamEvent::Init => "init",
            StreamEvent::StartBuffer => "start-buffer",
            StreamEvent::BufferDone => "buffer-done",
            StreamEvent::Exit => "exit",
        };
        f.write_str(name)
    }
}
