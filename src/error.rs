//! Error types for the streaming engine.
//!
//! Per-frame failures (timeouts, size mismatches, wrong packet ids) are not
//! errors: they are reported through [`BufferStatus`](crate::BufferStatus) and the
//! stream keeps running. The types here cover what the caller must react to:
//!
//! - **Usage errors**: undersized buffers, operations in the wrong state, a
//!   session closed by transport loss
//! - **Queue outcomes**: a pop that timed out or was cancelled by a stop
//! - **Transport errors**: transient failures and fatal loss of the data link
//! - **Setup errors**: thread spawn failures, configuration files
//!
//! ```rust
//! use camstream::StreamError;
//!
//! let error = StreamError::transport_lost("link down");
//! assert!(!error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Buffer, ThreadState};

/// Result type alias for stream operations.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Main error type for stream operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("Buffer capacity {capacity} is smaller than the payload size {payload_size}")]
    InvalidBuffer { capacity: usize, payload_size: usize },

    #[error("Cannot {operation} while the stream is {state}")]
    InvalidState { operation: &'static str, state: ThreadState },

    #[error("Stream session is closed after transport loss")]
    SessionClosed,

    #[error("No buffer available after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Stream stopped while waiting for a buffer")]
    Cancelled,

    #[error("Input queue is empty")]
    NoBuffersAvailable,

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Transport lost: {reason}")]
    TransportLost {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to spawn acquisition thread")]
    ThreadSpawn {
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Configuration file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Timeout { .. } => true,
            StreamError::NoBuffersAvailable => true,
            StreamError::Transport { .. } => true,
            StreamError::ThreadSpawn { .. } => true,
            StreamError::Cancelled => false,
            StreamError::InvalidBuffer { .. } => false,
            StreamError::InvalidState { .. } => false,
            StreamError::SessionClosed => false,
            StreamError::TransportLost { .. } => false,
            StreamError::Config { .. } => false,
            StreamError::File { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StreamError::InvalidBuffer { .. } => vec![
                "Allocate buffers of at least the current payload size",
                "Check whether the payload size changed after a reconfiguration",
            ],
            StreamError::InvalidState { .. } => vec![
                "Stop the stream before reconfiguring it",
                "Check the session state before starting it again",
            ],
            StreamError::SessionClosed => vec![
                "Recreate the stream session",
                "Check the camera link and transport endpoint",
            ],
            StreamError::Timeout { .. } => vec![
                "Increase the pop timeout",
                "Push more buffers to avoid input underruns",
                "Verify the camera is triggering frames",
            ],
            StreamError::Cancelled => vec![
                "Restart the stream before waiting for buffers",
                "Drain remaining buffers with a non-blocking pop",
            ],
            StreamError::NoBuffersAvailable => vec![
                "Push more buffers into the input queue",
                "Return popped buffers to the stream faster",
            ],
            StreamError::Transport { .. } => vec![
                "Check network interface errors and packet size",
                "Retry the operation",
            ],
            StreamError::TransportLost { .. } => vec![
                "Reconnect to the camera",
                "Recreate the stream session",
                "Check cabling and power of the device",
            ],
            StreamError::ThreadSpawn { .. } => vec![
                "Check process thread limits",
                "Release unused stream sessions",
            ],
            StreamError::Config { .. } => vec![
                "Check configuration field names and types",
                "Compare against the documented defaults",
            ],
            StreamError::File { .. } => vec![
                "Check the configuration file exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for transient transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        StreamError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transient transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        StreamError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for fatal transport loss.
    pub fn transport_lost(reason: impl Into<String>) -> Self {
        StreamError::TransportLost { reason: reason.into(), source: None }
    }

    /// Helper constructor for state violations.
    pub fn invalid_state(operation: &'static str, state: ThreadState) -> Self {
        StreamError::InvalidState { operation, state }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        StreamError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        StreamError::File { path, source }
    }

    /// Whether the transport can no longer deliver data.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::TransportLost { .. })
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Transport { reason: err.kind().to_string(), source: Some(Box::new(err)) }
    }
}

/// A rejected push, handing the buffer back to the caller.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PushError {
    /// The buffer that was not queued
    pub buffer: Buffer,
    #[source]
    pub error: StreamError,
}

impl PushError {
    pub(crate) fn new(buffer: Buffer, error: StreamError) -> Self {
        Self { buffer, error }
    }

    /// Take the buffer back, discarding the error.
    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

impl From<PushError> for StreamError {
    fn from(err: PushError) -> Self {
        err.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            capacity in 0usize..1_000_000usize,
            payload_size in 0usize..1_000_000usize,
            duration_ms in 1u64..60000u64
          ) {
            let transport = StreamError::transport(reason.clone());
            prop_assert!(transport.to_string().contains(&reason));

            let lost = StreamError::transport_lost(reason.clone());
            prop_assert!(lost.to_string().contains(&reason));

            let invalid = StreamError::InvalidBuffer { capacity, payload_size };
            let msg = invalid.to_string();
            prop_assert!(msg.contains(&capacity.to_string()));
            prop_assert!(msg.contains(&payload_size.to_string()));

            let timeout = StreamError::Timeout { duration: Duration::from_millis(duration_ms) };
            prop_assert!(!timeout.to_string().is_empty());
          }

          #[test]
          fn io_errors_keep_their_source(message in ".*") {
            let io_err = std::io::Error::other(message.clone());
            let converted: StreamError = io_err.into();
            match &converted {
              StreamError::Transport { source: Some(source), .. } => {
                prop_assert_eq!(source.to_string(), message);
              }
              _ => prop_assert!(false, "Expected Transport error from io::Error conversion"),
            }
            prop_assert!(converted.is_retryable());
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<StreamError>();
        assert_send_sync_static::<PushError>();

        let error = StreamError::Cancelled;
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        assert!(StreamError::Timeout { duration: Duration::from_millis(5) }.is_retryable());
        assert!(StreamError::NoBuffersAvailable.is_retryable());
        assert!(!StreamError::SessionClosed.is_retryable());
        assert!(!StreamError::invalid_state("reconfigure", ThreadState::Running).is_retryable());
        assert!(StreamError::transport_lost("gone").is_fatal());
        assert!(!StreamError::transport("blip").is_fatal());
    }

    #[test]
    fn every_error_has_suggestions() {
        let errors = [
            StreamError::InvalidBuffer { capacity: 1, payload_size: 2 },
            StreamError::invalid_state("start", ThreadState::Running),
            StreamError::SessionClosed,
            StreamError::Timeout { duration: Duration::ZERO },
            StreamError::Cancelled,
            StreamError::NoBuffersAvailable,
            StreamError::transport("blip"),
            StreamError::transport_lost("gone"),
            StreamError::config("stream", "bad"),
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error:?} has no suggestions");
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
    }

    #[test]
    fn push_error_returns_the_buffer() {
        let buffer = Buffer::new(4);
        let id = buffer.id();
        let err = PushError::new(buffer, StreamError::InvalidBuffer { capacity: 4, payload_size: 8 });
        assert!(err.to_string().contains("payload size 8"));
        assert_eq!(err.into_buffer().id(), id);
    }

    #[test]
    fn invalid_state_message_names_state() {
        let err = StreamError::invalid_state("reconfigure", ThreadState::Running);
        assert_eq!(err.to_string(), "Cannot reconfigure while the stream is running");
    }
}
