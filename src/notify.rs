//! Synchronous event dispatch to the application handler.
//!
//! Events are delivered on the acquisition thread in the order they happen.
//! No engine lock is held while the handler runs, so a handler may push and pop
//! buffers through a shared [`BufferPool`](crate::BufferPool). A slow handler
//! slows ingestion down; a panicking handler is caught, logged and counted.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::statistics::StreamStatistics;
use crate::types::{Buffer, StreamEvent};

/// Receiver of stream lifecycle and per-buffer events.
///
/// `buffer` is `Some` for [`StreamEvent::StartBuffer`] and
/// [`StreamEvent::BufferDone`], `None` for [`StreamEvent::Init`] and
/// [`StreamEvent::Exit`].
pub trait EventHandler: Send + 'static {
    fn on_event(&mut self, event: StreamEvent, buffer: Option<&Buffer>);
}

impl<F> EventHandler for F
where
    F: FnMut(StreamEvent, Option<&Buffer>) + Send + 'static,
{
    fn on_event(&mut self, event: StreamEvent, buffer: Option<&Buffer>) {
        self(event, buffer)
    }
}

/// Handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&mut self, _event: StreamEvent, _buffer: Option<&Buffer>) {}
}

/// Handler carrying a user context passed to every call.
pub struct ContextHandler<C, F> {
    context: C,
    callback: F,
}

impl<C, F> ContextHandler<C, F> {
    /// Recover the context, e.g. after the stream was dropped.
    pub fn into_context(self) -> C {
        self.context
    }
}

impl<C, F> EventHandler for ContextHandler<C, F>
where
    C: Send + 'static,
    F: FnMut(StreamEvent, Option<&Buffer>, &mut C) + Send + 'static,
{
    fn on_event(&mut self, event: StreamEvent, buffer: Option<&Buffer>) {
        (self.callback)(event, buffer, &mut self.context)
    }
}

/// Build a handler that receives `&mut context` along with each event.
///
/// ```rust
/// use camstream::{StreamEvent, with_context};
///
/// let handler = with_context(0u64, |event, _buffer, done: &mut u64| {
///     if event == StreamEvent::BufferDone {
///         *done += 1;
///     }
/// });
/// # let _ = handler;
/// ```
pub fn with_context<C, F>(context: C, callback: F) -> ContextHandler<C, F>
where
    C: Send + 'static,
    F: FnMut(StreamEvent, Option<&Buffer>, &mut C) + Send + 'static,
{
    ContextHandler { context, callback }
}

/// Owned by the acquisition thread; isolates the engine from handler faults.
pub(crate) struct NotificationChannel {
    handler: Box<dyn EventHandler>,
    statistics: Arc<StreamStatistics>,
}

impl NotificationChannel {
    pub(crate) fn new(handler: Box<dyn EventHandler>, statistics: Arc<StreamStatistics>) -> Self {
        Self { handler, statistics }
    }

    pub(crate) fn dispatch(&mut self, event: StreamEvent, buffer: Option<&Buffer>) {
        let handler = &mut self.handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.on_event(event, buffer)));
        if let Err(panic) = outcome {
            self.statistics.record_handler_fault();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(%event, buffer = ?buffer.map(Buffer::id), "Stream event handler panicked: {}", message);
        }
    }

    /// Hand the handler back once the acquisition thread is done with it.
    pub(crate) fn into_handler(self) -> Box<dyn EventHandler> {
        self.handler
    }
}
