//! Stream session façade.
//!
//! A [`StreamController`] owns one session: its buffer pool, its configuration
//! and, while running, its acquisition thread. It is created STOPPED; `start`
//! and `stop` are the only transitions between STOPPED and RUNNING. Payload-size
//! changes are only accepted while STOPPED.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionThread, ExitReason, WorkerParts};
use crate::config::StreamConfig;
use crate::error::PushError;
use crate::notify::EventHandler;
use crate::pool::{BufferCounts, BufferPool};
use crate::statistics::{StatisticsSnapshot, StreamStatistics};
use crate::transport::Transport;
use crate::types::{Buffer, ThreadState};
use crate::{Result, StreamError};

/// Transport and handler while no thread owns them.
struct Idle {
    transport: Box<dyn Transport>,
    handler: Box<dyn EventHandler>,
}

/// One stream session.
///
/// ```rust
/// use std::time::Duration;
/// use camstream::transport::ChannelTransport;
/// use camstream::{Buffer, FrameInfo, NoopHandler, PixelFormat, StreamConfig, StreamController};
///
/// # fn main() -> camstream::Result<()> {
/// let info = FrameInfo::new(64, 32, PixelFormat::MONO_8);
/// let (transport, feed) = ChannelTransport::pair();
/// let mut stream = StreamController::create(StreamConfig::new(info.payload_size()), transport, NoopHandler)?;
///
/// for _ in 0..4 {
///     stream.push_buffer(Buffer::new(info.payload_size()))?;
/// }
/// stream.start()?;
/// feed.send_frame(1, info, vec![7u8; info.payload_size()], 1024)?;
///
/// let buffer = stream.timeout_pop_buffer(Duration::from_secs(1))?;
/// assert!(buffer.is_success());
/// stream.push_buffer(buffer)?;
/// stream.stop(false)?;
/// # Ok(())
/// # }
/// ```
pub struct StreamController {
    config: StreamConfig,
    pool: Arc<BufferPool>,
    statistics: Arc<StreamStatistics>,
    state: Arc<Mutex<ThreadState>>,
    idle: Option<Idle>,
    thread: Option<AcquisitionThread>,
}

impl StreamController {
    /// Create a STOPPED session with its own buffer pool.
    pub fn create<T, H>(config: StreamConfig, transport: T, handler: H) -> Result<Self>
    where
        T: Transport,
        H: EventHandler,
    {
        config.validate()?;
        let pool = BufferPool::shared(config.payload_size);
        Self::create_with_pool(config, pool, transport, handler)
    }

    /// Create a STOPPED session around an application-held pool.
    ///
    /// Sharing the pool lets an event handler push and pop buffers from inside
    /// its callbacks.
    pub fn create_with_pool<T, H>(config: StreamConfig, pool: Arc<BufferPool>, transport: T, handler: H) -> Result<Self>
    where
        T: Transport,
        H: EventHandler,
    {
        config.validate()?;
        if pool.payload_size() != config.payload_size {
            return Err(StreamError::config(
                "payload_size",
                format!("pool expects {} bytes, configuration {}", pool.payload_size(), config.payload_size),
            ));
        }
        if pool.is_closed() {
            return Err(StreamError::SessionClosed);
        }

        debug!(payload_size = config.payload_size, packet_size = config.packet_size, "Stream session created");
        Ok(Self {
            config,
            pool,
            statistics: Arc::new(StreamStatistics::new()),
            state: Arc::new(Mutex::new(ThreadState::Stopped)),
            idle: Some(Idle { transport: Box::new(transport), handler: Box::new(handler) }),
            thread: None,
        })
    }

    /// Spawn the acquisition thread. Returns once INIT has been delivered.
    pub fn start(&mut self) -> Result<()> {
        if self.pool.is_closed() {
            return Err(StreamError::SessionClosed);
        }
        let state = self.state();
        if state != ThreadState::Stopped {
            return Err(StreamError::invalid_state("start", state));
        }
        let Some(Idle { transport, handler }) = self.idle.take() else {
            return Err(StreamError::SessionClosed);
        };

        *self.state.lock() = ThreadState::Starting;
        self.pool.set_streaming(true);
        let parts = WorkerParts {
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            transport,
            handler,
            statistics: Arc::clone(&self.statistics),
            state: Arc::clone(&self.state),
        };

        match AcquisitionThread::spawn(parts) {
            Ok(thread) => {
                self.thread = Some(thread);
                info!(thread = %self.config.thread_name, "Stream started");
                Ok(())
            }
            Err(e) => {
                // the transport and handler went down with the failed spawn
                self.pool.close();
                *self.state.lock() = ThreadState::Stopped;
                Err(e)
            }
        }
    }

    /// Stop the acquisition thread and wait for it to exit.
    ///
    /// In-flight frames complete as ABORTED and EXIT is delivered before this
    /// returns. With `flush`, completed buffers go back to the input queue.
    /// Stopping a STOPPED session does nothing.
    pub fn stop(&mut self, flush: bool) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        *self.state.lock() = ThreadState::Stopping;
        let report = thread.stop();
        self.pool.set_streaming(false);

        match report {
            Some(report) => {
                if let ExitReason::TransportLost(e) = &report.exit {
                    warn!("Stream had stopped on transport loss: {}", e);
                }
                self.idle = Some(Idle { transport: report.transport, handler: report.handler });
            }
            None => self.pool.close(),
        }
        *self.state.lock() = ThreadState::Stopped;

        if flush {
            self.pool.flush();
        }
        info!(statistics = ?self.statistics.snapshot(), "Stream stopped");
        Ok(())
    }

    /// Change the expected payload size.
    ///
    /// Only valid while STOPPED. Input buffers too small for the new size are
    /// removed and returned.
    pub fn reconfigure(&mut self, payload_size: usize) -> Result<Vec<Buffer>> {
        let state = self.state();
        if state != ThreadState::Stopped {
            return Err(StreamError::invalid_state("reconfigure", state));
        }
        if payload_size == 0 {
            return Err(StreamError::config("payload_size", "must be positive"));
        }

        info!(from = self.config.payload_size, to = payload_size, "Payload size changed");
        self.config.payload_size = payload_size;
        Ok(self.pool.set_payload_size(payload_size))
    }

    /// Stop the session and hand back every queued buffer.
    pub fn shutdown(mut self) -> Vec<Buffer> {
        let _ = self.stop(false);
        self.pool.drain()
    }

    pub fn push_buffer(&self, buffer: Buffer) -> std::result::Result<(), PushError> {
        self.pool.push(buffer)
    }

    /// Block until a buffer is completed or the stream stops.
    pub fn pop_buffer(&self) -> Result<Buffer> {
        self.pool.pop(None)
    }

    /// Wait up to `timeout`; a zero timeout polls.
    pub fn timeout_pop_buffer(&self, timeout: Duration) -> Result<Buffer> {
        self.pool.pop(Some(timeout))
    }

    pub fn try_pop_buffer(&self) -> Result<Buffer> {
        self.pool.try_pop()
    }

    /// Pop on tokio's blocking pool.
    pub async fn pop_buffer_async(&self, timeout: Option<Duration>) -> Result<Buffer> {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || pool.pop(timeout)).await.map_err(|e| {
            debug!("Pop task failed: {}", e);
            StreamError::Cancelled
        })?
    }

    /// Completed buffers as a stream, ending when the stream stops.
    ///
    /// Must be polled inside a tokio runtime.
    pub fn buffers(&self) -> impl Stream<Item = Buffer> + Send + 'static {
        let pool = Arc::clone(&self.pool);
        futures::stream::unfold(pool, |pool| async move {
            let waiter = Arc::clone(&pool);
            match tokio::task::spawn_blocking(move || waiter.pop(None)).await {
                Ok(Ok(buffer)) => Some((buffer, pool)),
                Ok(Err(_)) | Err(_) => None,
            }
        })
    }

    pub fn buffer_counts(&self) -> BufferCounts {
        self.pool.counts()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    /// Whether the session was closed by a transport loss.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Whether the acquisition thread exited on its own.
    pub fn has_exited(&self) -> bool {
        self.thread.as_ref().is_some_and(AcquisitionThread::is_finished)
    }

    pub fn payload_size(&self) -> usize {
        self.config.payload_size
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!("Dropping running stream session");
            let _ = self.stop(false);
        }
    }
}
