//! The acquisition worker: one OS thread per running session.
//!
//! The worker owns the transport, the event handler and the reassembler for as
//! long as the session runs. It polls the transport with a bounded timeout so
//! stop requests, frame timeouts and resend deadlines are serviced even when no
//! data flows. Every frame that gets a buffer produces one START_BUFFER and,
//! whatever its fate, one BUFFER_DONE.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::StreamConfig;
use crate::notify::{EventHandler, NotificationChannel};
use crate::pool::BufferPool;
use crate::reassembly::{CompletedFrame, PacketReassembler, Progress, Route};
use crate::statistics::StreamStatistics;
use crate::transport::Transport;
use crate::types::{DataUnit, StreamEvent, ThreadState};
use crate::{Result, StreamError};

/// Why the worker left its loop.
#[derive(Debug)]
pub(crate) enum ExitReason {
    Stopped,
    TransportLost(StreamError),
}

/// What the worker hands back when it is joined.
pub(crate) struct AcquisitionReport {
    pub handler: Box<dyn EventHandler>,
    pub transport: Box<dyn Transport>,
    pub exit: ExitReason,
}

/// Everything a worker needs, moved onto the thread at spawn.
pub(crate) struct WorkerParts {
    pub config: StreamConfig,
    pub pool: Arc<BufferPool>,
    pub transport: Box<dyn Transport>,
    pub handler: Box<dyn EventHandler>,
    pub statistics: Arc<StreamStatistics>,
    pub state: Arc<Mutex<ThreadState>>,
}

/// Handle on a running worker.
pub(crate) struct AcquisitionThread {
    handle: JoinHandle<AcquisitionReport>,
    cancel: CancellationToken,
}

impl AcquisitionThread {
    /// Spawn the worker and wait until it has emitted INIT.
    pub(crate) fn spawn(parts: WorkerParts) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let name = parts.config.thread_name.clone();
        let worker = Worker::new(parts, cancel.clone());

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run(ready_tx))
            .map_err(|source| StreamError::ThreadSpawn { source })?;

        // a worker that dies before signalling is reported at join
        let _ = ready_rx.recv();
        Ok(Self { handle, cancel })
    }

    /// Whether the worker left its loop on its own.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request exit and join. `None` when the worker panicked.
    pub(crate) fn stop(self) -> Option<AcquisitionReport> {
        self.cancel.cancel();
        match self.handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("Acquisition thread panicked");
                None
            }
        }
    }
}

struct Worker {
    pool: Arc<BufferPool>,
    transport: Box<dyn Transport>,
    notify: NotificationChannel,
    reassembler: PacketReassembler,
    statistics: Arc<StreamStatistics>,
    state: Arc<Mutex<ThreadState>>,
    cancel: CancellationToken,
    poll_interval: Duration,
    max_backoff: Duration,
    max_errors: u32,
    delivered: u64,
}

impl Worker {
    fn new(parts: WorkerParts, cancel: CancellationToken) -> Self {
        let WorkerParts { config, pool, transport, handler, statistics, state } = parts;
        Self {
            pool,
            transport,
            notify: NotificationChannel::new(handler, Arc::clone(&statistics)),
            reassembler: PacketReassembler::new(&config, Arc::clone(&statistics)),
            statistics,
            state,
            cancel,
            poll_interval: config.poll_interval(),
            max_backoff: config.frame_timeout(),
            max_errors: config.max_transport_errors,
            delivered: 0,
        }
    }

    fn run(mut self, ready: Sender<()>) -> AcquisitionReport {
        info!(payload_size = self.reassembler.payload_size(), "Acquisition thread started");
        self.notify.dispatch(StreamEvent::Init, None);
        *self.state.lock() = ThreadState::Running;
        let _ = ready.send(());

        let exit = self.receive_loop();

        *self.state.lock() = ThreadState::Stopping;
        let aborted = self.reassembler.abort_all();
        if !aborted.is_empty() {
            debug!(frames = aborted.len(), "Aborting in-flight frames");
        }
        for frame in aborted {
            self.complete(frame);
        }
        self.notify.dispatch(StreamEvent::Exit, None);
        if let ExitReason::TransportLost(ref e) = exit {
            error!("Closing stream session: {}", e);
            self.pool.close();
        }

        info!("Acquisition thread ended (delivered {} buffers)", self.delivered);
        AcquisitionReport { handler: self.notify.into_handler(), transport: self.transport, exit }
    }

    fn receive_loop(&mut self) -> ExitReason {
        let mut error_count = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                debug!("Acquisition thread cancelled");
                return ExitReason::Stopped;
            }

            let now = Instant::now();
            let progress = self.reassembler.poll(now);
            self.deliver(progress);

            match self.transport.receive(self.receive_timeout(now)) {
                Ok(Some(unit)) => {
                    error_count = 0;
                    self.handle_unit(unit);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => return ExitReason::TransportLost(e),
                Err(e) => {
                    // transient failures don't end the session until they pile up
                    error_count += 1;
                    self.statistics.record_transport_error();
                    warn!("Transport error ({}/{}): {}", error_count, self.max_errors, e);

                    if error_count >= self.max_errors {
                        return ExitReason::TransportLost(StreamError::TransportLost {
                            reason: format!("{} consecutive transport errors", error_count),
                            source: Some(Box::new(e)),
                        });
                    }

                    let backoff = self.poll_interval.saturating_mul(1 << error_count.min(5)).min(self.max_backoff);
                    thread::sleep(backoff);
                }
            }
        }
    }

    /// Wait no longer than the poll interval or the next reassembly deadline.
    fn receive_timeout(&self, now: Instant) -> Duration {
        match self.reassembler.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(self.poll_interval),
            None => self.poll_interval,
        }
    }

    fn handle_unit(&mut self, unit: DataUnit) {
        let now = Instant::now();
        let frame_id = unit.frame_id;

        if self.reassembler.route(frame_id) == Route::NewFrame {
            match self.pool.take_free() {
                Ok(buffer) => {
                    let forced = self.reassembler.begin_frame(frame_id, buffer, now);
                    self.deliver(forced);
                    self.notify.dispatch(StreamEvent::StartBuffer, self.reassembler.buffer(frame_id));
                }
                Err(_) => {
                    self.statistics.record_underrun();
                    self.reassembler.skip_frame(frame_id);
                    warn!(frame_id, "No free buffer, frame dropped");
                    return;
                }
            }
        }

        let progress = self.reassembler.on_unit(unit, now);
        self.deliver(progress);
    }

    /// Send resend requests, then complete finished frames in order.
    fn deliver(&mut self, progress: Progress) {
        for request in &progress.requests {
            match self.transport.request_resend(request) {
                Ok(()) => {
                    self.statistics.record_resend_requests(1);
                    trace!(
                        frame_id = request.frame_id,
                        range = %request.range,
                        attempt = request.attempts,
                        "Resend requested"
                    );
                }
                Err(e) => {
                    self.statistics.record_transport_error();
                    warn!(frame_id = request.frame_id, "Resend request failed: {}", e);
                }
            }
        }
        for frame in progress.completed {
            self.complete(frame);
        }
    }

    fn complete(&mut self, frame: CompletedFrame) {
        let CompletedFrame { buffer, status } = frame;
        self.statistics.record_completion(status);
        self.delivered += 1;
        let notify = &mut self.notify;
        self.pool.complete(buffer, status, |buffer| notify.dispatch(StreamEvent::BufferDone, Some(buffer)));
    }
}
