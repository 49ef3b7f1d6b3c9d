//! Completion handlers and the state they share with the controller.
//!
//! Handlers run in completion context. They take the state lock for the
//! bookkeeping only and call back into the host with no lock held at all.
//! Playback copies host audio with just the buffer lock held; capture decodes
//! outside every lock and writes each block under the state lock.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};
use us144_codec::{DecodedBlock, BLOCK_BYTES, BLOCK_FRAMES, WIRE_BYTES_PER_FRAME};

use crate::bridge::{self, CaptureDecoder};
use crate::config::EngineConfig;
use crate::engine::StreamPhase;
use crate::feedback::{FeedbackTracker, Reading};
use crate::host::{HwParams, PcmBuffer, PcmHost, CHANNELS};
use crate::metrics::{StreamEvent, StreamMetrics};
use crate::position::StreamPosition;
use crate::rate::SampleRate;
use crate::ratelimit::RateLimiter;
use crate::ring::ByteRing;
use crate::routing::{PlaybackRouting, Routing};
use crate::scheduler::{lay_out_packets, nominal_layout};
use crate::transport::{
    Completion, CompletionSink, EndpointClass, Transfer, TransferStatus, Transport,
    FEEDBACK_PACKET_BYTES,
};
use crate::Direction;

/// Per-direction view of a substream.
pub(crate) struct DirectionState {
    pub(crate) phase: StreamPhase,
    pub(crate) host: Option<Arc<dyn PcmHost>>,
    pub(crate) params: Option<HwParams>,
    pub(crate) buffer: Option<Arc<PcmBuffer>>,
    pub(crate) position: StreamPosition,
}

impl DirectionState {
    pub(crate) fn closed() -> Self {
        Self {
            phase: StreamPhase::Closed,
            host: None,
            params: None,
            buffer: None,
            position: StreamPosition::new(1, 1),
        }
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.phase == StreamPhase::Running
    }
}

/// Everything guarded by the engine lock.
pub(crate) struct StreamState {
    pub(crate) rate: Option<SampleRate>,
    pub(crate) tracker: FeedbackTracker,
    pub(crate) playback: DirectionState,
    pub(crate) capture: DirectionState,
    pub(crate) routing: Routing,
    pub(crate) staging: ByteRing,
}

impl StreamState {
    pub(crate) fn direction(&self, direction: Direction) -> &DirectionState {
        match direction {
            Direction::Playback => &self.playback,
            Direction::Capture => &self.capture,
        }
    }

    pub(crate) fn direction_mut(&mut self, direction: Direction) -> &mut DirectionState {
        match direction {
            Direction::Playback => &mut self.playback,
            Direction::Capture => &mut self.capture,
        }
    }
}

/// Transfers currently owned by the engine rather than the transport.
pub(crate) struct TransferPool {
    playback: Vec<Transfer>,
    feedback: Vec<Transfer>,
    capture: Vec<Transfer>,
}

impl TransferPool {
    /// Allocates every transfer up front, sized for the highest rate.
    pub(crate) fn allocate(
        config: &EngineConfig,
        max_packet_frames: usize,
    ) -> Result<Self, crate::StreamError> {
        let playback_bytes = max_packet_frames * WIRE_BYTES_PER_FRAME * config.playback_packets;
        let mut pool = Self {
            playback: Vec::with_capacity(config.playback_transfers),
            feedback: Vec::with_capacity(config.feedback_transfers),
            capture: Vec::with_capacity(config.capture_transfers),
        };
        for slot in 0..config.playback_transfers {
            pool.playback.push(Transfer::try_new(
                EndpointClass::Playback,
                slot,
                playback_bytes,
                config.playback_packets,
            )?);
        }
        for slot in 0..config.feedback_transfers {
            pool.feedback.push(Transfer::try_new(
                EndpointClass::Feedback,
                slot,
                FEEDBACK_PACKET_BYTES * config.feedback_packets,
                config.feedback_packets,
            )?);
        }
        for slot in 0..config.capture_transfers {
            pool.capture.push(Transfer::try_new(
                EndpointClass::Capture,
                slot,
                config.capture_transfer_bytes,
                0,
            )?);
        }
        Ok(pool)
    }

    pub(crate) fn class_mut(&mut self, class: EndpointClass) -> &mut Vec<Transfer> {
        match class {
            EndpointClass::Playback => &mut self.playback,
            EndpointClass::Feedback => &mut self.feedback,
            EndpointClass::Capture => &mut self.capture,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.playback.len() + self.feedback.len() + self.capture.len()
    }

    /// Resets descriptors for a fresh run at `rate`.
    pub(crate) fn prepare(&mut self, rate: SampleRate, capture_bytes: usize) {
        let nominal = rate.nominal_frames_per_packet() as usize;
        for transfer in &mut self.playback {
            transfer.buffer.fill(0);
            transfer.length = nominal_layout(&mut transfer.packets, nominal, WIRE_BYTES_PER_FRAME);
            transfer.status = TransferStatus::Completed;
        }
        for transfer in &mut self.feedback {
            for (index, packet) in transfer.packets.iter_mut().enumerate() {
                packet.offset = index * FEEDBACK_PACKET_BYTES;
                packet.length = FEEDBACK_PACKET_BYTES;
                packet.actual_length = 0;
                packet.status = TransferStatus::Completed;
            }
            transfer.length = transfer.packets.len() * FEEDBACK_PACKET_BYTES;
            transfer.status = TransferStatus::Completed;
        }
        for transfer in &mut self.capture {
            transfer.length = capture_bytes;
            transfer.actual_length = 0;
            transfer.status = TransferStatus::Completed;
        }
    }
}

pub(crate) enum StopRequest {
    Stop,
    Shutdown,
}

struct Limiters {
    playback: RateLimiter,
    feedback: RateLimiter,
    capture: RateLimiter,
    submit: RateLimiter,
}

struct PlaybackCopy {
    buffer: Arc<PcmBuffer>,
    offset: usize,
    frames: usize,
    routing: PlaybackRouting,
}

/// State shared between the controller, the stop worker and the handlers.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: Mutex<StreamState>,
    pub(crate) streaming: AtomicBool,
    pub(crate) in_flight: AtomicUsize,
    pub(crate) pool: Mutex<TransferPool>,
    pub(crate) metrics: StreamMetrics,
    decoder: CaptureDecoder,
    max_packet_frames: usize,
    limiters: Limiters,
    stop_tx: Sender<StopRequest>,
    pending_stops: AtomicUsize,
    stop_lock: Mutex<()>,
    stop_done: Condvar,
    capture_drain: Mutex<()>,
}

impl Shared {
    pub(crate) fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        state: StreamState,
        pool: TransferPool,
        max_packet_frames: usize,
        stop_tx: Sender<StopRequest>,
    ) -> Self {
        let limiter = || RateLimiter::new(config.log_interval(), config.log_burst);
        let limiters = Limiters {
            playback: limiter(),
            feedback: limiter(),
            capture: limiter(),
            submit: limiter(),
        };
        let decoder = CaptureDecoder::new(config.capture_format, config.decoder.into());
        let metrics = StreamMetrics::new(config.event_history);
        Self {
            decoder,
            metrics,
            limiters,
            config,
            transport,
            state: Mutex::new(state),
            streaming: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            pool: Mutex::new(pool),
            max_packet_frames,
            stop_tx,
            pending_stops: AtomicUsize::new(0),
            stop_lock: Mutex::new(()),
            stop_done: Condvar::new(),
            capture_drain: Mutex::new(()),
        }
    }

    #[inline]
    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn stop_pending(&self) -> bool {
        self.pending_stops.load(Ordering::Acquire) > 0
    }

    /// Hands transfer cancellation to the stop worker. Never blocks.
    pub(crate) fn request_stop(&self) {
        self.pending_stops.fetch_add(1, Ordering::AcqRel);
        if self.stop_tx.try_send(StopRequest::Stop).is_err() {
            // A queued stop already covers this one.
            self.finish_stop();
        }
    }

    pub(crate) fn shutdown_worker(&self) {
        let _ = self.stop_tx.send(StopRequest::Shutdown);
    }

    fn finish_stop(&self) {
        self.pending_stops.fetch_sub(1, Ordering::AcqRel);
        let _guard = self.stop_lock.lock();
        self.stop_done.notify_all();
    }

    /// Blocks until every requested stop has completed.
    pub(crate) fn wait_stopped(&self) {
        let mut guard = self.stop_lock.lock();
        while self.stop_pending() {
            self.stop_done.wait(&mut guard);
        }
    }

    /// Runs on the stop worker: cancels everything in flight.
    pub(crate) fn cancel_transfers(&self) {
        for class in EndpointClass::START_ORDER {
            self.transport.cancel_all(class);
        }
        let remaining = self.in_flight.swap(0, Ordering::AcqRel);
        if remaining != 0 {
            warn!(remaining, "transfers unaccounted for after cancellation");
        }
        self.metrics.record_event(StreamEvent::Stopped);
        debug!(idle = self.pool.lock().len(), "streaming stopped");
        self.finish_stop();
    }

    fn retire(&self, transfer: Transfer) {
        self.pool.lock().class_mut(transfer.class()).push(transfer);
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn resubmit(&self, transfer: Transfer, completion: &Completion) {
        if !self.is_streaming() {
            self.retire(transfer);
            return;
        }
        if let Err(err) = self.transport.submit(transfer, completion.clone()) {
            self.metrics.record_failed_resubmit();
            if let Some(suppressed) = self.limiters.submit.check() {
                error!(
                    reason = %err.reason,
                    class = ?err.transfer.class(),
                    suppressed,
                    "failed to resubmit transfer"
                );
            }
            self.retire(err.transfer);
        }
    }

    fn notify(host: Option<Arc<dyn PcmHost>>, direction: Direction, periods: u64) {
        if let Some(host) = host {
            for _ in 0..periods {
                host.period_elapsed(direction);
            }
        }
    }

    fn log_status(&self, limiter: &RateLimiter, class: EndpointClass, status: TransferStatus) {
        self.metrics.record_transport_error();
        if let Some(suppressed) = limiter.check() {
            warn!(?class, ?status, suppressed, "transfer completed with error");
        }
    }

    fn playback_complete(&self, mut transfer: Transfer, completion: &Completion) {
        let status = transfer.status;
        if status.is_shutdown() || !self.is_streaming() {
            self.retire(transfer);
            return;
        }
        // A failed transfer still carries audio that was already counted, so
        // it is refilled like any other before going back out.
        if !status.is_ok() {
            self.log_status(&self.limiters.playback, EndpointClass::Playback, status);
        }

        let (copy, host, periods) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let layout = lay_out_packets(
                &mut state.tracker,
                &mut transfer.packets,
                WIRE_BYTES_PER_FRAME,
                self.max_packet_frames,
            );
            transfer.length = layout.bytes;
            self.metrics
                .record_playback(layout.frames, layout.from_accumulator, layout.underruns);

            let playback = &mut state.playback;
            match (&playback.buffer, playback.phase) {
                (Some(buffer), StreamPhase::Running) => {
                    let copy = PlaybackCopy {
                        buffer: Arc::clone(buffer),
                        offset: playback.position.pointer(),
                        frames: layout.frames,
                        routing: state.routing.playback,
                    };
                    let periods = playback.position.advance(layout.frames);
                    (Some(copy), playback.host.clone(), periods)
                }
                _ => (None, None, 0),
            }
        };

        let wire = &mut transfer.buffer[..transfer.length];
        match copy {
            Some(copy) => {
                let ring = copy.buffer.lock();
                bridge::copy_playback(
                    &ring,
                    copy.buffer.format(),
                    copy.buffer.frames(),
                    copy.offset,
                    copy.frames,
                    &copy.routing,
                    wire,
                );
            }
            None => wire.fill(0),
        }
        Self::notify(host, Direction::Playback, periods);
        self.resubmit(transfer, completion);
    }

    fn feedback_complete(&self, transfer: Transfer, completion: &Completion) {
        let status = transfer.status;
        if status.is_shutdown() || !self.is_streaming() {
            self.retire(transfer);
            return;
        }
        if !status.is_ok() {
            self.log_status(&self.limiters.feedback, EndpointClass::Feedback, status);
        }

        let mut xruns: [Option<(Direction, Arc<dyn PcmHost>)>; 2] = [None, None];
        let report = {
            let mut state = self.state.lock();
            let readings = transfer.packets.iter().enumerate().map(|(index, packet)| {
                match transfer.packet_data(index).first() {
                    Some(&value) if status.is_ok() && packet.status.is_ok() => {
                        Reading::Value(value)
                    }
                    _ => Reading::Missing,
                }
            });
            let report = state.tracker.ingest(readings);
            if report.lost {
                for (slot, direction) in xruns.iter_mut().zip(Direction::BOTH) {
                    let substream = state.direction_mut(direction);
                    if substream.is_running() {
                        substream.phase = StreamPhase::Stopped;
                        *slot = substream.host.clone().map(|host| (direction, host));
                    }
                }
            }
            report
        };

        self.metrics.record_feedback(report.invalid, report.overruns);
        if report.acquired {
            debug!(head = report.head, tail = report.tail, "feedback synchronised");
            self.metrics.record_event(StreamEvent::SyncAcquired {
                head: report.head,
                tail: report.tail,
            });
        }
        if report.lost && self.streaming.swap(false, Ordering::AcqRel) {
            error!(
                threshold = self.config.sync_loss_threshold,
                "feedback synchronisation lost, stopping streams"
            );
            self.metrics.record_event(StreamEvent::SyncLost);
            self.request_stop();
            for (direction, host) in xruns.into_iter().flatten() {
                self.metrics.register_xrun(direction);
                host.xrun(direction);
            }
        }
        self.resubmit(transfer, completion);
    }

    fn capture_complete(&self, transfer: Transfer, completion: &Completion) {
        let status = transfer.status;
        if status.is_shutdown() || !self.is_streaming() {
            self.retire(transfer);
            return;
        }
        if !status.is_ok() {
            self.log_status(&self.limiters.capture, EndpointClass::Capture, status);
            self.resubmit(transfer, completion);
            return;
        }

        let received = transfer.received();
        let staged = if received.is_empty() {
            None
        } else {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            (state.capture.is_running() && state.capture.buffer.is_some())
                .then(|| state.staging.push(received))
        };
        if let Some(overflow) = staged {
            self.metrics.record_capture(0, overflow);
            self.drain_capture();
        }
        self.resubmit(transfer, completion);
    }

    /// Decodes every complete staged block into the host buffer, in staging
    /// order. Decoding runs with no lock held. A handler that finds another
    /// one draining leaves its bytes for it.
    fn drain_capture(&self) {
        let Some(drain) = self.capture_drain.try_lock() else {
            return;
        };
        let block_bytes = self.decoder.block_bytes();
        let mut raw = [0u8; BLOCK_BYTES];
        let mut decoded: DecodedBlock = [[0; CHANNELS]; BLOCK_FRAMES];
        let mut host = None;
        let mut frames = 0;
        let mut periods = 0;

        loop {
            let routing = {
                let mut state = self.state.lock();
                if !state.capture.is_running() || !state.staging.pop_into(&mut raw[..block_bytes]) {
                    break;
                }
                state.routing.capture
            };

            self.decoder.decode(&raw[..block_bytes], &mut decoded);

            let mut guard = self.state.lock();
            let capture = &mut guard.capture;
            if !capture.is_running() {
                break;
            }
            let Some(buffer) = capture.buffer.clone() else {
                break;
            };
            bridge::write_capture(
                &decoded,
                &routing,
                &mut buffer.lock(),
                buffer.format(),
                buffer.frames(),
                capture.position.pointer(),
            );
            periods += capture.position.advance(BLOCK_FRAMES);
            frames += BLOCK_FRAMES;
            host = capture.host.clone();
        }
        drop(drain);

        self.metrics.record_capture(frames, 0);
        Self::notify(host, Direction::Capture, periods);
    }
}

impl CompletionSink for Shared {
    fn on_complete(&self, transfer: Transfer, completion: &Completion) {
        match transfer.class() {
            EndpointClass::Playback => self.playback_complete(transfer, completion),
            EndpointClass::Feedback => self.feedback_complete(transfer, completion),
            EndpointClass::Capture => self.capture_complete(transfer, completion),
        }
    }
}
