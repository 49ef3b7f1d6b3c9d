//! The stream controller.
//!
//! Both directions share the device clock, so they start and stop together:
//! starting either one submits every transfer class, and stopping either one
//! stops streaming for both. Transfer cancellation blocks, so stops are handed
//! to a worker thread and [`Engine::sync_stop`] waits for it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::control::{ControlPipe, DeviceControl};
use crate::error::StreamError;
use crate::feedback::{Accumulator, FeedbackTracker, SyncState};
use crate::host::{HwParams, PcmBuffer, PcmHost};
use crate::metrics::{StreamEvent, StreamStats};
use crate::orchestrator::{DirectionState, Shared, StopRequest, StreamState, TransferPool};
use crate::position::StreamPosition;
use crate::rate::SampleRate;
use crate::ring::ByteRing;
use crate::routing::{CaptureSource, PlaybackSource, Routing};
use crate::transport::{Completion, EndpointClass, Transport};
use crate::{try_alloc, Direction};

const STOP_QUEUE_DEPTH: usize = 16;

/// Lifecycle of one substream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Closed,
    Opened,
    Configured,
    Prepared,
    Running,
    Paused,
    Suspended,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Start,
    Stop,
    PausePush,
    PauseRelease,
    Suspend,
    Resume,
}

pub struct Engine {
    shared: Arc<Shared>,
    control: Mutex<DeviceControl>,
    worker: Option<JoinHandle<()>>,
}

fn stop_worker(shared: Arc<Shared>, requests: Receiver<StopRequest>) {
    while let Ok(request) = requests.recv() {
        match request {
            StopRequest::Stop => shared.cancel_transfers(),
            StopRequest::Shutdown => break,
        }
    }
}

fn invalid(direction: Direction, phase: StreamPhase, operation: &'static str) -> StreamError {
    StreamError::InvalidState {
        direction,
        phase,
        operation,
    }
}

impl Engine {
    /// Allocates every transfer and ring up front and starts the stop worker.
    pub fn open(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        control: Box<dyn ControlPipe>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let max_packet_frames = SampleRate::Hz96000.max_frames_per_packet() as usize;
        let pool = TransferPool::allocate(&config, max_packet_frames)?;
        let slots = try_alloc(config.accumulator_slots, 0u32, "feedback accumulator")?;
        let staging = try_alloc(config.capture_staging_bytes(), 0u8, "capture staging ring")?;
        let tracker = FeedbackTracker::new(
            Accumulator::new(slots),
            SampleRate::Hz48000,
            config.feedback_tolerance,
            config.sync_loss_threshold,
            config.feedback_transfers as u32,
        );
        let state = StreamState {
            rate: None,
            tracker,
            playback: DirectionState::closed(),
            capture: DirectionState::closed(),
            routing: Routing::default(),
            staging: ByteRing::new(staging),
        };

        let control = DeviceControl::new(control, config.control_timeout());
        let (stop_tx, stop_rx) = bounded(STOP_QUEUE_DEPTH);
        let shared = Arc::new(Shared::new(
            config,
            transport,
            state,
            pool,
            max_packet_frames,
            stop_tx,
        ));

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("us144-stop".into())
            .spawn(move || stop_worker(worker_shared, stop_rx))
            .map_err(|_| StreamError::Allocation {
                what: "stop worker thread",
            })?;

        Ok(Self {
            shared,
            control: Mutex::new(control),
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn open_substream(
        &self,
        direction: Direction,
        host: Arc<dyn PcmHost>,
    ) -> Result<(), StreamError> {
        let mut state = self.shared.state.lock();
        let substream = state.direction_mut(direction);
        if substream.phase != StreamPhase::Closed {
            return Err(invalid(direction, substream.phase, "open"));
        }
        substream.phase = StreamPhase::Opened;
        substream.host = Some(host);
        Ok(())
    }

    /// Stops streaming if needed and forgets the substream.
    pub fn close_substream(&self, direction: Direction) -> Result<(), StreamError> {
        let phase = self.phase(direction);
        if phase == StreamPhase::Closed {
            return Err(invalid(direction, phase, "close"));
        }
        if matches!(phase, StreamPhase::Running | StreamPhase::Paused) {
            self.trigger(direction, TriggerCommand::Stop)?;
        }
        self.sync_stop();
        *self.shared.state.lock().direction_mut(direction) = DirectionState::closed();
        Ok(())
    }

    /// Applies hardware parameters, reprogramming the device if the rate
    /// changes, and returns the ring buffer the host exchanges audio through.
    pub fn hw_params(
        &self,
        direction: Direction,
        params: HwParams,
    ) -> Result<Arc<PcmBuffer>, StreamError> {
        params.validate()?;
        let phase = self.phase(direction);
        if !matches!(
            phase,
            StreamPhase::Opened | StreamPhase::Configured | StreamPhase::Prepared | StreamPhase::Stopped
        ) {
            return Err(invalid(direction, phase, "hw_params"));
        }
        self.set_rate(params.rate)?;

        let buffer = Arc::new(PcmBuffer::try_new(params.format, params.buffer_frames)?);
        let mut state = self.shared.state.lock();
        let substream = state.direction_mut(direction);
        substream.params = Some(params);
        substream.buffer = Some(Arc::clone(&buffer));
        substream.position = StreamPosition::new(params.buffer_frames, params.period_frames);
        substream.phase = StreamPhase::Configured;
        Ok(buffer)
    }

    pub fn hw_free(&self, direction: Direction) -> Result<(), StreamError> {
        let mut state = self.shared.state.lock();
        let substream = state.direction_mut(direction);
        if matches!(
            substream.phase,
            StreamPhase::Closed | StreamPhase::Running | StreamPhase::Paused
        ) {
            return Err(invalid(direction, substream.phase, "hw_free"));
        }
        substream.params = None;
        substream.buffer = None;
        substream.phase = StreamPhase::Opened;
        Ok(())
    }

    fn set_rate(&self, rate: SampleRate) -> Result<(), StreamError> {
        let mut control = self.control.lock();
        {
            let state = self.shared.state.lock();
            if state.rate == Some(rate) {
                return Ok(());
            }
            if self.shared.is_streaming() {
                return Err(StreamError::Busy);
            }
        }
        let result = control.configure(rate);
        let mut state = self.shared.state.lock();
        match result {
            Ok(()) => {
                state.rate = Some(rate);
                state.tracker.reset(rate);
                Ok(())
            }
            Err(err) => {
                state.rate = None;
                error!(%err, rate = rate.hz(), "device configuration failed");
                Err(err)
            }
        }
    }

    /// Resets positions and, when nothing is streaming, the feedback state
    /// and transfer descriptors.
    pub fn prepare(&self, direction: Direction) -> Result<(), StreamError> {
        self.sync_stop();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let streaming = self.shared.is_streaming();
        let substream = state.direction_mut(direction);
        let phase = substream.phase;
        if matches!(
            phase,
            StreamPhase::Closed | StreamPhase::Opened | StreamPhase::Running
        ) {
            return Err(invalid(direction, phase, "prepare"));
        }
        let params = substream
            .params
            .ok_or(StreamError::NotConfigured { direction })?;
        let rate = state.rate.ok_or(StreamError::NotConfigured { direction })?;

        let substream = state.direction_mut(direction);
        substream.position = StreamPosition::new(params.buffer_frames, params.period_frames);
        substream.phase = StreamPhase::Prepared;
        if direction == Direction::Capture {
            state.staging.clear();
        }
        if !streaming {
            state.tracker.reset(rate);
            drop(guard);
            self.shared
                .pool
                .lock()
                .prepare(rate, self.shared.config.capture_transfer_bytes);
        }
        Ok(())
    }

    /// Non-blocking state change requested by the host.
    pub fn trigger(&self, direction: Direction, command: TriggerCommand) -> Result<(), StreamError> {
        match command {
            TriggerCommand::Start => self.start(direction, StreamPhase::Prepared),
            TriggerCommand::PauseRelease => self.start(direction, StreamPhase::Paused),
            TriggerCommand::Resume => self.start(direction, StreamPhase::Suspended),
            TriggerCommand::Stop => self.stop(direction, StreamPhase::Stopped),
            TriggerCommand::PausePush => self.stop(direction, StreamPhase::Paused),
            TriggerCommand::Suspend => self.stop(direction, StreamPhase::Suspended),
        }
    }

    fn start(&self, direction: Direction, required: StreamPhase) -> Result<(), StreamError> {
        {
            let mut state = self.shared.state.lock();
            let phase = state.direction(direction).phase;
            if phase != required {
                return Err(invalid(direction, phase, "start"));
            }
            if self.shared.is_streaming() {
                state.direction_mut(direction).phase = StreamPhase::Running;
                return Ok(());
            }
            if self.shared.stop_pending() || self.shared.in_flight.load(Ordering::Acquire) > 0 {
                return Err(StreamError::Again);
            }
            for other in Direction::BOTH {
                let substream = state.direction_mut(other);
                let joins = matches!(
                    substream.phase,
                    StreamPhase::Prepared | StreamPhase::Paused | StreamPhase::Suspended
                );
                if other == direction || joins {
                    substream.phase = StreamPhase::Running;
                }
            }
            self.shared.streaming.store(true, Ordering::Release);
        }
        self.shared.metrics.record_event(StreamEvent::Started);

        let completion = Completion::new(Arc::clone(&self.shared) as _);
        for class in EndpointClass::START_ORDER {
            let count = self.shared.pool.lock().class_mut(class).len();
            for _ in 0..count {
                let Some(transfer) = self.shared.pool.lock().class_mut(class).pop() else {
                    break;
                };
                self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
                if let Err(err) = self.shared.transport.submit(transfer, completion.clone()) {
                    error!(reason = %err.reason, ?class, "failed to submit transfers to start streaming");
                    self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                    self.shared.pool.lock().class_mut(class).push(err.transfer);
                    self.halt(StreamPhase::Stopped);
                    return Err(StreamError::Submit(err.reason));
                }
            }
        }
        info!(?direction, "streaming started");
        Ok(())
    }

    fn stop(&self, direction: Direction, target: StreamPhase) -> Result<(), StreamError> {
        {
            let mut state = self.shared.state.lock();
            let phase = state.direction(direction).phase;
            let allowed = match target {
                StreamPhase::Paused => phase == StreamPhase::Running,
                _ => matches!(
                    phase,
                    StreamPhase::Running
                        | StreamPhase::Paused
                        | StreamPhase::Prepared
                        | StreamPhase::Suspended
                        | StreamPhase::Stopped
                ),
            };
            if !allowed {
                return Err(invalid(direction, phase, "stop"));
            }
            state.direction_mut(direction).phase = target;
        }
        self.halt(target);
        Ok(())
    }

    /// Ends streaming for both directions and queues the deferred stop.
    fn halt(&self, target: StreamPhase) {
        let mut state = self.shared.state.lock();
        for direction in Direction::BOTH {
            let substream = state.direction_mut(direction);
            if substream.is_running() {
                substream.phase = target;
            }
        }
        if self.shared.streaming.swap(false, Ordering::AcqRel) {
            drop(state);
            self.shared.request_stop();
        }
    }

    /// Waits for any deferred stop to finish cancelling transfers.
    pub fn sync_stop(&self) {
        self.shared.wait_stopped();
    }

    /// Stops streaming ahead of a system suspend and waits for it.
    pub fn suspend(&self) {
        {
            let mut state = self.shared.state.lock();
            for direction in Direction::BOTH {
                let substream = state.direction_mut(direction);
                if matches!(substream.phase, StreamPhase::Running | StreamPhase::Paused) {
                    substream.phase = StreamPhase::Suspended;
                }
            }
        }
        self.halt(StreamPhase::Suspended);
        self.sync_stop();
        info!("suspended");
    }

    /// Restores the streaming interfaces and replays the configuration for
    /// the current rate. Substreams stay suspended until the host resumes them.
    pub fn resume(&self) -> Result<(), StreamError> {
        let mut control = self.control.lock();
        control.restore_interfaces()?;
        let rate = self.shared.state.lock().rate;
        if let Some(rate) = rate {
            if let Err(err) = control.configure(rate) {
                let mut state = self.shared.state.lock();
                state.rate = None;
                error!(%err, rate = rate.hz(), "reconfiguration after resume failed");
                return Err(err);
            }
            self.shared.state.lock().tracker.reset(rate);
        }
        info!("resumed");
        Ok(())
    }

    /// Hardware position inside the ring buffer, 0 when not streaming.
    pub fn pointer(&self, direction: Direction) -> usize {
        if !self.shared.is_streaming() {
            return 0;
        }
        self.shared.state.lock().direction(direction).position.pointer()
    }

    /// Frames moved since the last prepare.
    pub fn frames(&self, direction: Direction) -> u64 {
        self.shared.state.lock().direction(direction).position.frames()
    }

    pub fn phase(&self, direction: Direction) -> StreamPhase {
        self.shared.state.lock().direction(direction).phase
    }

    pub fn current_rate(&self) -> Option<SampleRate> {
        self.shared.state.lock().rate
    }

    pub fn sync_state(&self) -> SyncState {
        self.shared.state.lock().tracker.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.is_streaming()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Transfers currently held by the engine.
    pub fn idle_transfers(&self) -> usize {
        self.shared.pool.lock().len()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.metrics.snapshot()
    }

    pub fn drain_events(&self) -> Vec<StreamEvent> {
        self.shared.metrics.drain_events()
    }

    /// Zeroes every counter and forgets the event history.
    pub fn reset_stats(&self) {
        self.shared.metrics.reset();
    }

    pub fn routing(&self) -> Routing {
        self.shared.state.lock().routing
    }

    fn put<T: PartialEq + Copy>(&self, select: impl FnOnce(&mut Routing) -> &mut T, value: T) -> bool {
        let mut state = self.shared.state.lock();
        let slot = select(&mut state.routing);
        if *slot == value {
            return false;
        }
        *slot = value;
        true
    }

    /// Source of the line outputs. Returns whether the value changed.
    pub fn set_line_out_source(&self, source: PlaybackSource) -> bool {
        self.put(|routing| &mut routing.playback.line_out, source)
    }

    /// Source of the digital outputs. Returns whether the value changed.
    pub fn set_digital_out_source(&self, source: PlaybackSource) -> bool {
        self.put(|routing| &mut routing.playback.digital_out, source)
    }

    pub fn set_capture_12_source(&self, source: CaptureSource) -> bool {
        self.put(|routing| &mut routing.capture.capture_12, source)
    }

    pub fn set_capture_34_source(&self, source: CaptureSource) -> bool {
        self.put(|routing| &mut routing.capture.capture_34, source)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.halt(StreamPhase::Stopped);
        self.sync_stop();
        self.shared.shutdown_worker();
        if let Some(handle) = self.worker.take() {
            if let Err(err) = handle.join() {
                error!(?err, "stop worker panicked");
            }
        }
    }
}
