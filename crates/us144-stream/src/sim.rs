//! In-process transports for tests, benchmarks and bring-up without hardware.
//!
//! [`ManualTransport`] parks every submitted transfer until the caller
//! completes it, which makes completion ordering fully deterministic.
//! [`SimTransport`] runs one thread per endpoint that plays the device side
//! at a fixed tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};
use us144_codec::{encode_block, DecodedBlock, BLOCK_BYTES};

use crate::rate::SampleRate;
use crate::transport::{
    Completion, EndpointClass, SubmitError, SubmitFailure, Transfer, TransferStatus, Transport,
    FEEDBACK_PACKET_BYTES,
};

const LANES: [EndpointClass; 3] = [
    EndpointClass::Playback,
    EndpointClass::Feedback,
    EndpointClass::Capture,
];

fn lane_index(class: EndpointClass) -> usize {
    match class {
        EndpointClass::Playback => 0,
        EndpointClass::Feedback => 1,
        EndpointClass::Capture => 2,
    }
}

/// Marks every packet of a feedback transfer as carrying `value`, or as
/// empty when `value` is `None`.
pub fn fill_feedback(transfer: &mut Transfer, value: Option<u8>) {
    let buffer = &mut transfer.buffer;
    for packet in transfer.packets.iter_mut() {
        packet.status = TransferStatus::Completed;
        match value {
            Some(value) => {
                if let Some(bytes) = buffer.get_mut(packet.offset..packet.offset + FEEDBACK_PACKET_BYTES) {
                    bytes.copy_from_slice(&[value, 0, 0]);
                }
                packet.actual_length = FEEDBACK_PACKET_BYTES;
            }
            None => packet.actual_length = 0,
        }
    }
    transfer.status = TransferStatus::Completed;
}

/// Accepts every byte of a playback transfer.
pub fn fill_playback(transfer: &mut Transfer) {
    for packet in transfer.packets.iter_mut() {
        packet.actual_length = packet.length;
        packet.status = TransferStatus::Completed;
    }
    transfer.actual_length = transfer.length;
    transfer.status = TransferStatus::Completed;
}

/// Fills a capture transfer with as much of `data` as fits.
pub fn fill_capture(transfer: &mut Transfer, data: &[u8]) {
    let len = data.len().min(transfer.length).min(transfer.buffer.len());
    transfer.buffer[..len].copy_from_slice(&data[..len]);
    transfer.actual_length = len;
    transfer.status = TransferStatus::Completed;
}

/// Transport whose transfers complete only when the caller says so.
#[derive(Default)]
pub struct ManualTransport {
    queues: Mutex<[VecDeque<(Transfer, Completion)>; 3]>,
    reject: Mutex<Option<(EndpointClass, SubmitFailure)>>,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers of `class` currently queued.
    pub fn pending(&self, class: EndpointClass) -> usize {
        self.queues.lock()[lane_index(class)].len()
    }

    /// Makes every later submission of `class` fail with `failure`.
    pub fn reject_submissions(&self, class: EndpointClass, failure: SubmitFailure) {
        *self.reject.lock() = Some((class, failure));
    }

    pub fn accept_submissions(&self) {
        *self.reject.lock() = None;
    }

    /// Completes the oldest queued transfer of `class` after letting `fill`
    /// play the device side. Returns `false` if nothing was queued.
    pub fn complete_next(&self, class: EndpointClass, fill: impl FnOnce(&mut Transfer)) -> bool {
        let next = self.queues.lock()[lane_index(class)].pop_front();
        match next {
            Some((mut transfer, completion)) => {
                fill(&mut transfer);
                completion.complete(transfer);
                true
            }
            None => false,
        }
    }

    pub fn complete_feedback(&self, value: Option<u8>) -> bool {
        self.complete_next(EndpointClass::Feedback, |transfer| {
            fill_feedback(transfer, value)
        })
    }

    pub fn complete_playback(&self) -> bool {
        self.complete_next(EndpointClass::Playback, fill_playback)
    }

    pub fn complete_capture(&self, data: &[u8]) -> bool {
        self.complete_next(EndpointClass::Capture, |transfer| {
            fill_capture(transfer, data)
        })
    }

    /// Completes the oldest transfer of `class` with an error status.
    pub fn fail_next(&self, class: EndpointClass, status: TransferStatus) -> bool {
        self.complete_next(class, |transfer| transfer.status = status)
    }
}

impl Transport for ManualTransport {
    fn submit(&self, transfer: Transfer, completion: Completion) -> Result<(), SubmitError> {
        if let Some((class, reason)) = *self.reject.lock() {
            if class == transfer.class() {
                return Err(SubmitError { transfer, reason });
            }
        }
        self.queues.lock()[lane_index(transfer.class())].push_back((transfer, completion));
        Ok(())
    }

    fn cancel_all(&self, class: EndpointClass) {
        loop {
            let next = self.queues.lock()[lane_index(class)].pop_front();
            let Some((mut transfer, completion)) = next else {
                break;
            };
            transfer.status = TransferStatus::Cancelled;
            completion.complete(transfer);
        }
    }
}

/// Device side of [`SimTransport`].
#[derive(Debug, Clone)]
pub struct SimDevice {
    /// Feedback readings, replayed in a loop.
    pub feedback: Vec<u8>,
    /// Capture stream content, replayed in a loop.
    pub capture: Vec<u8>,
    /// Time between completions on each endpoint.
    pub tick: Duration,
}

impl SimDevice {
    /// A device locked to `rate` that captures silence.
    pub fn locked_to(rate: SampleRate) -> Self {
        let whole = rate.frames_per_ms() as u8;
        let feedback = match rate {
            SampleRate::Hz44100 => {
                let mut cycle = vec![whole; 10];
                cycle[9] = whole + 1;
                cycle
            }
            SampleRate::Hz88200 => {
                let mut cycle = vec![whole; 5];
                cycle[4] = whole + 1;
                cycle
            }
            SampleRate::Hz48000 | SampleRate::Hz96000 => vec![whole],
        };
        let mut capture = vec![0u8; BLOCK_BYTES];
        let silence: DecodedBlock = Default::default();
        if let Ok(block) = <&mut [u8; BLOCK_BYTES]>::try_from(capture.as_mut_slice()) {
            encode_block(&silence, block);
        }
        Self {
            feedback,
            capture,
            tick: Duration::from_millis(1),
        }
    }

    fn fill(&self, transfer: &mut Transfer, cursor: &mut usize) {
        match transfer.class() {
            EndpointClass::Playback => fill_playback(transfer),
            EndpointClass::Feedback => {
                let value = self.feedback.get(*cursor % self.feedback.len().max(1)).copied();
                *cursor = cursor.wrapping_add(1);
                fill_feedback(transfer, value);
            }
            EndpointClass::Capture => {
                let length = transfer.length.min(transfer.buffer.len());
                if !self.capture.is_empty() {
                    for byte in transfer.buffer[..length].iter_mut() {
                        *byte = self.capture[*cursor % self.capture.len()];
                        *cursor = cursor.wrapping_add(1);
                    }
                }
                transfer.actual_length = length;
                transfer.status = TransferStatus::Completed;
            }
        }
    }
}

enum LaneMsg {
    Submit(Transfer, Completion),
    Cancel(Sender<()>),
    Shutdown,
}

struct Lane {
    tx: Sender<LaneMsg>,
    handle: Option<JoinHandle<()>>,
}

/// Threaded transport that completes transfers on a timer.
pub struct SimTransport {
    lanes: Vec<Lane>,
    completed: Arc<[AtomicU64; 3]>,
}

impl SimTransport {
    pub fn new(device: SimDevice) -> std::io::Result<Self> {
        let device = Arc::new(device);
        let completed: Arc<[AtomicU64; 3]> = Arc::new(Default::default());
        let mut lanes = Vec::with_capacity(LANES.len());
        for class in LANES {
            let (tx, rx) = unbounded();
            let device = Arc::clone(&device);
            let completed = Arc::clone(&completed);
            let name = format!("us144-sim-{class:?}").to_lowercase();
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || run_lane(class, &device, &completed, rx))?;
            lanes.push(Lane {
                tx,
                handle: Some(handle),
            });
        }
        Ok(Self { lanes, completed })
    }

    /// Transfers of `class` the device has completed successfully.
    pub fn completed(&self, class: EndpointClass) -> u64 {
        self.completed[lane_index(class)].load(Ordering::Relaxed)
    }
}

impl Transport for SimTransport {
    fn submit(&self, transfer: Transfer, completion: Completion) -> Result<(), SubmitError> {
        let lane = &self.lanes[lane_index(transfer.class())];
        if let Err(err) = lane.tx.send(LaneMsg::Submit(transfer, completion)) {
            if let LaneMsg::Submit(transfer, _) = err.into_inner() {
                return Err(SubmitError {
                    transfer,
                    reason: SubmitFailure::Disconnected,
                });
            }
        }
        Ok(())
    }

    fn cancel_all(&self, class: EndpointClass) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let lane = &self.lanes[lane_index(class)];
        if lane.tx.send(LaneMsg::Cancel(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        let current = thread::current().id();
        for lane in &mut self.lanes {
            let _ = lane.tx.send(LaneMsg::Shutdown);
            let Some(handle) = lane.handle.take() else {
                continue;
            };
            if handle.thread().id() == current {
                continue;
            }
            if let Err(err) = handle.join() {
                error!(?err, "simulated endpoint thread panicked");
            }
        }
    }
}

fn cancel(queue: &mut VecDeque<(Transfer, Completion)>) {
    for (mut transfer, completion) in queue.drain(..) {
        transfer.status = TransferStatus::Cancelled;
        completion.complete(transfer);
    }
}

fn run_lane(
    class: EndpointClass,
    device: &SimDevice,
    completed: &[AtomicU64; 3],
    rx: Receiver<LaneMsg>,
) {
    let mut queue: VecDeque<(Transfer, Completion)> = VecDeque::new();
    let mut cursor = 0usize;
    let mut deadline = Instant::now() + device.tick;
    loop {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(LaneMsg::Submit(transfer, completion)) => queue.push_back((transfer, completion)),
            Ok(LaneMsg::Cancel(ack)) => {
                cancel(&mut queue);
                // Resubmissions from handlers that ran before the cancel was
                // seen are already in the channel.
                let mut shutdown = false;
                while let Ok(msg) = rx.try_recv() {
                    match msg {
                        LaneMsg::Submit(transfer, completion) => {
                            queue.push_back((transfer, completion));
                            cancel(&mut queue);
                        }
                        LaneMsg::Cancel(ack) => {
                            let _ = ack.send(());
                        }
                        LaneMsg::Shutdown => shutdown = true,
                    }
                }
                let _ = ack.send(());
                if shutdown {
                    break;
                }
            }
            Ok(LaneMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                cancel(&mut queue);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                deadline += device.tick;
                if let Some((mut transfer, completion)) = queue.pop_front() {
                    device.fill(&mut transfer, &mut cursor);
                    completed[lane_index(class)].fetch_add(1, Ordering::Relaxed);
                    completion.complete(transfer);
                }
            }
        }
    }
    debug!(?class, "simulated endpoint stopped");
}
