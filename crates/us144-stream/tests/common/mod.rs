#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use us144_stream::control::{ControlError, ControlPipe, SetupPacket, HANDSHAKE_SUCCESS};
use us144_stream::sim::ManualTransport;
use us144_stream::{
    Direction, Engine, EngineConfig, HostFormat, HwParams, PcmBuffer, PcmHost, SampleRate,
    TriggerCommand,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Out(SetupPacket, Vec<u8>),
    In(SetupPacket),
    SetInterface(u8, u8),
}

/// Control pipe that records every request and can fail the n-th one.
#[derive(Clone, Default)]
pub struct ScriptedPipe {
    pub calls: Arc<Mutex<Vec<ControlCall>>>,
    pub fail_at: Arc<Mutex<Option<usize>>>,
}

impl ScriptedPipe {
    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls.lock().clone()
    }

    pub fn fail_call(&self, index: Option<usize>) {
        *self.fail_at.lock() = index;
    }

    fn record(&self, call: ControlCall) -> Result<(), ControlError> {
        let mut calls = self.calls.lock();
        let index = calls.len();
        calls.push(call);
        if *self.fail_at.lock() == Some(index) {
            return Err(ControlError::Timeout);
        }
        Ok(())
    }
}

impl ControlPipe for ScriptedPipe {
    fn control_out(
        &mut self,
        setup: SetupPacket,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), ControlError> {
        self.record(ControlCall::Out(setup, data.to_vec()))
    }

    fn control_in(
        &mut self,
        setup: SetupPacket,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, ControlError> {
        self.record(ControlCall::In(setup))?;
        data[0] = HANDSHAKE_SUCCESS;
        Ok(1)
    }

    fn set_interface(&mut self, interface: u8, alt_setting: u8) -> Result<(), ControlError> {
        self.record(ControlCall::SetInterface(interface, alt_setting))
    }
}

#[derive(Default)]
pub struct CountingHost {
    periods: [AtomicU64; 2],
    xruns: [AtomicU64; 2],
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Playback => 0,
        Direction::Capture => 1,
    }
}

impl CountingHost {
    pub fn periods(&self, direction: Direction) -> u64 {
        self.periods[slot(direction)].load(Ordering::SeqCst)
    }

    pub fn xruns(&self, direction: Direction) -> u64 {
        self.xruns[slot(direction)].load(Ordering::SeqCst)
    }
}

impl PcmHost for CountingHost {
    fn period_elapsed(&self, direction: Direction) {
        self.periods[slot(direction)].fetch_add(1, Ordering::SeqCst);
    }

    fn xrun(&self, direction: Direction) {
        self.xruns[slot(direction)].fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Rig {
    pub engine: Engine,
    pub transport: Arc<ManualTransport>,
    pub pipe: ScriptedPipe,
    pub host: Arc<CountingHost>,
}

impl Rig {
    pub fn new(config: EngineConfig) -> Self {
        let transport = Arc::new(ManualTransport::new());
        let pipe = ScriptedPipe::default();
        let engine = Engine::open(config, transport.clone(), Box::new(pipe.clone())).unwrap();
        Self {
            engine,
            transport,
            pipe,
            host: Arc::new(CountingHost::default()),
        }
    }

    /// Opens, configures and prepares `direction`.
    pub fn prepared(&self, direction: Direction, params: HwParams) -> Arc<PcmBuffer> {
        self.engine
            .open_substream(direction, self.host.clone())
            .unwrap();
        let buffer = self.engine.hw_params(direction, params).unwrap();
        self.engine.prepare(direction).unwrap();
        buffer
    }

    pub fn start(&self, direction: Direction) {
        self.engine
            .trigger(direction, TriggerCommand::Start)
            .unwrap();
    }

    /// Completes feedback transfers carrying `value` until the tracker locks.
    pub fn sync(&self, value: u8) -> usize {
        let mut count = 0;
        while self.engine.sync_state() != us144_stream::SyncState::Synced {
            assert!(self.transport.complete_feedback(Some(value)));
            count += 1;
            assert!(count < 100, "feedback never synchronised");
        }
        count
    }
}

pub fn params_48k(buffer_frames: usize, period_frames: usize) -> HwParams {
    HwParams::new(
        SampleRate::Hz48000,
        HostFormat::S24Packed,
        buffer_frames,
        period_frames,
    )
}
