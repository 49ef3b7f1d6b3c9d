use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use us144_codec::{encode_block, DecodedBlock, BLOCK_BYTES};
use us144_stream::control::{ControlError, ControlPipe, SetupPacket};
use us144_stream::sim::ManualTransport;
use us144_stream::{
    Direction, Engine, EngineConfig, HostFormat, HwParams, PcmHost, SampleRate, TriggerCommand,
};

struct NullPipe;

impl ControlPipe for NullPipe {
    fn control_out(&mut self, _: SetupPacket, _: &[u8], _: Duration) -> Result<(), ControlError> {
        Ok(())
    }

    fn control_in(
        &mut self,
        _: SetupPacket,
        data: &mut [u8],
        _: Duration,
    ) -> Result<usize, ControlError> {
        data[0] = 0x12;
        Ok(1)
    }

    fn set_interface(&mut self, _: u8, _: u8) -> Result<(), ControlError> {
        Ok(())
    }
}

#[derive(Default)]
struct NullHost(AtomicU64);

impl PcmHost for NullHost {
    fn period_elapsed(&self, _: Direction) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn xrun(&self, _: Direction) {}
}

fn completion_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("completion");
    group.measurement_time(Duration::from_secs(10));

    for rate in [SampleRate::Hz48000, SampleRate::Hz96000] {
        group.bench_function(format!("duplex_ms_{}", rate.hz()), |b| {
            let transport = Arc::new(ManualTransport::new());
            let engine = Engine::open(EngineConfig::default(), transport.clone(), Box::new(NullPipe))
                .expect("engine");
            let host = Arc::new(NullHost::default());
            let params = HwParams::new(rate, HostFormat::S24Packed, 8192, 512);
            for direction in Direction::BOTH {
                engine.open_substream(direction, host.clone()).expect("open");
                engine.hw_params(direction, params).expect("hw_params");
                engine.prepare(direction).expect("prepare");
            }
            engine
                .trigger(Direction::Playback, TriggerCommand::Start)
                .expect("start");

            let feedback = rate.frames_per_ms() as u8;
            let mut block = [0u8; BLOCK_BYTES];
            let frames: DecodedBlock = [[0x1234_5600, -0x1234_5600, 0x0765_4300, 0]; 8];
            encode_block(&frames, &mut block);

            // One millisecond of bus traffic: a feedback reading, eight
            // microframes of playback and capture.
            b.iter(|| {
                transport.complete_feedback(Some(feedback));
                for _ in 0..2 {
                    transport.complete_playback();
                }
                for _ in 0..rate.frames_per_ms() as usize / 8 {
                    transport.complete_capture(black_box(&block));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, completion_cycle);
criterion_main!(benches);
