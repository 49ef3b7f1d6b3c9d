mod common;

use common::{params_48k, ControlCall, Rig};
use us144_stream::control::{ControlError, ControlStep};
use us144_stream::{Direction, EngineConfig, HostFormat, HwParams, SampleRate, StreamError};

fn outs(calls: &[ControlCall]) -> Vec<(u8, u8, u16, u16, Vec<u8>)> {
    calls
        .iter()
        .filter_map(|call| match call {
            ControlCall::Out(setup, data) => Some((
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data.clone(),
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn rate_change_replays_the_configuration_sequence() {
    let rig = Rig::new(EngineConfig::default());
    rig.engine
        .open_substream(Direction::Playback, rig.host.clone())
        .unwrap();
    rig.engine
        .hw_params(Direction::Playback, params_48k(4096, 512))
        .unwrap();

    let calls = rig.pipe.calls();
    assert_eq!(calls.len(), 10);
    match &calls[0] {
        ControlCall::In(setup) => {
            assert_eq!((setup.request_type, setup.request, setup.value), (0xc0, 0x49, 0));
        }
        other => panic!("expected the handshake read, got {other:?}"),
    }
    let rate = vec![0x80, 0xbb, 0x00];
    assert_eq!(
        outs(&calls),
        vec![
            (0x40, 0x49, 0x0010, 0, vec![]),
            (0x22, 0x01, 0x0100, 0x86, rate.clone()),
            (0x22, 0x01, 0x0100, 0x02, rate),
            (0x40, 0x41, 0x0d04, 0x0101, vec![]),
            (0x40, 0x41, 0x0e00, 0x0101, vec![]),
            (0x40, 0x41, 0x0f00, 0x0101, vec![]),
            (0x40, 0x41, 0x1002, 0x0101, vec![]),
            (0x40, 0x41, 0x110b, 0x0101, vec![]),
            (0x40, 0x49, 0x0030, 0, vec![]),
        ]
    );
    assert_eq!(rig.engine.current_rate(), Some(SampleRate::Hz48000));

    // The same rate on the other direction does not touch the device.
    rig.engine
        .open_substream(Direction::Capture, rig.host.clone())
        .unwrap();
    rig.engine
        .hw_params(Direction::Capture, params_48k(2048, 256))
        .unwrap();
    assert_eq!(rig.pipe.calls().len(), 10);
}

#[test]
fn failed_configuration_forgets_the_rate() {
    let rig = Rig::new(EngineConfig::default());
    rig.engine
        .open_substream(Direction::Playback, rig.host.clone())
        .unwrap();
    rig.pipe.fail_call(Some(3));

    let err = rig
        .engine
        .hw_params(Direction::Playback, params_48k(4096, 512))
        .unwrap_err();
    assert_eq!(
        err,
        StreamError::Control {
            step: ControlStep::SetRate {
                endpoint: 0x02,
                rate: SampleRate::Hz48000,
            },
            source: ControlError::Timeout,
        }
    );
    assert_eq!(rig.engine.current_rate(), None);
    assert_eq!(rig.pipe.calls().len(), 4);

    rig.pipe.fail_call(None);
    rig.engine
        .hw_params(Direction::Playback, params_48k(4096, 512))
        .unwrap();
    assert_eq!(rig.engine.current_rate(), Some(SampleRate::Hz48000));
}

#[test]
fn handshake_failure_only_warns() {
    let rig = Rig::new(EngineConfig::default());
    rig.engine
        .open_substream(Direction::Playback, rig.host.clone())
        .unwrap();
    rig.pipe.fail_call(Some(0));
    rig.engine
        .hw_params(Direction::Playback, params_48k(4096, 512))
        .unwrap();
    assert_eq!(rig.pipe.calls().len(), 10);
}

#[test]
fn rate_change_while_streaming_is_busy() {
    let rig = Rig::new(EngineConfig::default());
    rig.prepared(Direction::Playback, params_48k(4096, 512));
    rig.start(Direction::Playback);

    rig.engine
        .open_substream(Direction::Capture, rig.host.clone())
        .unwrap();
    let params = HwParams::new(SampleRate::Hz96000, HostFormat::S24Packed, 4096, 512);
    assert!(matches!(
        rig.engine.hw_params(Direction::Capture, params),
        Err(StreamError::Busy)
    ));
    assert_eq!(rig.engine.current_rate(), Some(SampleRate::Hz48000));
}

#[test]
fn resume_restores_interfaces_then_reconfigures() {
    let rig = Rig::new(EngineConfig::default());
    rig.prepared(Direction::Playback, params_48k(4096, 512));
    rig.start(Direction::Playback);

    rig.engine.suspend();
    assert!(!rig.engine.is_streaming());
    assert_eq!(rig.engine.in_flight(), 0);

    rig.engine.resume().unwrap();
    let calls = rig.pipe.calls();
    assert_eq!(calls.len(), 10 + 2 + 10);
    assert_eq!(calls[10], ControlCall::SetInterface(0, 1));
    assert_eq!(calls[11], ControlCall::SetInterface(1, 1));
    assert!(matches!(calls[12], ControlCall::In(_)));

    rig.engine
        .trigger(Direction::Playback, us144_stream::TriggerCommand::Resume)
        .unwrap();
    assert!(rig.engine.is_streaming());
}
