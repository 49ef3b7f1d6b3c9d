mod common;

use std::io::Write;

use common::Rig;
use us144_codec::{container_from_s24, encode_frame, WIRE_BYTES_PER_FRAME};
use us144_stream::{
    CaptureWireFormat, DecoderKind, Direction, EngineConfig, HostFormat, HwParams, SampleRate,
};

#[test]
fn loads_config_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{
            "playback_transfers": 4,
            "capture_format": "packed24",
            "capture_transfer_bytes": 576,
            "decoder": "reference",
            "log_burst": 3
        }}"#
    )
    .unwrap();

    let config = EngineConfig::load(file.path()).unwrap();
    assert_eq!(config.playback_transfers, 4);
    assert_eq!(config.capture_format, CaptureWireFormat::Packed24);
    assert_eq!(config.decoder, DecoderKind::Reference);
    assert_eq!(config.log_burst, 3);
    assert_eq!(config.feedback_transfers, EngineConfig::default().feedback_transfers);
}

#[test]
fn invalid_config_reports_the_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{ "accumulator_slots": 12 }}"#).unwrap();
    let err = EngineConfig::load(file.path()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains(&file.path().display().to_string()), "{message}");
    assert!(message.contains("accumulator_slots"), "{message}");

    let missing = file.path().with_extension("missing");
    assert!(EngineConfig::load(&missing).is_err());
}

#[test]
fn packed_capture_format_streams_plain_frames() {
    let config = EngineConfig {
        capture_format: CaptureWireFormat::Packed24,
        capture_transfer_bytes: 96 * 6,
        ..EngineConfig::default()
    };
    let rig = Rig::new(config);
    let params = HwParams::new(SampleRate::Hz44100, HostFormat::S24Packed, 96, 48);
    let buffer = rig.prepared(Direction::Capture, params);
    rig.start(Direction::Capture);

    let mut wire = vec![0u8; 16 * WIRE_BYTES_PER_FRAME];
    for (index, chunk) in wire.chunks_exact_mut(WIRE_BYTES_PER_FRAME).enumerate() {
        let value = container_from_s24(index as i32 * 1000);
        encode_frame(&[value, -value, value, -value], chunk);
    }
    assert!(rig.transport.complete_capture(&wire));
    assert_eq!(rig.engine.frames(Direction::Capture), 16);

    // Host frames are packed 24-bit, analog pair duplicated onto 3-4.
    let ring = buffer.lock();
    let frame = &ring[15 * 12..16 * 12];
    assert_eq!(&frame[..6], &wire[15 * 12..15 * 12 + 6]);
    assert_eq!(&frame[6..], &wire[15 * 12..15 * 12 + 6]);
}
