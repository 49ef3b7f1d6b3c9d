//! Device configuration over the control endpoint.
//!
//! The configuration for a rate is a fixed list of control requests,
//! replayed in order on every rate change and on resume.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::error::StreamError;
use crate::rate::SampleRate;
use crate::transport::{EP_AUDIO_IN, EP_AUDIO_OUT};

/// Host-to-device, class request, endpoint recipient.
pub const RT_H2D_CLASS_EP: u8 = 0x22;
/// Device-to-host, vendor request, device recipient.
pub const RT_D2H_VENDOR_DEV: u8 = 0xC0;
/// Host-to-device, vendor request, device recipient.
pub const RT_H2D_VENDOR_DEV: u8 = 0x40;

pub const UAC_SET_CUR: u8 = 0x01;
pub const UAC_SAMPLING_FREQ_CONTROL: u16 = 0x0100;
pub const VENDOR_REQ_REGISTER_WRITE: u8 = 0x41;
pub const VENDOR_REQ_MODE_CONTROL: u8 = 0x49;

pub const MODE_VAL_HANDSHAKE_READ: u16 = 0x0000;
pub const MODE_VAL_CONFIG: u16 = 0x0010;
pub const MODE_VAL_STREAM_START: u16 = 0x0030;
pub const HANDSHAKE_SUCCESS: u8 = 0x12;

pub const REG_ADDR_0D: u16 = 0x0d04;
pub const REG_ADDR_0E: u16 = 0x0e00;
pub const REG_ADDR_0F: u16 = 0x0f00;
pub const REG_ADDR_11: u16 = 0x110b;
pub const REG_VAL_ENABLE: u16 = 0x0101;

/// Interfaces re-selected to alternate setting 1 on resume.
pub const STREAMING_INTERFACES: [u8; 2] = [0, 1];
pub const STREAMING_ALT_SETTING: u8 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("control request timed out")]
    Timeout,
    #[error("control request stalled")]
    Stall,
    #[error("device disconnected")]
    Disconnected,
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },
    #[error("control transfer failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// One request of the configuration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStep {
    Handshake,
    ConfigMode,
    SetRate { endpoint: u8, rate: SampleRate },
    RegisterWrite { register: u16 },
    StreamStartMode,
    /// Alternate setting selection during resume.
    SetInterface { interface: u8 },
}

impl ControlStep {
    pub fn setup(&self) -> SetupPacket {
        match *self {
            ControlStep::Handshake => SetupPacket {
                request_type: RT_D2H_VENDOR_DEV,
                request: VENDOR_REQ_MODE_CONTROL,
                value: MODE_VAL_HANDSHAKE_READ,
                index: 0,
            },
            ControlStep::ConfigMode => SetupPacket {
                request_type: RT_H2D_VENDOR_DEV,
                request: VENDOR_REQ_MODE_CONTROL,
                value: MODE_VAL_CONFIG,
                index: 0,
            },
            ControlStep::SetRate { endpoint, .. } => SetupPacket {
                request_type: RT_H2D_CLASS_EP,
                request: UAC_SET_CUR,
                value: UAC_SAMPLING_FREQ_CONTROL,
                index: u16::from(endpoint),
            },
            ControlStep::RegisterWrite { register } => SetupPacket {
                request_type: RT_H2D_VENDOR_DEV,
                request: VENDOR_REQ_REGISTER_WRITE,
                value: register,
                index: REG_VAL_ENABLE,
            },
            ControlStep::StreamStartMode => SetupPacket {
                request_type: RT_H2D_VENDOR_DEV,
                request: VENDOR_REQ_MODE_CONTROL,
                value: MODE_VAL_STREAM_START,
                index: 0,
            },
            ControlStep::SetInterface { interface } => SetupPacket {
                request_type: 0x01,
                request: 0x0b,
                value: u16::from(STREAMING_ALT_SETTING),
                index: u16::from(interface),
            },
        }
    }
}

/// The full configuration sequence for `rate`.
pub fn rate_sequence(rate: SampleRate) -> [ControlStep; 10] {
    [
        ControlStep::Handshake,
        ControlStep::ConfigMode,
        ControlStep::SetRate {
            endpoint: EP_AUDIO_IN,
            rate,
        },
        ControlStep::SetRate {
            endpoint: EP_AUDIO_OUT,
            rate,
        },
        ControlStep::RegisterWrite {
            register: REG_ADDR_0D,
        },
        ControlStep::RegisterWrite {
            register: REG_ADDR_0E,
        },
        ControlStep::RegisterWrite {
            register: REG_ADDR_0F,
        },
        ControlStep::RegisterWrite {
            register: rate.register(),
        },
        ControlStep::RegisterWrite {
            register: REG_ADDR_11,
        },
        ControlStep::StreamStartMode,
    ]
}

/// Blocking access to the device's default control pipe.
pub trait ControlPipe: Send {
    fn control_out(
        &mut self,
        setup: SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), ControlError>;

    /// Returns the number of bytes read into `data`.
    fn control_in(
        &mut self,
        setup: SetupPacket,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, ControlError>;

    fn set_interface(&mut self, interface: u8, alt_setting: u8) -> Result<(), ControlError>;
}

/// Runs configuration sequences against a [`ControlPipe`].
pub struct DeviceControl {
    pipe: Box<dyn ControlPipe>,
    timeout: Duration,
}

impl DeviceControl {
    pub fn new(pipe: Box<dyn ControlPipe>, timeout: Duration) -> Self {
        Self { pipe, timeout }
    }

    fn run_step(&mut self, step: ControlStep) -> Result<(), StreamError> {
        let setup = step.setup();
        let result = match step {
            ControlStep::Handshake => {
                let mut reply = [0u8; 1];
                match self.pipe.control_in(setup, &mut reply, self.timeout) {
                    Ok(1) if reply[0] == HANDSHAKE_SUCCESS => {}
                    Ok(got) => warn!(
                        got,
                        value = reply[0],
                        "unexpected handshake reply, continuing"
                    ),
                    Err(err) => warn!(%err, "handshake read failed, continuing"),
                }
                Ok(())
            }
            ControlStep::SetRate { rate, .. } => {
                self.pipe.control_out(setup, &rate.payload(), self.timeout)
            }
            ControlStep::SetInterface { interface } => {
                self.pipe.set_interface(interface, STREAMING_ALT_SETTING)
            }
            _ => self.pipe.control_out(setup, &[], self.timeout),
        };
        result.map_err(|source| StreamError::Control { step, source })
    }

    /// Replays the configuration sequence for `rate`.
    pub fn configure(&mut self, rate: SampleRate) -> Result<(), StreamError> {
        info!(rate = rate.hz(), "configuring device");
        for step in rate_sequence(rate) {
            self.run_step(step)?;
        }
        Ok(())
    }

    /// Re-selects the streaming alternate settings after a resume.
    pub fn restore_interfaces(&mut self) -> Result<(), StreamError> {
        for interface in STREAMING_INTERFACES {
            self.run_step(ControlStep::SetInterface { interface })?;
        }
        Ok(())
    }
}
