use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// USB high-speed microframes per second.
pub const MICROFRAMES_PER_SECOND: u32 = 8_000;
/// Microframes covered by one feedback reading.
pub const MICROFRAMES_PER_READING: u32 = 8;

/// Sample rates the interface can be clocked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz88200,
    Hz96000,
}

impl SampleRate {
    pub const ALL: [SampleRate; 4] = [
        SampleRate::Hz44100,
        SampleRate::Hz48000,
        SampleRate::Hz88200,
        SampleRate::Hz96000,
    ];

    #[inline]
    pub const fn hz(self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
            SampleRate::Hz88200 => 88_200,
            SampleRate::Hz96000 => 96_000,
        }
    }

    /// Whole frames sent per microframe when no feedback is available.
    #[inline]
    pub const fn nominal_frames_per_packet(self) -> u32 {
        self.hz() / MICROFRAMES_PER_SECOND
    }

    /// Frames per millisecond, the centre of the accepted feedback window.
    #[inline]
    pub const fn frames_per_ms(self) -> u32 {
        self.hz() / 1_000
    }

    /// Upper bound of frames in one packet at this rate, used to size buffers.
    #[inline]
    pub const fn max_frames_per_packet(self) -> u32 {
        self.nominal_frames_per_packet() + 2
    }

    /// `SET_CUR` payload: the rate as three little-endian bytes.
    pub const fn payload(self) -> [u8; 3] {
        let hz = self.hz();
        [hz as u8, (hz >> 8) as u8, (hz >> 16) as u8]
    }

    /// Vendor register selecting this rate.
    pub const fn register(self) -> u16 {
        match self {
            SampleRate::Hz44100 => 0x1000,
            SampleRate::Hz48000 => 0x1002,
            SampleRate::Hz88200 => 0x1008,
            SampleRate::Hz96000 => 0x100a,
        }
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = StreamError;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        SampleRate::ALL
            .into_iter()
            .find(|rate| rate.hz() == hz)
            .ok_or(StreamError::UnsupportedRate(hz))
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.hz()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}
