//! Channel routing selectors.
//!
//! Each selector picks which input pair feeds one output pair. Routing is a
//! remap of whole pairs, never a mix.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("routing selector index {0} out of range")]
pub struct InvalidSelector(pub u32);

/// Source of a playback output pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackSource {
    #[default]
    Playback12,
    Playback34,
}

/// Source of a capture channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    #[default]
    Analog,
    Digital,
}

impl PlaybackSource {
    pub const LABELS: [&'static str; 2] = ["Playback 1-2", "Playback 3-4"];

    #[inline]
    pub const fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn pair(self) -> usize {
        self as usize
    }
}

impl CaptureSource {
    pub const LABELS: [&'static str; 2] = ["Analog In", "Digital In"];

    #[inline]
    pub const fn index(self) -> u32 {
        self as u32
    }

    #[inline]
    fn pair(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for PlaybackSource {
    type Error = InvalidSelector;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(PlaybackSource::Playback12),
            1 => Ok(PlaybackSource::Playback34),
            other => Err(InvalidSelector(other)),
        }
    }
}

impl TryFrom<u32> for CaptureSource {
    type Error = InvalidSelector;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(CaptureSource::Analog),
            1 => Ok(CaptureSource::Digital),
            other => Err(InvalidSelector(other)),
        }
    }
}

impl fmt::Display for PlaybackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::LABELS[self.pair()])
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::LABELS[self.pair()])
    }
}

/// Outputs 0-1 take input pair `a`, outputs 2-3 take input pair `b`.
#[inline]
fn route_pairs<T: Copy>(frame: [T; 4], a: usize, b: usize) -> [T; 4] {
    [
        frame[2 * a],
        frame[2 * a + 1],
        frame[2 * b],
        frame[2 * b + 1],
    ]
}

/// Playback matrix: host channels to line outputs (1-2) and digital outputs (3-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlaybackRouting {
    pub line_out: PlaybackSource,
    pub digital_out: PlaybackSource,
}

impl PlaybackRouting {
    #[inline]
    pub fn apply<T: Copy>(&self, frame: [T; 4]) -> [T; 4] {
        route_pairs(frame, self.line_out.pair(), self.digital_out.pair())
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.line_out == PlaybackSource::Playback12 && self.digital_out == PlaybackSource::Playback34
    }
}

/// Capture matrix: device inputs (analog 1-2, digital 3-4) to host channels.
///
/// With analog selected for capture 3-4 the analog pair is duplicated there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureRouting {
    pub capture_12: CaptureSource,
    pub capture_34: CaptureSource,
}

impl CaptureRouting {
    #[inline]
    pub fn apply<T: Copy>(&self, frame: [T; 4]) -> [T; 4] {
        route_pairs(frame, self.capture_12.pair(), self.capture_34.pair())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Routing {
    pub playback: PlaybackRouting,
    pub capture: CaptureRouting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_selector_index() {
        assert_eq!(PlaybackSource::Playback34.to_string(), "Playback 3-4");
        assert_eq!(CaptureSource::Analog.to_string(), "Analog In");
        assert_eq!(CaptureSource::try_from(1), Ok(CaptureSource::Digital));
        assert_eq!(PlaybackSource::try_from(2), Err(InvalidSelector(2)));
    }

    #[test]
    fn default_playback_routing_mirrors_first_pair() {
        let routing = PlaybackRouting::default();
        assert!(!routing.is_identity());
        assert_eq!(routing.apply([1, 2, 3, 4]), [1, 2, 1, 2]);
        let straight = PlaybackRouting {
            line_out: PlaybackSource::Playback12,
            digital_out: PlaybackSource::Playback34,
        };
        assert!(straight.is_identity());
        assert_eq!(straight.apply([1, 2, 3, 4]), [1, 2, 3, 4]);
    }

    #[test]
    fn playback_truth_table() {
        use PlaybackSource::*;
        let host = [10, 11, 12, 13];
        let table = [
            (Playback12, Playback12, [10, 11, 10, 11]),
            (Playback12, Playback34, [10, 11, 12, 13]),
            (Playback34, Playback12, [12, 13, 10, 11]),
            (Playback34, Playback34, [12, 13, 12, 13]),
        ];
        for (line_out, digital_out, expected) in table {
            let routing = PlaybackRouting {
                line_out,
                digital_out,
            };
            assert_eq!(routing.apply(host), expected, "{line_out} / {digital_out}");
        }
    }

    #[test]
    fn capture_truth_table() {
        use CaptureSource::*;
        let wire = [20, 21, 22, 23];
        let table = [
            (Analog, Analog, [20, 21, 20, 21]),
            (Analog, Digital, [20, 21, 22, 23]),
            (Digital, Analog, [22, 23, 20, 21]),
            (Digital, Digital, [22, 23, 22, 23]),
        ];
        for (capture_12, capture_34, expected) in table {
            let routing = CaptureRouting {
                capture_12,
                capture_34,
            };
            assert_eq!(routing.apply(wire), expected, "{capture_12} / {capture_34}");
        }
    }
}
