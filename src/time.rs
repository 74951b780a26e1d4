//! Frame and wall-clock time representations
//!
//! All timeline positions are expressed as 64-bit signed sample indices
//! ("frames") at a prevailing sample rate. Plugin timestamps and context
//! windows use an exact second/nanosecond pair rather than floating-point
//! seconds, so that frame conversions round identically everywhere.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One audio sample position at the prevailing sample rate.
///
/// Negative values are disallowed for events; they occur transiently in
/// block-frame arithmetic (e.g. centred FFT windows near frame 0).
pub type Frame = i64;

const NANOS_PER_SEC: i32 = 1_000_000_000;

/// An exact time value: seconds plus nanoseconds.
///
/// Always normalised so that `nsec` has the same sign as `sec` (or is zero)
/// and `|nsec| < 1_000_000_000`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RealTime {
    pub sec: i64,
    pub nsec: i32,
}

impl RealTime {
    pub const fn zero() -> Self {
        RealTime { sec: 0, nsec: 0 }
    }

    /// Construct from a second/nanosecond pair, normalising.
    pub fn new(sec: i64, nsec: i32) -> Self {
        let mut sec = sec + (nsec / NANOS_PER_SEC) as i64;
        let mut nsec = nsec % NANOS_PER_SEC;
        if sec > 0 && nsec < 0 {
            sec -= 1;
            nsec += NANOS_PER_SEC;
        } else if sec < 0 && nsec > 0 {
            sec += 1;
            nsec -= NANOS_PER_SEC;
        }
        RealTime { sec, nsec }
    }

    pub fn from_seconds(seconds: f64) -> Self {
        let sec = seconds.trunc() as i64;
        let nsec = ((seconds - seconds.trunc()) * NANOS_PER_SEC as f64).round() as i32;
        RealTime::new(sec, nsec)
    }

    pub fn to_seconds(self) -> f64 {
        self.sec as f64 + self.nsec as f64 / NANOS_PER_SEC as f64
    }

    pub fn is_zero(self) -> bool {
        self.sec == 0 && self.nsec == 0
    }

    /// Convert a frame number at the given rate to a time value.
    pub fn from_frame(frame: Frame, sample_rate: f64) -> Self {
        if sample_rate == 0.0 {
            return RealTime::zero();
        }
        RealTime::from_seconds(frame as f64 / sample_rate)
    }

    /// Convert a time value to a frame number at the given rate, rounding to
    /// the nearest frame.
    pub fn to_frame(self, sample_rate: f64) -> Frame {
        (self.to_seconds() * sample_rate).round() as Frame
    }
}

impl fmt::Display for RealTime {
    /// Seconds with millisecond precision, e.g. `3.250`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let neg = self.sec < 0 || self.nsec < 0;
        let sec = self.sec.abs();
        let ms = (self.nsec.abs() + 500_000) / 1_000_000;
        let (sec, ms) = if ms >= 1000 { (sec + 1, ms - 1000) } else { (sec, ms) };
        write!(f, "{}{}.{:03}", if neg { "-" } else { "" }, sec, ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalisation() {
        let t = RealTime::new(1, 1_500_000_000);
        assert_eq!(t, RealTime { sec: 2, nsec: 500_000_000 });

        let t = RealTime::new(2, -500_000_000);
        assert_eq!(t, RealTime { sec: 1, nsec: 500_000_000 });

        let t = RealTime::new(-1, -1_500_000_000);
        assert_eq!(t, RealTime { sec: -2, nsec: -500_000_000 });
    }

    #[test]
    fn test_seconds_roundtrip() {
        let t = RealTime::from_seconds(1.25);
        assert_eq!(t, RealTime { sec: 1, nsec: 250_000_000 });
        assert!((t.to_seconds() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_frame_conversions() {
        // 512 frames at 44100Hz and back
        let t = RealTime::from_frame(512, 44100.0);
        assert_eq!(t.to_frame(44100.0), 512);

        // exact second boundaries
        let t = RealTime::from_frame(48000, 48000.0);
        assert_eq!(t, RealTime { sec: 1, nsec: 0 });
    }

    #[test]
    fn test_display() {
        assert_eq!(RealTime::new(3, 250_000_000).to_string(), "3.250");
        assert_eq!(RealTime::zero().to_string(), "0.000");
        assert_eq!(RealTime::new(-1, -500_000_000).to_string(), "-1.500");
    }
}
