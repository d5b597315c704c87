//! Capture time for sealed segments
//!
//! Wall-clock microseconds since the Unix epoch. Ordering between segments is
//! carried by [`crate::SegmentId`], never by capture time.

use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wall-clock capture timestamp in microseconds since the Unix epoch
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CaptureTime(pub i64);

impl CaptureTime {
    pub const ZERO: CaptureTime = CaptureTime(0);

    /// Current wall-clock time
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => CaptureTime(since.as_micros() as i64),
            Err(before) => CaptureTime(-(before.duration().as_micros() as i64)),
        }
    }

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        CaptureTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        CaptureTime(millis * 1000)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        CaptureTime(self.0.saturating_add(duration.as_micros() as i64))
    }
}

impl Add<Duration> for CaptureTime {
    type Output = CaptureTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<CaptureTime> for CaptureTime {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: CaptureTime) -> Self::Output {
        let diff = self.0.saturating_sub(rhs.0);
        Duration::from_micros(diff.max(0) as u64)
    }
}

impl std::fmt::Debug for CaptureTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t({}ms)", self.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_time_arithmetic() {
        let t = CaptureTime::from_millis(1000);
        let later = t + Duration::from_millis(250);
        assert_eq!(later.as_millis(), 1250);
        assert_eq!(later - t, Duration::from_millis(250));
        assert_eq!(t - later, Duration::ZERO);
    }

    #[test]
    fn test_capture_time_difference_saturates() {
        let max = CaptureTime::from_micros(i64::MAX);
        let min = CaptureTime::from_micros(i64::MIN);
        assert_eq!(max - min, Duration::from_micros(i64::MAX as u64));
        assert_eq!(min - max, Duration::ZERO);
    }

    #[test]
    fn test_capture_time_now_is_after_epoch() {
        assert!(CaptureTime::now() > CaptureTime::ZERO);
    }
}
