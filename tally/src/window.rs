//! Window alignment and drift correction
//!
//! A [`WindowClock`] keeps the time of the last flush and answers whether the
//! current window has elapsed. Every boundary it produces is a multiple of the
//! window length in epoch milliseconds. Two processes configured with the same
//! window therefore flush at the same instants even though they were started
//! at different times and never coordinate.
//!
//! # Alignment
//!
//! On start the last flush is snapped *down* to the previous multiple of the
//! window. If we start at 10:01 with a five minute window the last flush is
//! 10:00 and summaries are emitted at 10:05, 10:10 and so on. The first window
//! is shorter than the rest. A smaller first sample is preferred over windows
//! that disagree between reporters.
//!
//! # Drift correction
//!
//! Pings may arrive late, be skipped or be batched. When a flush is due the
//! new last flush is the multiple of the window *nearest* to now, not the
//! previous boundary plus one window. A ping 30 seconds late into a five
//! minute window flushes at the boundary it missed; a ping that arrives after
//! a skipped window and is closer to the next boundary flushes early, at that
//! next boundary. The difference between the chosen boundary and now is the
//! [`Correction`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Corrections at least this large, in either direction, are reported.
pub const CORRECTION_WARN_MS: u64 = 30_000;

/// Windows at most this long summarize at [`Resolution::High`].
pub const HIGH_RESOLUTION_MAX_MS: u64 = 1_000;

/// Errors produced by [`WindowClock`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The window length was zero.
    #[error("The window must be > 0 milliseconds")]
    Zero,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
/// Coarseness tier attached to every summary.
///
/// Consumers use this as a storage hint. It is derived from the window
/// length and never interpreted further here.
pub enum Resolution {
    /// Sub-second granularity, serialized as `1`
    High,
    /// Minute granularity, serialized as `60`
    Standard,
}

impl Resolution {
    /// The resolution appropriate for a window of `window_ms` milliseconds.
    #[must_use]
    pub const fn for_window(window_ms: u64) -> Self {
        if window_ms <= HIGH_RESOLUTION_MAX_MS {
            Resolution::High
        } else {
            Resolution::Standard
        }
    }
}

impl From<Resolution> for u8 {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::High => 1,
            Resolution::Standard => 60,
        }
    }
}

impl TryFrom<u8> for Resolution {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Resolution::High),
            60 => Ok(Resolution::Standard),
            other => Err(format!("unknown resolution {other}, expected 1 or 60")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Signed distance from now to a corrected flush boundary.
///
/// Negative values mean the flush was late and the boundary lies in the
/// past. Positive values mean the boundary lies in the future and the flush
/// is early.
pub struct Correction {
    millis: i64,
}

impl Correction {
    /// Distance in milliseconds, boundary minus now.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.millis
    }

    /// Whether the correction is large enough to tell an operator about.
    #[must_use]
    pub const fn is_excessive(&self) -> bool {
        self.millis.unsigned_abs() >= CORRECTION_WARN_MS
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.millis as f64 / 1_000.0;
        write!(f, "Summary flush time is off by {seconds:+.1} seconds")
    }
}

#[derive(Debug, Clone, Copy)]
/// Decides when a window has elapsed and where its boundary falls.
pub struct WindowClock {
    window_ms: u64,
    resolution: Resolution,
    last_flush: Option<u64>,
}

impl WindowClock {
    /// Create a new, not yet started, `WindowClock`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Zero`] if `window_ms` is zero.
    pub fn new(window_ms: u64) -> Result<Self, Error> {
        if window_ms == 0 {
            return Err(Error::Zero);
        }
        Ok(Self {
            window_ms,
            resolution: Resolution::for_window(window_ms),
            last_flush: None,
        })
    }

    /// Window length in milliseconds
    #[must_use]
    pub const fn window(&self) -> u64 {
        self.window_ms
    }

    /// Resolution derived from the window length
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Epoch milliseconds of the last flush boundary, `None` if not started.
    #[must_use]
    pub const fn last_flush(&self) -> Option<u64> {
        self.last_flush
    }

    /// Snap the last flush down to the window multiple at or before `now`.
    pub fn start(&mut self, now: u64) {
        self.last_flush = Some(now - (now % self.window_ms));
    }

    /// Whether a full window has passed since the last flush.
    ///
    /// Always false when not started, and false when the last flush was
    /// corrected to a boundary after `now`.
    #[must_use]
    pub fn should_flush(&self, now: u64) -> bool {
        self.last_flush
            .and_then(|last| now.checked_sub(last))
            .is_some_and(|elapsed| elapsed >= self.window_ms)
    }

    /// Move the last flush to the window multiple nearest `now`.
    ///
    /// Ties round up. Returns the boundary and the correction relative to
    /// `now`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&mut self, now: u64) -> (u64, Correction) {
        let window = u128::from(self.window_ms);
        let now_wide = u128::from(now);
        // floor(now / window + 1/2) without leaving integers
        let multiple = (2 * now_wide + window) / (2 * window);
        // Rounding up past the largest representable multiple saturates to it.
        let boundary = u64::try_from(multiple * window)
            .unwrap_or(u64::MAX - u64::MAX % self.window_ms);

        self.last_flush = Some(boundary);
        let millis = (i128::from(boundary) - i128::from(now)) as i64;
        (boundary, Correction { millis })
    }

    /// Forget the last flush. The clock reads as not started.
    pub fn stop(&mut self) {
        self.last_flush = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test::time;
    use proptest::prelude::*;

    const FIVE_MINUTES: u64 = 5 * 60 * 1_000;

    #[test]
    fn zero_window_rejected() {
        assert_eq!(WindowClock::new(0).unwrap_err(), Error::Zero);
    }

    #[test]
    fn resolution_tiers() {
        assert_eq!(WindowClock::new(1).unwrap().resolution(), Resolution::High);
        assert_eq!(WindowClock::new(1_000).unwrap().resolution(), Resolution::High);
        assert_eq!(
            WindowClock::new(1_001).unwrap().resolution(),
            Resolution::Standard
        );
        assert_eq!(u8::from(Resolution::High), 1);
        assert_eq!(u8::from(Resolution::Standard), 60);
        assert!(Resolution::try_from(7).is_err());
    }

    #[test]
    fn not_started_never_flushes() {
        let clock = WindowClock::new(200).unwrap();
        assert_eq!(clock.last_flush(), None);
        assert!(!clock.should_flush(0));
        assert!(!clock.should_flush(u64::MAX));
    }

    #[test]
    fn start_snaps_down_to_window_multiple() {
        let mut clock = WindowClock::new(FIVE_MINUTES).unwrap();
        clock.start(time(14, 8, 40, 1));
        assert_eq!(clock.last_flush(), Some(time(14, 5, 0, 0)));

        assert!(!clock.should_flush(time(14, 8, 41, 0)));
        assert!(clock.should_flush(time(14, 10, 0, 0)));
        let (boundary, correction) = clock.advance(time(14, 10, 0, 0));
        assert_eq!(boundary, time(14, 10, 0, 0));
        assert_eq!(correction.millis(), 0);
    }

    #[test]
    fn late_flush_corrected_back() {
        let mut clock = WindowClock::new(FIVE_MINUTES).unwrap();
        clock.start(time(14, 10, 0, 0));
        assert_eq!(clock.last_flush(), Some(time(14, 10, 0, 0)));

        let now = time(14, 15, 30, 0);
        assert!(clock.should_flush(now));
        let (boundary, correction) = clock.advance(now);
        assert_eq!(boundary, time(14, 15, 0, 0));
        assert_eq!(correction.millis(), -30_000);
        assert!(correction.is_excessive());
        assert_eq!(
            correction.to_string(),
            "Summary flush time is off by -30.0 seconds"
        );
    }

    #[test]
    fn early_flush_corrected_forward() {
        let mut clock = WindowClock::new(FIVE_MINUTES).unwrap();
        clock.start(time(14, 30, 0, 0));

        let now = time(14, 39, 30, 0);
        assert!(clock.should_flush(now));
        let (boundary, correction) = clock.advance(now);
        assert_eq!(boundary, time(14, 40, 0, 0));
        assert_eq!(correction.millis(), 30_000);
        assert_eq!(
            correction.to_string(),
            "Summary flush time is off by +30.0 seconds"
        );

        // The boundary now lies in the future; pinging at it is a no-op.
        assert!(!clock.should_flush(now));
        assert!(!clock.should_flush(time(14, 40, 0, 0)));
    }

    #[test]
    fn small_corrections_are_quiet() {
        let mut clock = WindowClock::new(FIVE_MINUTES).unwrap();
        clock.start(time(14, 10, 0, 0));
        let (_, correction) = clock.advance(time(14, 15, 0, 250));
        assert_eq!(correction.millis(), -250);
        assert!(!correction.is_excessive());
    }

    #[test]
    fn ties_round_up() {
        let mut clock = WindowClock::new(100).unwrap();
        clock.start(0);
        let (boundary, correction) = clock.advance(150);
        assert_eq!(boundary, 200);
        assert_eq!(correction.millis(), 50);
    }

    #[test]
    fn advance_saturates_at_largest_multiple() {
        let mut clock = WindowClock::new(1_000).unwrap();
        let largest = u64::MAX - u64::MAX % 1_000;
        clock.start(largest);

        let (boundary, correction) = clock.advance(u64::MAX - 10);
        assert_eq!(boundary, largest);
        assert_eq!(clock.last_flush(), Some(largest));
        assert_eq!(correction.millis(), -605);
    }

    #[test]
    fn stop_clears_last_flush() {
        let mut clock = WindowClock::new(100).unwrap();
        clock.start(1_234);
        clock.stop();
        assert_eq!(clock.last_flush(), None);
        assert!(!clock.should_flush(10_000));
    }

    proptest! {
        #[test]
        fn start_is_largest_multiple_at_or_before_now(window in 1u64..10_000_000, now in 0u64..(u64::MAX / 4)) {
            let mut clock = WindowClock::new(window).unwrap();
            clock.start(now);
            let last = clock.last_flush().unwrap();
            prop_assert_eq!(last % window, 0);
            prop_assert!(last <= now);
            prop_assert!(now - last < window);
        }

        #[test]
        fn advance_is_nearest_multiple(window in 1u64..10_000_000, now in 0u64..(u64::MAX / 4)) {
            let mut clock = WindowClock::new(window).unwrap();
            let (boundary, correction) = clock.advance(now);
            prop_assert_eq!(boundary % window, 0);
            prop_assert_eq!(clock.last_flush(), Some(boundary));
            // Never more than half a window away.
            prop_assert!(correction.millis().unsigned_abs() * 2 <= window);
            prop_assert_eq!(i128::from(now) + i128::from(correction.millis()), i128::from(boundary));
        }

        #[test]
        fn regular_pings_never_drift(window in 1u64..1_000_000, start in 0u64..1_000_000_000_000, windows in 1usize..50) {
            let mut clock = WindowClock::new(window).unwrap();
            let aligned = start - start % window;
            clock.start(aligned);
            let mut now = aligned;
            for _ in 0..windows {
                now += window;
                prop_assert!(clock.should_flush(now));
                let (boundary, correction) = clock.advance(now);
                prop_assert_eq!(boundary, now);
                prop_assert_eq!(correction.millis(), 0);
            }
        }
    }
}
