//! Sources of wall-clock time

use std::time::{SystemTime, UNIX_EPOCH};

/// The `Clock` consulted by the processor for the current time
///
/// Window boundaries are computed in epoch milliseconds, so implementations
/// must report time on that scale. Tests substitute a clock they control.
pub trait Clock {
    /// Milliseconds elapsed since the Unix epoch
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
/// A clock that operates with respect to real-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    /// Return the milliseconds since the Unix epoch.
    ///
    /// A system clock set before the epoch reads as zero.
    #[allow(clippy::cast_possible_truncation)]
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

impl<C> Clock for &C
where
    C: Clock + ?Sized,
{
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
