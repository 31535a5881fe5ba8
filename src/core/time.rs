//! Monotonic time arithmetic for deadlines
//!
//! `TimeSpec` is a normalized (seconds, nanoseconds) pair. All constructors
//! and arithmetic keep `nanos < NANOS_PER_SEC`, so the derived ordering is
//! the chronological ordering.

use std::io;
use std::ops::Add;
use std::time::Duration;

/// Nanoseconds in one second
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Absolute point on the monotonic clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSpec {
    secs: u64,
    nanos: u32,
}

impl TimeSpec {
    /// Clock origin
    pub const ZERO: Self = Self { secs: 0, nanos: 0 };

    /// Latest representable instant
    pub const MAX: Self = Self {
        secs: u64::MAX,
        nanos: NANOS_PER_SEC - 1,
    };

    /// Create a time value, carrying excess nanoseconds into seconds
    #[inline]
    pub const fn new(secs: u64, nanos: u32) -> Self {
        let carry = (nanos / NANOS_PER_SEC) as u64;
        Self {
            secs: secs.saturating_add(carry),
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    /// Create from seconds and microseconds
    #[inline]
    pub fn from_micros(secs: u64, micros: u64) -> Self {
        Self::ZERO
            .saturating_add(Duration::from_secs(secs))
            .saturating_add(Duration::from_micros(micros))
    }

    #[inline(always)]
    pub const fn secs(&self) -> u64 {
        self.secs
    }

    #[inline(always)]
    pub const fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Add a duration, saturating at `TimeSpec::MAX`
    #[inline]
    pub fn saturating_add(self, delta: Duration) -> Self {
        let mut nanos = self.nanos + delta.subsec_nanos();
        let mut carry = 0;
        if nanos >= NANOS_PER_SEC {
            nanos -= NANOS_PER_SEC;
            carry = 1;
        }
        match self
            .secs
            .checked_add(delta.as_secs())
            .and_then(|s| s.checked_add(carry))
        {
            Some(secs) => Self { secs, nanos },
            None => Self::MAX,
        }
    }

    /// Time remaining from `earlier` until `self`, zero if `earlier` is not before `self`
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        if self <= earlier {
            return Duration::ZERO;
        }
        let (secs, nanos) = if self.nanos < earlier.nanos {
            (
                self.secs - earlier.secs - 1,
                NANOS_PER_SEC + self.nanos - earlier.nanos,
            )
        } else {
            (self.secs - earlier.secs, self.nanos - earlier.nanos)
        };
        Duration::new(secs, nanos)
    }

    /// Offset of this instant from the clock origin
    #[inline]
    pub fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.nanos)
    }
}

impl Add<Duration> for TimeSpec {
    type Output = TimeSpec;

    fn add(self, rhs: Duration) -> TimeSpec {
        self.saturating_add(rhs)
    }
}

impl From<Duration> for TimeSpec {
    fn from(d: Duration) -> Self {
        Self::new(d.as_secs(), d.subsec_nanos())
    }
}

/// Source of monotonic timestamps
///
/// The reactor reads the clock when registering a finite timeout and twice
/// per tick. A read failure is surfaced to the caller, never papered over.
pub trait Clock {
    fn now(&self) -> io::Result<TimeSpec>;
}

/// `CLOCK_MONOTONIC`
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> io::Result<TimeSpec> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(TimeSpec::new(ts.tv_sec as u64, ts.tv_nsec as u32))
    }
}
