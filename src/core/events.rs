//! Event vocabulary shared by the reactor and its callers

use bitflags::bitflags;
use std::fmt;
use std::os::fd::RawFd;
use std::time::Duration;

bitflags! {
    /// Interest and trigger reasons for a notification
    ///
    /// `TIMEOUT` only ever appears in a triggered mask; it is stripped from
    /// interest masks at registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Events: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXCEPT = 1 << 2;
        const TIMEOUT = 1 << 3;
    }
}

impl Events {
    /// Bits that can be waited on through the poller
    pub const IO: Self = Self::READ.union(Self::WRITE).union(Self::EXCEPT);
}

/// What a notification is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Descriptor {
    /// Timer-only notification, never polled
    Timer,
    /// A real file descriptor
    Fd(RawFd),
}

impl Descriptor {
    #[inline]
    pub fn raw(&self) -> Option<RawFd> {
        match self {
            Descriptor::Timer => None,
            Descriptor::Fd(fd) => Some(*fd),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Timer => f.write_str("timer"),
            Descriptor::Fd(fd) => write!(f, "fd:{}", fd),
        }
    }
}

/// Relative expiry requested at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Never fires by timeout
    Infinite,
    /// Fires once this much monotonic time has elapsed
    After(Duration),
}

impl Timeout {
    /// Seconds value that `from_parts` maps to `Timeout::Infinite`
    pub const INFINITE_SECS: u64 = u64::MAX;

    /// Fire on the very next tick
    pub const ZERO: Self = Timeout::After(Duration::ZERO);

    /// Build from a (seconds, microseconds) pair
    pub fn from_parts(secs: u64, micros: u64) -> Self {
        if secs == Self::INFINITE_SECS {
            return Timeout::Infinite;
        }
        Timeout::After(Duration::from_secs(secs).saturating_add(Duration::from_micros(micros)))
    }

    #[inline]
    pub fn is_infinite(&self) -> bool {
        matches!(self, Timeout::Infinite)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}
