//! Wait duration for one reactor tick

use std::time::Duration;

/// Minimum finite wait, keeps near-term deadlines from spinning the CPU
pub const DEFAULT_BUSY_WAIT_FLOOR: Duration = Duration::from_micros(1001);

/// How long a tick may block
///
/// * `remaining` - time until the earliest finite due time (zero if already
///   due), `None` if no notification has a finite deadline
/// * `has_interest` - whether any descriptor is being polled
///
/// Returns `None` to block until a descriptor is ready. With nothing to poll
/// and no deadline the tick polls instead of blocking forever. Any finite
/// wait shorter than `floor` is raised to it.
#[inline]
pub fn compute_wait(
    remaining: Option<Duration>,
    has_interest: bool,
    floor: Duration,
) -> Option<Duration> {
    let wait = match remaining {
        Some(remaining) => remaining,
        None if has_interest => return None,
        None => Duration::ZERO,
    };
    Some(wait.max(floor))
}
