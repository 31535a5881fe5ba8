//! Readiness primitive behind the reactor
//!
//! The reactor builds one `PollFd` per descriptor group each tick and asks a
//! `Poller` to block until one of them is ready or the timeout elapses.

use crate::core::Events;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// One descriptor's interest and, after a wait, what fired on it
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct PollFd(libc::pollfd);

impl PollFd {
    pub fn new(fd: RawFd, interest: Events) -> Self {
        let mut events: libc::c_short = 0;
        if interest.contains(Events::READ) {
            events |= libc::POLLIN;
        }
        if interest.contains(Events::WRITE) {
            events |= libc::POLLOUT;
        }
        if interest.contains(Events::EXCEPT) {
            events |= libc::POLLPRI;
        }
        Self(libc::pollfd {
            fd,
            events,
            revents: 0,
        })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.0.fd
    }

    /// Interest expressed as reactor events
    pub fn interest(&self) -> Events {
        let mut interest = Events::empty();
        if self.0.events & libc::POLLIN != 0 {
            interest |= Events::READ;
        }
        if self.0.events & libc::POLLOUT != 0 {
            interest |= Events::WRITE;
        }
        if self.0.events & libc::POLLPRI != 0 {
            interest |= Events::EXCEPT;
        }
        interest
    }

    /// Readiness reported by the last wait, in select() terms
    ///
    /// poll(2) reports hang-up, error and invalid descriptors whatever the
    /// interest was. Those read as every I/O event, so any notification on
    /// the descriptor fires and its owner gets a chance to notice and cancel
    /// instead of the next wait returning immediately with nothing to do.
    pub fn fired(&self) -> Events {
        let revents = self.0.revents;
        let mut fired = Events::empty();
        if revents & libc::POLLIN != 0 {
            fired |= Events::READ;
        }
        if revents & libc::POLLOUT != 0 {
            fired |= Events::WRITE;
        }
        if revents & libc::POLLPRI != 0 {
            fired |= Events::EXCEPT;
        }
        if revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            fired |= Events::IO;
        }
        fired
    }

    /// Overwrite the returned readiness
    pub fn set_fired(&mut self, fired: Events) {
        let mut revents: libc::c_short = 0;
        if fired.contains(Events::READ) {
            revents |= libc::POLLIN;
        }
        if fired.contains(Events::WRITE) {
            revents |= libc::POLLOUT;
        }
        if fired.contains(Events::EXCEPT) {
            revents |= libc::POLLPRI;
        }
        self.0.revents = revents;
    }
}

impl std::fmt::Debug for PollFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollFd")
            .field("fd", &self.0.fd)
            .field("interest", &self.interest())
            .field("fired", &self.fired())
            .finish()
    }
}

/// Blocking readiness wait
pub trait Poller {
    /// Wait until a descriptor in `fds` is ready or `timeout` elapses
    ///
    /// `None` blocks indefinitely. Returns how many entries have non-empty
    /// readiness. An interrupted wait is reported as
    /// `io::ErrorKind::Interrupted`, not retried.
    fn wait(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize>;
}

/// Kernel-backed poller
#[derive(Debug, Clone, Copy, Default)]
pub struct SysPoller;

impl Poller for SysPoller {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn wait(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |ts| ts as *const libc::timespec);

        // SAFETY: PollFd is repr(transparent) over pollfd, the slice is valid
        // for writes for its whole length and `ts_ptr` is null or points at a
        // live timespec.
        let rc = unsafe {
            libc::ppoll(
                fds.as_mut_ptr() as *mut libc::pollfd,
                fds.len() as libc::nfds_t,
                ts_ptr,
                std::ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn wait(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        // poll() only takes milliseconds; round up so short deadlines are not early.
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => {
                let ms = d.as_nanos().div_ceil(1_000_000);
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        // SAFETY: PollFd is repr(transparent) over pollfd and the slice is
        // valid for writes for its whole length.
        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr() as *mut libc::pollfd,
                fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{socket_pair, write_byte};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_interest_roundtrip() {
        let pfd = PollFd::new(3, Events::READ | Events::EXCEPT);
        assert_eq!(pfd.fd(), 3);
        assert_eq!(pfd.interest(), Events::READ | Events::EXCEPT);
        assert_eq!(pfd.fired(), Events::empty());
    }

    #[test]
    fn test_timeout_bit_not_polled() {
        let pfd = PollFd::new(3, Events::TIMEOUT);
        assert_eq!(pfd.interest(), Events::empty());
    }

    #[test]
    fn test_hangup_error_invalid_fire_everything() {
        let mut pfd = PollFd::new(3, Events::EXCEPT);
        for revents in [libc::POLLHUP, libc::POLLERR, libc::POLLNVAL] {
            pfd.0.revents = revents;
            assert_eq!(pfd.fired(), Events::IO);
        }
        pfd.0.revents = libc::POLLIN;
        assert_eq!(pfd.fired(), Events::READ);
    }

    #[test]
    fn test_sys_poller_reports_peer_hangup() {
        let (rd, wr) = socket_pair();
        drop(wr);
        let mut fds = [PollFd::new(rd.as_raw_fd(), Events::EXCEPT)];

        let n = SysPoller.wait(&mut fds, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(n, 1);
        assert!(fds[0].fired().contains(Events::EXCEPT));
    }

    #[test]
    fn test_sys_poller_readable_socket() {
        let (rd, wr) = socket_pair();
        let mut fds = [PollFd::new(rd.as_raw_fd(), Events::READ)];

        let n = SysPoller.wait(&mut fds, Some(Duration::from_millis(1))).unwrap();
        assert_eq!(n, 0);
        assert!(fds[0].fired().is_empty());

        write_byte(&wr);
        let n = SysPoller.wait(&mut fds, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(n, 1);
        assert!(fds[0].fired().contains(Events::READ));
    }

    #[test]
    fn test_sys_poller_timeout_only() {
        let start = std::time::Instant::now();
        let n = SysPoller.wait(&mut [], Some(Duration::from_millis(2))).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
