//! Test doubles for the reactor
//!
//! `ManualClock` and `ScriptedPoller` let tests drive ticks without sleeping:
//! time only moves when the test advances it and the poller reports whatever
//! readiness the test queued.

use crate::core::{Clock, Events, TimeSpec};
use crate::reactor::{PollFd, Poller};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

/// Clock that only moves when told to; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<TimeSpec>>);

impl ManualClock {
    pub fn starting_at(start: TimeSpec) -> Self {
        Self(Rc::new(Cell::new(start)))
    }

    pub fn advance(&self, delta: Duration) {
        self.0.set(self.0.get() + delta);
    }

    pub fn get(&self) -> TimeSpec {
        self.0.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> io::Result<TimeSpec> {
        Ok(self.0.get())
    }
}

/// Clock whose every read fails
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingClock;

impl Clock for FailingClock {
    fn now(&self) -> io::Result<TimeSpec> {
        Err(io::Error::from_raw_os_error(libc::EINVAL))
    }
}

#[derive(Debug)]
enum Step {
    Ready(Vec<(RawFd, Events)>),
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    waits: Vec<Option<Duration>>,
    polled: Vec<Vec<(RawFd, Events)>>,
}

/// Poller that replays queued outcomes and records what it was asked
///
/// With nothing queued a wait returns immediately with no readiness.
/// Reported events are masked by each descriptor's interest, like poll(2).
#[derive(Debug, Clone, Default)]
pub struct ScriptedPoller(Rc<RefCell<Script>>);

impl ScriptedPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ready(&self, ready: Vec<(RawFd, Events)>) {
        self.0.borrow_mut().steps.push_back(Step::Ready(ready));
    }

    pub fn push_failure(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().steps.push_back(Step::Fail(kind));
    }

    /// Timeout passed to each wait so far
    pub fn waits(&self) -> Vec<Option<Duration>> {
        self.0.borrow().waits.clone()
    }

    /// Descriptors and interest passed to each wait so far
    pub fn polled(&self) -> Vec<Vec<(RawFd, Events)>> {
        self.0.borrow().polled.clone()
    }
}

impl Poller for ScriptedPoller {
    fn wait(&mut self, fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
        let mut script = self.0.borrow_mut();
        script.waits.push(timeout);
        script
            .polled
            .push(fds.iter().map(|pfd| (pfd.fd(), pfd.interest())).collect());

        let ready = match script.steps.pop_front() {
            Some(Step::Fail(kind)) => return Err(io::Error::from(kind)),
            Some(Step::Ready(ready)) => ready,
            None => Vec::new(),
        };

        let mut count = 0;
        for pfd in fds.iter_mut() {
            let fired = ready
                .iter()
                .filter(|(fd, _)| *fd == pfd.fd())
                .fold(Events::empty(), |acc, (_, ev)| acc | *ev)
                & pfd.interest();
            pfd.set_fired(fired);
            if !fired.is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Connected pair of Unix stream sockets
pub fn socket_pair() -> (UnixStream, UnixStream) {
    UnixStream::pair().unwrap()
}

/// Make the peer of `stream` readable
pub fn write_byte(stream: &UnixStream) {
    let mut stream = stream;
    stream.write_all(&[1]).unwrap();
}
