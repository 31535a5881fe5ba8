//! Single-threaded readiness and timer reactor
//!
//! Notifications are grouped per descriptor. Each tick unions the interest
//! of every group, merges the earliest due time into a wait duration, blocks
//! on the poller and then moves every notification whose descriptor fired
//! (or whose deadline passed) onto the ready queue in scan order. The queue
//! is drained FIFO; each notification is recycled before its callback runs,
//! so a callback is free to register again, including on the same slot.
//!
//! Groups, notifications and the ready queue hold pooled objects addressed by
//! generation-tagged handles. A handle whose notification was cancelled or
//! dispatched no longer resolves, which makes double-cancel and
//! cancel-after-dispatch detectable errors.

pub mod poller;
pub mod wait;

pub use poller::{PollFd, Poller, SysPoller};
pub use wait::{compute_wait, DEFAULT_BUSY_WAIT_FLOOR};

use crate::core::{Clock, Descriptor, Events, MonotonicClock, TimeSpec, Timeout};
use crate::infrastructure::config::ReactorSettings;
use crate::infrastructure::metrics::{MetricsSnapshot, ReactorMetrics};
use crate::infrastructure::pool::{Handle, PoolError, Recycle, SlotPool};
use std::collections::{TryReserveError, VecDeque};
use std::fmt;
use std::io;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Reactor errors
#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("monotonic clock read failed: {0}")]
    Clock(#[source] io::Error),

    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("readiness wait interrupted")]
    Interrupted,

    #[error("out of memory")]
    OutOfMemory,

    #[error("event handle is no longer pending")]
    StaleHandle,
}

impl From<PoolError> for ReactorError {
    fn from(_: PoolError) -> Self {
        ReactorError::OutOfMemory
    }
}

impl From<TryReserveError> for ReactorError {
    fn from(_: TryReserveError) -> Self {
        ReactorError::OutOfMemory
    }
}

/// What a callback receives when its notification fires
pub struct Event<A> {
    pub descriptor: Descriptor,
    /// Subset of the interest that fired, or `Events::TIMEOUT`
    pub triggered: Events,
    pub arg: A,
    /// The callback being invoked, for re-arming
    pub callback: Callback<A>,
}

impl<A> Event<A> {
    /// Register the same callback and argument again on the same descriptor
    pub fn rearm(
        self,
        reactor: &mut Reactor<A>,
        interest: Events,
        timeout: Timeout,
    ) -> Result<EventHandle, ReactorError> {
        reactor.register(self.descriptor, self.callback, self.arg, interest, timeout)
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("descriptor", &self.descriptor)
            .field("triggered", &self.triggered)
            .finish_non_exhaustive()
    }
}

/// Notification callback
///
/// Identity is pointer identity: clones compare equal, two `Callback::new`
/// calls never do.
pub struct Callback<A>(Rc<dyn Fn(&mut Reactor<A>, Event<A>)>);

impl<A> Callback<A> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Reactor<A>, Event<A>) + 'static,
    {
        Self(Rc::new(f))
    }

    #[inline]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Handle to a pending notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(Handle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    Spare,
    Group(Handle),
    Ready,
}

struct Notification<A> {
    descriptor: Descriptor,
    interest: Events,
    /// Absolute monotonic deadline, `None` for never
    due: Option<TimeSpec>,
    triggered: Events,
    place: Place,
    payload: Option<(Callback<A>, A)>,
}

impl<A> Default for Notification<A> {
    fn default() -> Self {
        Self {
            descriptor: Descriptor::Timer,
            interest: Events::empty(),
            due: None,
            triggered: Events::empty(),
            place: Place::Spare,
            payload: None,
        }
    }
}

impl<A> Recycle for Notification<A> {
    fn recycle(&mut self) {
        self.payload = None;
        self.interest = Events::empty();
        self.triggered = Events::empty();
        self.due = None;
        self.place = Place::Spare;
    }
}

#[derive(Debug)]
struct DescriptorGroup {
    descriptor: Descriptor,
    /// Notifications in registration order
    pending: Vec<Handle>,
}

impl Default for DescriptorGroup {
    fn default() -> Self {
        Self {
            descriptor: Descriptor::Timer,
            pending: Vec::new(),
        }
    }
}

impl Recycle for DescriptorGroup {
    fn recycle(&mut self) {
        self.pending.clear();
    }
}

/// The reactor
///
/// Not `Send`: registration, cancellation and `run_once` all happen on the
/// thread that owns it, and callbacks run inline on that thread.
pub struct Reactor<A = ()> {
    groups: SlotPool<DescriptorGroup>,
    /// Non-empty groups in creation order
    active: Vec<Handle>,
    notifications: SlotPool<Notification<A>>,
    ready: VecDeque<Handle>,
    clock: Box<dyn Clock>,
    poller: Box<dyn Poller>,
    busy_wait_floor: Duration,
    /// Per-tick scratch, reused across ticks
    poll_fds: Vec<PollFd>,
    /// Index into `poll_fds` for each entry of `active`
    poll_slots: Vec<Option<usize>>,
    metrics: ReactorMetrics,
}

impl<A> Default for Reactor<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Reactor<A> {
    /// Reactor on the monotonic clock and the kernel poller
    pub fn new() -> Self {
        Self::with_parts(
            Box::new(MonotonicClock),
            Box::new(SysPoller),
            DEFAULT_BUSY_WAIT_FLOOR,
        )
    }

    /// Reactor with an explicit clock, poller and busy-wait floor
    pub fn with_parts(clock: Box<dyn Clock>, poller: Box<dyn Poller>, busy_wait_floor: Duration) -> Self {
        Self {
            groups: SlotPool::new(),
            active: Vec::new(),
            notifications: SlotPool::new(),
            ready: VecDeque::new(),
            clock,
            poller,
            busy_wait_floor,
            poll_fds: Vec::new(),
            poll_slots: Vec::new(),
            metrics: ReactorMetrics::new(),
        }
    }

    /// Reactor with pools pre-populated per `settings`
    pub fn from_settings(settings: &ReactorSettings) -> Result<Self, ReactorError> {
        let mut reactor = Self::new();
        reactor.busy_wait_floor = settings.busy_wait_floor();
        reactor.groups = SlotPool::with_capacity(settings.prealloc_groups)?;
        reactor.notifications = SlotPool::with_capacity(settings.prealloc_notifications)?;
        reactor.active.try_reserve(settings.prealloc_groups)?;
        reactor.ready.try_reserve(settings.prealloc_notifications)?;
        Ok(reactor)
    }

    /// Arm `callback` for readiness on `descriptor` or expiry of `timeout`
    ///
    /// `Events::TIMEOUT` in `interest` is ignored; interest on
    /// `Descriptor::Timer` is never polled.
    pub fn register(
        &mut self,
        descriptor: Descriptor,
        callback: Callback<A>,
        arg: A,
        interest: Events,
        timeout: Timeout,
    ) -> Result<EventHandle, ReactorError> {
        let due = match timeout {
            Timeout::Infinite => None,
            Timeout::After(delta) => Some(self.now()? + delta),
        };
        let interest = interest & Events::IO;

        let (group, fresh) = match self.find_group(descriptor) {
            Some(group) => (group, false),
            None => {
                self.active.try_reserve(1)?;
                let (group, slot) = self.groups.acquire_mut()?;
                slot.descriptor = descriptor;
                (group, true)
            }
        };

        match self.attach(group, descriptor, interest, due, callback, arg) {
            Ok(handle) => {
                if fresh {
                    self.active.push(group);
                }
                self.metrics.record_registered();
                crate::log_reactor!(
                    Level::TRACE,
                    "registered {} interest={:?} due={:?}",
                    descriptor,
                    interest,
                    due
                );
                Ok(EventHandle(handle))
            }
            Err(e) => {
                if fresh {
                    self.groups.release(group);
                }
                Err(e)
            }
        }
    }

    fn attach(
        &mut self,
        group: Handle,
        descriptor: Descriptor,
        interest: Events,
        due: Option<TimeSpec>,
        callback: Callback<A>,
        arg: A,
    ) -> Result<Handle, ReactorError> {
        let pending = match self.groups.get_mut(group) {
            Some(slot) => &mut slot.pending,
            None => return Err(ReactorError::StaleHandle),
        };
        pending.try_reserve(1)?;

        let (handle, notification) = self.notifications.acquire_mut()?;
        notification.descriptor = descriptor;
        notification.interest = interest;
        notification.due = due;
        notification.place = Place::Group(group);
        notification.payload = Some((callback, arg));
        pending.push(handle);
        Ok(handle)
    }

    /// First pending notification on `descriptor` armed with `callback`
    pub fn lookup(&self, descriptor: Descriptor, callback: &Callback<A>) -> Option<EventHandle> {
        let group = self.groups.get(self.find_group(descriptor)?)?;
        group
            .pending
            .iter()
            .copied()
            .find(|handle| {
                self.notifications
                    .get(*handle)
                    .and_then(|n| n.payload.as_ref())
                    .is_some_and(|(cb, _)| cb.same_as(callback))
            })
            .map(EventHandle)
    }

    /// Withdraw a pending notification
    ///
    /// Fails with `StaleHandle` if it was already cancelled or dispatched.
    pub fn cancel(&mut self, handle: EventHandle) -> Result<(), ReactorError> {
        let place = self
            .notifications
            .get(handle.0)
            .map(|n| n.place)
            .ok_or(ReactorError::StaleHandle)?;

        match place {
            Place::Group(group) => self.detach(group, handle.0),
            Place::Ready => {
                if let Some(pos) = self.ready.iter().position(|h| *h == handle.0) {
                    self.ready.remove(pos);
                }
            }
            Place::Spare => return Err(ReactorError::StaleHandle),
        }

        self.notifications.release(handle.0);
        self.metrics.record_cancelled();
        crate::log_reactor!(Level::TRACE, "cancelled {:?}", handle);
        Ok(())
    }

    /// Whether `handle` still refers to a notification waiting to fire
    #[inline]
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.notifications.contains(handle.0)
    }

    /// Remove `notification` from `group`, retiring the group if it empties
    fn detach(&mut self, group: Handle, notification: Handle) {
        let emptied = match self.groups.get_mut(group) {
            Some(slot) => {
                slot.pending.retain(|h| *h != notification);
                slot.pending.is_empty()
            }
            None => false,
        };
        if emptied {
            self.active.retain(|h| *h != group);
            self.groups.release(group);
        }
    }

    fn find_group(&self, descriptor: Descriptor) -> Option<Handle> {
        self.active.iter().copied().find(|group| {
            self.groups
                .get(*group)
                .is_some_and(|slot| slot.descriptor == descriptor)
        })
    }

    fn now(&mut self) -> Result<TimeSpec, ReactorError> {
        self.clock.now().map_err(|e| {
            self.metrics.record_error();
            crate::log_reactor!(Level::ERROR, "Failed to read monotonic clock: {}", e);
            ReactorError::Clock(e)
        })
    }

    /// Run one tick: wait for readiness or the earliest deadline, then dispatch
    ///
    /// Returns the number of callbacks invoked. An interrupted wait is
    /// reported as `ReactorError::Interrupted` and nothing is dispatched;
    /// pending notifications stay armed for the next tick.
    pub fn run_once(&mut self) -> Result<usize, ReactorError> {
        let earliest = self.build_poll_set()?;

        let remaining = match earliest {
            Some(due) => Some(due.saturating_duration_since(self.now()?)),
            None => None,
        };
        let wait = compute_wait(remaining, !self.poll_fds.is_empty(), self.busy_wait_floor);

        crate::log_reactor!(
            Level::TRACE,
            "waiting on {} descriptors for {:?}",
            self.poll_fds.len(),
            wait
        );
        self.metrics.record_tick();
        if let Err(e) = self.poller.wait(&mut self.poll_fds, wait) {
            self.metrics.record_error();
            if e.kind() == io::ErrorKind::Interrupted {
                crate::log_reactor!(Level::DEBUG, "Interrupted while waiting for IO");
                return Err(ReactorError::Interrupted);
            }
            crate::log_reactor!(Level::ERROR, "Failed to wait IO: {}", e);
            return Err(ReactorError::Wait(e));
        }

        let now = self.now()?;
        self.collect_ready(now);
        Ok(self.dispatch())
    }

    /// Fill `poll_fds` with the unioned interest of each active group
    ///
    /// Returns the earliest finite due time across all pending notifications.
    fn build_poll_set(&mut self) -> Result<Option<TimeSpec>, ReactorError> {
        self.poll_fds.clear();
        self.poll_slots.clear();
        self.poll_fds.try_reserve(self.active.len())?;
        self.poll_slots.try_reserve(self.active.len())?;
        // Every pending notification may become ready this tick.
        self.ready.try_reserve(self.notifications.active_len())?;

        let mut earliest: Option<TimeSpec> = None;
        let mut max_fd = None;
        for group in &self.active {
            let mut interest = Events::empty();
            let mut slot = None;
            if let Some(group) = self.groups.get(*group) {
                for n in group.pending.iter().filter_map(|h| self.notifications.get(*h)) {
                    interest |= n.interest;
                    if let Some(due) = n.due {
                        earliest = Some(earliest.map_or(due, |e: TimeSpec| e.min(due)));
                    }
                }
                if let Descriptor::Fd(fd) = group.descriptor {
                    if !interest.is_empty() {
                        max_fd = max_fd.max(Some(fd));
                        self.poll_fds.push(PollFd::new(fd, interest));
                        slot = Some(self.poll_fds.len() - 1);
                    }
                }
            }
            self.poll_slots.push(slot);
        }

        crate::log_reactor!(
            Level::TRACE,
            "poll set: {} groups, max fd {:?}, earliest due {:?}",
            self.active.len(),
            max_fd,
            earliest
        );
        Ok(earliest)
    }

    /// Move fired or expired notifications to the ready queue, retire empty groups
    fn collect_ready(&mut self, now: TimeSpec) {
        let Self {
            groups,
            active,
            notifications,
            ready,
            poll_fds,
            poll_slots,
            ..
        } = self;

        for (i, group) in active.iter().enumerate() {
            let fired = poll_slots
                .get(i)
                .copied()
                .flatten()
                .and_then(|slot| poll_fds.get(slot))
                .map_or(Events::empty(), PollFd::fired);

            let Some(group) = groups.get_mut(*group) else {
                continue;
            };
            group.pending.retain(|handle| {
                let Some(n) = notifications.get_mut(*handle) else {
                    return false;
                };
                let mut triggered = fired & n.interest;
                if triggered.is_empty() && n.due.is_some_and(|due| due <= now) {
                    triggered = Events::TIMEOUT;
                }
                if triggered.is_empty() {
                    return true;
                }
                n.triggered = triggered;
                n.place = Place::Ready;
                ready.push_back(*handle);
                false
            });
        }

        active.retain(|group| {
            let emptied = groups.get(*group).map_or(true, |slot| slot.pending.is_empty());
            if emptied {
                groups.release(*group);
            }
            !emptied
        });
    }

    /// Drain the ready queue, recycling each notification before its callback runs
    fn dispatch(&mut self) -> usize {
        let mut dispatched = 0;
        while let Some(handle) = self.ready.pop_front() {
            let released = self
                .notifications
                .release_with(handle, |n| (n.descriptor, n.triggered, n.payload.take()));
            let Some((descriptor, triggered, Some((callback, arg)))) = released else {
                continue;
            };

            dispatched += 1;
            self.metrics.record_dispatch(triggered == Events::TIMEOUT);
            crate::log_reactor!(Level::TRACE, "dispatch {} {:?}", descriptor, triggered);

            let f = Rc::clone(&callback.0);
            f(
                self,
                Event {
                    descriptor,
                    triggered,
                    arg,
                    callback,
                },
            );
        }
        dispatched
    }

    /// Release every notification and group, pending and spare
    pub fn teardown(mut self) {
        crate::log_reactor!(
            Level::DEBUG,
            "teardown: {} groups ({} spare), {} notifications ({} spare)",
            self.active.len(),
            self.groups.spare_len(),
            self.notifications.active_len(),
            self.notifications.spare_len()
        );
        self.ready.clear();
        self.active.clear();
        self.notifications.clear();
        self.groups.clear();
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[inline]
    pub fn busy_wait_floor(&self) -> Duration {
        self.busy_wait_floor
    }

    /// Descriptor groups with at least one pending notification
    #[inline]
    pub fn active_groups(&self) -> usize {
        self.active.len()
    }

    #[inline]
    pub fn spare_groups(&self) -> usize {
        self.groups.spare_len()
    }

    /// Notifications registered and neither cancelled nor dispatched
    #[inline]
    pub fn pending(&self) -> usize {
        self.notifications.active_len()
    }

    #[inline]
    pub fn spare_notifications(&self) -> usize {
        self.notifications.spare_len()
    }

    /// Notifications fired but not yet dispatched, only non-zero inside callbacks
    #[inline]
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Groups and notifications ever allocated
    #[inline]
    pub fn allocated(&self) -> (usize, usize) {
        (self.groups.capacity(), self.notifications.capacity())
    }
}

impl<A> fmt::Debug for Reactor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("active_groups", &self.active.len())
            .field("spare_groups", &self.groups.spare_len())
            .field("pending", &self.notifications.active_len())
            .field("spare_notifications", &self.notifications.spare_len())
            .field("ready", &self.ready.len())
            .field("busy_wait_floor", &self.busy_wait_floor)
            .finish()
    }
}
