//! Driver loop
//!
//! Owns the reactor and ticks it until stopped. Callbacks stop the loop
//! through a cloned `StopSignal`.

use crate::infrastructure::config::Settings;
use crate::reactor::{Reactor, ReactorError};
use crate::Result;
use std::cell::Cell;
use std::rc::Rc;
use tracing::Level;

/// Shared stop flag; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Rc<Cell<bool>>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }
}

/// Main loop managing the reactor lifecycle
pub struct Engine<A = ()> {
    reactor: Reactor<A>,
    stop: StopSignal,
    max_ticks: Option<u64>,
}

impl<A> Engine<A> {
    pub fn new(reactor: Reactor<A>) -> Self {
        Self {
            reactor,
            stop: StopSignal::new(),
            max_ticks: None,
        }
    }

    /// Engine around a reactor built from `[reactor]`, bounded by `[driver]`
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let reactor = Reactor::from_settings(&settings.reactor)?;
        Ok(Self::new(reactor).with_max_ticks(settings.driver.max_ticks))
    }

    /// Stop after `max_ticks` ticks, `None` to run until stopped
    pub fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn reactor(&self) -> &Reactor<A> {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut Reactor<A> {
        &mut self.reactor
    }

    /// Tick until stopped or the tick limit is reached
    ///
    /// Interrupted waits are logged and the loop goes on; any other reactor
    /// error ends the loop. Returns the number of ticks run.
    pub fn run(&mut self) -> Result<u64> {
        crate::log_driver!(
            Level::INFO,
            "Starting driver loop (max_ticks={:?})",
            self.max_ticks
        );

        let mut ticks = 0u64;
        while !self.stop.is_stopped() {
            if self.max_ticks.is_some_and(|max| ticks >= max) {
                crate::log_driver!(Level::INFO, "Tick limit {} reached", ticks);
                break;
            }

            match self.reactor.run_once() {
                Ok(dispatched) => {
                    crate::log_driver!(Level::TRACE, "tick {} dispatched {}", ticks, dispatched);
                }
                Err(ReactorError::Interrupted) => {
                    crate::log_driver!(Level::DEBUG, "tick {} interrupted, continuing", ticks);
                }
                Err(e) => {
                    crate::log_driver!(Level::ERROR, "Reactor failed on tick {}: {}", ticks, e);
                    return Err(e.into());
                }
            }
            ticks += 1;
        }

        let snapshot = self.reactor.metrics();
        crate::log_driver!(
            Level::INFO,
            "Driver loop finished after {} ticks ({} dispatched, {} errors)",
            ticks,
            snapshot.dispatched,
            snapshot.errors
        );
        Ok(ticks)
    }

    /// Tear the reactor down, dropping everything still pending
    pub fn shutdown(self) {
        self.reactor.teardown();
    }
}
