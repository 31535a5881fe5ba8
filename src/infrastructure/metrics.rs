//! Reactor counters
//!
//! Updated inline on the reactor thread, read back as a copyable snapshot.

use std::time::Instant;

/// Running totals for one reactor
#[derive(Debug, Clone)]
pub struct ReactorMetrics {
    /// Ticks that reached the wait
    ticks: u64,
    /// Callbacks invoked
    dispatched: u64,
    /// Dispatches caused by readiness
    io_triggered: u64,
    /// Dispatches caused by an elapsed due time
    timeouts: u64,
    /// Failed clock reads or waits
    errors: u64,
    /// Registrations accepted
    registered: u64,
    /// Successful cancellations
    cancelled: u64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for logging / export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub dispatched: u64,
    pub io_triggered: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub registered: u64,
    pub cancelled: u64,
    pub dispatch_rate: f64, // dispatches per second
    pub uptime_seconds: u64,
}

impl Default for ReactorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactorMetrics {
    pub fn new() -> Self {
        Self {
            ticks: 0,
            dispatched: 0,
            io_triggered: 0,
            timeouts: 0,
            errors: 0,
            registered: 0,
            cancelled: 0,
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_tick(&mut self) {
        self.ticks += 1;
    }

    #[inline]
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    #[inline]
    pub fn record_registered(&mut self) {
        self.registered += 1;
    }

    #[inline]
    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    /// Count one dispatch, classified by whether a timeout caused it
    #[inline]
    pub fn record_dispatch(&mut self, by_timeout: bool) {
        self.dispatched += 1;
        if by_timeout {
            self.timeouts += 1;
        } else {
            self.io_triggered += 1;
        }
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.dispatched as f64 / secs
        } else {
            0.0
        };

        MetricsSnapshot {
            ticks: self.ticks,
            dispatched: self.dispatched,
            io_triggered: self.io_triggered,
            timeouts: self.timeouts,
            errors: self.errors,
            registered: self.registered,
            cancelled: self.cancelled,
            dispatch_rate: rate,
            uptime_seconds: elapsed.as_secs(),
        }
    }
}
