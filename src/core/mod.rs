//! Core types shared by the reactor and its drivers
//!
//! - Events / Descriptor / Timeout: what a notification waits for
//! - TimeSpec / Clock: monotonic deadlines

pub mod events;
pub mod time;

pub use events::{Descriptor, Events, Timeout};
pub use time::{Clock, MonotonicClock, TimeSpec};
