//! Infrastructure - cold path only
//!
//! This module contains non-latency-critical code:
//! - Logging and metrics
//! - Settings loading
//! - Object pooling shared by the reactor and the config store

pub mod config;
pub mod logging;
pub mod metrics;
pub mod pool;

pub use pool::{Handle, PoolError, Recycle, SlotPool};
