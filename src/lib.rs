//! Single-threaded event reactor and typed key/value config store
//!
//! - **core**: events, descriptors, timeouts, monotonic time
//! - **reactor**: readiness/timer multiplexing with FIFO dispatch
//! - **store**: sorted config store with tagged values
//! - **engine**: driver loop around the reactor
//! - **infrastructure**: pooling, settings, logging, metrics

pub mod core;
pub mod engine;
pub mod infrastructure;
pub mod reactor;
pub mod store;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{Descriptor, Events, TimeSpec, Timeout};
pub use engine::{Engine, StopSignal};
pub use infrastructure::config::Settings;
pub use reactor::{Callback, Event, EventHandle, Reactor, ReactorError};
pub use store::{ConfigStore, ConfigType, ConfigValue, SetValue, StoreError};

use infrastructure::config::SettingsError;
use infrastructure::pool::PoolError;
use thiserror::Error;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Reactor error: {0}")]
    Reactor(#[from] ReactorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
