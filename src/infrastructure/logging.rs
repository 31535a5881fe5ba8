//! Tracing setup
//!
//! Console output always; with `logging.directory` set, a daily-rolling JSON
//! file as well. `RUST_LOG` overrides the configured level.
//!
//! Targets used by the crate:
//! - `reactor` - registration, ticks, dispatch
//! - `store` - config mutations
//! - `driver` - the loop driving the reactor

use super::config::LoggingSettings;
use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// File name prefix of rolled log files
pub const LOG_FILE_PREFIX: &str = "tickloop";

/// Install the global subscriber
///
/// Returns the file writer's guard when file logging is enabled; it must be
/// kept alive for the duration of the program or buffered lines are lost.
pub fn init_logging(settings: &LoggingSettings) -> io::Result<Option<WorkerGuard>> {
    let filter = build_filter(&settings.level);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);

    let (file_layer, guard) = match &settings.directory {
        Some(dir) => {
            let (appender, guard) = create_appender(dir)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_level(true)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    tracing::info!("Logging initialized at level {}", settings.level);
    Ok(guard)
}

/// `RUST_LOG` when set and valid, otherwise the configured directive
fn build_filter(level: &str) -> EnvFilter {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    filter_from(env.as_deref(), level)
}

/// First of `env`, `level` and `"info"` that parses as a filter
fn filter_from(env: Option<&str>, level: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Create a rolling file appender
fn create_appender(dir: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

/// Log macro helpers for specific targets
#[macro_export]
macro_rules! log_reactor {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "reactor", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_store {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "store", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_driver {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "driver", $level, $($arg)+)
    };
}
