//! Logger setup and the `critical!` macro
//!
//! Conditions an operator must act on are logged at error level under the
//! `critical` target, e.g. `RUST_LOG=critical=error` shows only those.

use log::LevelFilter;

/// Log target of critical conditions
pub const CRITICAL: &str = "critical";

/// Log a critical condition: an error under the [`CRITICAL`] target.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        log::error!(target: $crate::logging::CRITICAL, $($arg)+)
    };
}

/// Map the number of `-v` flags to a level filter.
pub fn level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install env_logger once. `RUST_LOG` overrides the verbosity flag.
pub fn init(verbosity: u8) {
    env_logger::Builder::new()
        .filter_level(level(verbosity))
        .parse_default_env()
        .init();
}
