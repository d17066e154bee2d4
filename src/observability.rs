//! Logging for resultstore.
//!
//! All events use `tracing` with target "resultstore" and carry an `event`
//! field. The library never installs a subscriber; applications do that with
//! `tracing_subscriber` or similar.

/// Target for all resultstore log events.
pub(crate) const TARGET: &str = "resultstore";

/// Macro for info-level log events.
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
