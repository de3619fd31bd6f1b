//! Logging macros that set target to "pamdb_broker" for all log calls.
//!
//! When the broker core is embedded in a host process, Rust log targets
//! become the host's logger names. Without an explicit target, tracing uses
//! the full module path (e.g., "pamdb_broker::tunnel::builder"), creating
//! overly verbose logger names. These macros ensure all logs from this
//! crate use a single "pamdb_broker" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "pamdb_broker", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "pamdb_broker", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "pamdb_broker", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "pamdb_broker", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "pamdb_broker", $($arg)*) };
}
