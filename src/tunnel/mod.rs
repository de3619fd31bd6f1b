//! The nested relay→gateway TLS tunnel and its supporting machinery.
//!
//! A tunneled query owns three pieces, built in order and torn down
//! together:
//!
//! 1. [`builder`] — the two-layer TLS stream: outer leg to the relay with
//!    strict verification, inner leg to the gateway nested inside it with
//!    ALPN and mutual TLS.
//! 2. [`bridge`] — a loopback TCP listener spliced to the inner stream, so
//!    an off-the-shelf database driver can "dial localhost" and speak the
//!    native wire protocol across the tunnel.
//! 3. [`registry`] — the per-broker map of live tunnel handles, used for
//!    supersession, explicit disconnect, and shutdown.

pub mod bridge;
pub mod builder;
pub mod registry;

pub use bridge::LocalBridge;
pub use builder::{build, RelayStream, TunnelStream};
pub use registry::{TunnelHandle, TunnelRegistry, TunnelSummary};
