//! cbdb-bootstrap - process wiring shared by every plugin entry point
//!
//! The host harness drives the producer; this crate sets up telemetry, builds
//! the producer from plugin settings and releases it on shutdown.

mod health;
mod runtime;
mod shutdown;

pub use health::*;
pub use runtime::*;
pub use shutdown::*;
