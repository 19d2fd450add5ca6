//! Observability setup for hosts embedding the coprocessor kernel.
//!
//! The kernel crates only emit `tracing` events; installing a subscriber is
//! left to the host, which calls [`tracing_setup::init_tracing`] once at
//! startup with the `[log]` section of its `coproc.toml`.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
