//! Tracing setup shared by the daemon and the CLI.

pub mod tracing_setup;
