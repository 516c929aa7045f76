//! Infrastructure layer for the ensemble manager.
//!
//! Implements the traits defined in `ensemble-core`: SQLite storage for
//! ensembles and the monitoring view, detached process launches, tool
//! discovery, and the data directory layout.

pub mod config;
pub mod filesystem;
pub mod process;
pub mod processor;
pub mod sqlite;
