//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools, plus the read-only monitoring source.

pub mod ensemble;
pub mod monitoring;
pub mod pool;
