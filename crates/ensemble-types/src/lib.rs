//! Shared domain types for the ensemble manager.
//!
//! Ensembles, ensemble workflows and their lifecycle states, monitoring
//! records, configuration, and the error types shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod ensemble;
pub mod error;
pub mod monitoring;
