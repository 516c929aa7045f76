//! Scheduling engine and repository trait definitions for the ensemble manager.
//!
//! This crate defines the "ports" (repository, monitoring and lifecycle
//! traits) that the infrastructure layer implements, plus the logic that
//! drives workflows through their lifecycle. It depends only on
//! `ensemble-types` -- never on `ensemble-infra` or any database/IO crate.

pub mod repository;
pub mod service;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
