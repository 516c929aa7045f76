//! The ensemble scheduling engine.
//!
//! - `lifecycle` -- per-workflow process lifecycle port
//! - `context` -- per-cycle context and the cycle report
//! - `processor` -- admission control and the workflow state machine
//! - `manager` -- the polling loop

pub mod context;
pub mod lifecycle;
pub mod manager;
pub mod processor;
