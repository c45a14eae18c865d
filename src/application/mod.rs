//! Application services (use cases).
//!
//! These services orchestrate domain logic and coordinate adapters
//! through the ports in [`crate::port`].

pub mod indexer;
pub mod orchestrator;
pub mod queue;
pub mod state;
