//! Application layer - Generic services that use ports.

pub mod orchestrator;
pub mod reconciler;
pub mod registry;
