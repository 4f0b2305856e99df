//! Domain layer - Pure business logic.

pub mod artifacts;
pub mod av;
pub mod jobs;
pub mod progress;
